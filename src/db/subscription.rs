//! Live query snapshots.
//!
//! A `QuerySubscription` yields the current result of a query, then a fresh
//! result after every committed change that can affect it. Dropping the
//! subscription releases its change receiver.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use super::store::{ChangeEvent, Document, DocumentStore, Query};
use super::DatabaseError;

pub struct QuerySubscription {
    store: Arc<dyn DocumentStore>,
    query: Query,
    changes: broadcast::Receiver<ChangeEvent>,
    initial_sent: bool,
}

impl QuerySubscription {
    /// Subscribe before the first read so no change slips between them.
    pub fn new(store: Arc<dyn DocumentStore>, query: Query) -> Self {
        let changes = store.changes();
        Self {
            store,
            query,
            changes,
            initial_sent: false,
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Next snapshot. The first call returns immediately; later calls wait
    /// for a relevant change. `None` once the store has shut down.
    pub async fn next_snapshot(&mut self) -> Option<Result<Vec<Document>, DatabaseError>> {
        if !self.initial_sent {
            self.initial_sent = true;
            return Some(self.store.query(&self.query));
        }

        loop {
            match self.changes.recv().await {
                Ok(event) => {
                    if self.query.matches_path(&event.path) {
                        self.drain_pending();
                        return Some(self.store.query(&self.query));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Subscription lagged, re-querying");
                    self.drain_pending();
                    return Some(self.store.query(&self.query));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Collapse events already queued; the re-query covers them.
    fn drain_pending(&mut self) {
        loop {
            match self.changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }
}
