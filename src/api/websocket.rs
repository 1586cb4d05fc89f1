//! WebSocket live feeds.
//!
//! Connection lifecycle:
//! 1. Client calls `POST /api/auth/ws-ticket` to get a one-time ticket
//! 2. Client opens `GET /ws/connect?ticket=xxx`, ticket validated, WS upgraded
//! 3. Server sends `Welcome`
//! 4. Client subscribes to topics: a chat conversation, the doctor's roster,
//!    or its own route decision. Each topic runs as one task that pushes a
//!    full snapshot on every relevant change
//! 5. Heartbeat every 30s; 3 missed = disconnect. All topic tasks are
//!    aborted on unsubscribe or disconnect
//! 6. Logout or session expiry closes the socket

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, SessionContext};
use crate::chat;
use crate::db::QuerySubscription;
use crate::directory::{self, RosterEntry};
use crate::models::{ChatMessage, Role};
use crate::session::{spawn_role_resolver, ViewState};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Disconnect after this many missed heartbeats (3 × 30s = 90s).
const MAX_MISSED_HEARTBEATS: u32 = 3;

/// Maximum incoming messages per second per connection.
const MAX_INCOMING_PER_SECOND: u32 = 10;

#[derive(Deserialize)]
pub struct WsAuthQuery {
    ticket: String,
}

// ═══════════════════════════════════════════════════════════
// Wire messages
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topic {
    /// Conversation with one of the doctor's patients.
    Messages {
        #[serde(rename = "patientId")]
        patient_id: String,
    },
    Roster,
    Route,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum WsIncoming {
    Subscribe { topic: Topic },
    Unsubscribe { topic: Topic },
    Pong {},
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum WsOutgoing {
    Welcome {
        uid: String,
        role: Role,
        session_id: String,
    },
    Heartbeat {
        server_time: String,
    },
    Subscribed {
        topic: Topic,
    },
    Unsubscribed {
        topic: Topic,
    },
    Messages {
        patient_id: String,
        conversation_key: String,
        messages: Vec<ChatMessage>,
    },
    Roster {
        patients: Vec<RosterEntry>,
    },
    Route {
        state: ViewState,
    },
    Error {
        message: String,
    },
}

// ═══════════════════════════════════════════════════════════
// Connection state
// ═══════════════════════════════════════════════════════════

/// Heartbeat and incoming-rate bookkeeping for one connection.
pub(crate) struct ConnectionState {
    missed_heartbeats: u32,
    incoming_times: VecDeque<Instant>,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            missed_heartbeats: 0,
            incoming_times: VecDeque::new(),
        }
    }

    fn on_pong(&mut self) {
        self.missed_heartbeats = 0;
    }

    /// `false` once too many heartbeats went unanswered.
    fn on_heartbeat_tick(&mut self) -> bool {
        if self.missed_heartbeats >= MAX_MISSED_HEARTBEATS {
            return false;
        }
        self.missed_heartbeats += 1;
        true
    }

    /// Sliding one-second window. Returns `true` if allowed.
    fn check_rate(&mut self) -> bool {
        let now = Instant::now();
        while let Some(&front) = self.incoming_times.front() {
            if now.duration_since(front) > Duration::from_secs(1) {
                self.incoming_times.pop_front();
            } else {
                break;
            }
        }
        if self.incoming_times.len() as u32 >= MAX_INCOMING_PER_SECOND {
            return false;
        }
        self.incoming_times.push_back(now);
        true
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ═══════════════════════════════════════════════════════════
// Upgrade + connection loop
// ═══════════════════════════════════════════════════════════

/// Validates the one-time ticket before upgrading the connection.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(ctx): State<ApiContext>,
    Query(query): Query<WsAuthQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let session = {
        let mut tickets = ctx
            .ws_tickets
            .lock()
            .map_err(|_| ApiError::Internal("ticket lock".into()))?;
        tickets
            .consume(&query.ticket)
            .ok_or(ApiError::Unauthorized)?
    };

    tracing::info!(uid = %session.uid, "WebSocket upgrade accepted");
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, ctx, session)))
}

async fn handle_ws(socket: WebSocket, ctx: ApiContext, session: SessionContext) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, rx) = mpsc::channel::<WsOutgoing>(64);

    // Channel → WebSocket
    let sender_handle = tokio::spawn(async move {
        let mut sink = ws_sink;
        let mut rx = rx;
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(_) => continue,
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let _ = tx
        .send(WsOutgoing::Welcome {
            uid: session.uid.clone(),
            role: session.role,
            session_id: uuid::Uuid::new_v4().to_string(),
        })
        .await;

    let mut topics: HashMap<Topic, JoinHandle<()>> = HashMap::new();
    let mut state = ConnectionState::new();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // Consume initial immediate tick
    let mut identity = session.auth.subscribe();
    let mut signed_in = identity.borrow_and_update().is_some();

    while signed_in {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(ref text))) => {
                        if !state.check_rate() {
                            continue;
                        }
                        match serde_json::from_str::<WsIncoming>(text) {
                            Ok(WsIncoming::Pong {}) => state.on_pong(),
                            Ok(WsIncoming::Subscribe { topic }) => {
                                subscribe(&ctx, &session, &mut topics, topic, &tx).await;
                            }
                            Ok(WsIncoming::Unsubscribe { topic }) => {
                                if let Some(task) = topics.remove(&topic) {
                                    task.abort();
                                }
                                let _ = tx.send(WsOutgoing::Unsubscribed { topic }).await;
                            }
                            Err(e) => {
                                let _ = tx.send(WsOutgoing::Error {
                                    message: format!("Unrecognised message: {e}"),
                                }).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // Ping/Pong handled by axum/tungstenite
                }
            }
            _ = heartbeat.tick() => {
                if !state.on_heartbeat_tick() {
                    tracing::info!(
                        uid = %session.uid,
                        "{MAX_MISSED_HEARTBEATS} missed heartbeats, disconnecting"
                    );
                    break;
                }
                let _ = tx.send(WsOutgoing::Heartbeat {
                    server_time: chrono::Utc::now().to_rfc3339(),
                }).await;
            }
            changed = identity.changed() => {
                signed_in = changed.is_ok() && identity.borrow_and_update().is_some();
                if !signed_in {
                    tracing::info!(uid = %session.uid, "Session ended, closing WebSocket");
                }
            }
        }
    }

    for (_, task) in topics.drain() {
        task.abort();
    }
    drop(tx);
    let _ = sender_handle.await;

    tracing::info!(uid = %session.uid, "WebSocket disconnected");
}

async fn subscribe(
    ctx: &ApiContext,
    session: &SessionContext,
    topics: &mut HashMap<Topic, JoinHandle<()>>,
    topic: Topic,
    tx: &mpsc::Sender<WsOutgoing>,
) {
    if topics.contains_key(&topic) {
        let _ = tx.send(WsOutgoing::Subscribed { topic }).await;
        return;
    }
    match start_topic(ctx, session, &topic, tx.clone()) {
        Ok(task) => {
            topics.insert(topic, task);
        }
        Err(e) => {
            tracing::debug!(uid = %session.uid, ?topic, error = %e, "Subscription refused");
            let _ = tx.send(WsOutgoing::Error { message: e.to_string() }).await;
        }
    }
}

fn require_doctor(session: &SessionContext) -> Result<(), ApiError> {
    if session.role != Role::Doctor {
        return Err(ApiError::Forbidden("Doctor access required".into()));
    }
    Ok(())
}

/// Validate access and spawn the feed task for one topic. Each task
/// acknowledges with `Subscribed` before its first snapshot.
fn start_topic(
    ctx: &ApiContext,
    session: &SessionContext,
    topic: &Topic,
    tx: mpsc::Sender<WsOutgoing>,
) -> Result<JoinHandle<()>, ApiError> {
    let backend = ctx.core.backend.clone();
    let ack = topic.clone();
    match topic {
        Topic::Messages { patient_id } => {
            require_doctor(session)?;
            let (_, key) = chat::patient_conversation(
                backend.store.as_ref(),
                &session.uid,
                &session.email,
                patient_id,
            )?;
            let mut subscription = chat::subscribe_messages(backend.store.clone(), &key)?;
            let patient_id = patient_id.clone();
            Ok(tokio::spawn(async move {
                if tx.send(WsOutgoing::Subscribed { topic: ack }).await.is_err() {
                    return;
                }
                while let Some(snapshot) = subscription.next_snapshot().await {
                    let msg = match snapshot.and_then(|docs| chat::decode_messages(&docs)) {
                        Ok(messages) => WsOutgoing::Messages {
                            patient_id: patient_id.clone(),
                            conversation_key: key.clone(),
                            messages,
                        },
                        Err(e) => {
                            tracing::warn!(conversation = %key, error = %e, "Message feed read failed");
                            WsOutgoing::Error {
                                message: "Could not load messages".into(),
                            }
                        }
                    };
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
            }))
        }
        Topic::Roster => {
            require_doctor(session)?;
            let mut subscription =
                QuerySubscription::new(backend.store.clone(), directory::roster_query(&session.uid));
            Ok(tokio::spawn(async move {
                if tx.send(WsOutgoing::Subscribed { topic: ack }).await.is_err() {
                    return;
                }
                while let Some(snapshot) = subscription.next_snapshot().await {
                    let msg = match snapshot {
                        Ok(docs) => WsOutgoing::Roster {
                            patients: directory::roster_entries(backend.objects.as_ref(), &docs),
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "Roster feed read failed");
                            WsOutgoing::Error {
                                message: "Could not load patients".into(),
                            }
                        }
                    };
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
            }))
        }
        Topic::Route => {
            let (mut states, resolver) =
                spawn_role_resolver(backend.store.clone(), session.auth.subscribe());
            Ok(tokio::spawn(async move {
                let _resolver = AbortOnDrop(resolver);
                if tx.send(WsOutgoing::Subscribed { topic: ack }).await.is_err() {
                    return;
                }
                while let Some(state) = states.recv().await {
                    if tx.send(WsOutgoing::Route { state }).await.is_err() {
                        break;
                    }
                }
            }))
        }
    }
}
