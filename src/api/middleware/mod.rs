//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Rate limiter: reject early, save resources
//! 2. Auth validator: bearer token to `SessionContext`
//! 3. Role guard: admin-only or doctor-only route groups
//! 4. Audit logger: logs after auth, has the acting user

pub mod audit;
pub mod auth;
pub mod rate;
