//! WebSocket connection management.
//!
//! - [`connection`]: per-socket state (queue, liveness flag, close signal)
//! - [`registry`]: user id → live connections on this process
//! - [`heartbeat`]: periodic probing and eviction
//! - [`dispatch`]: local fan-out of a notification to one user's connections
//! - [`session`]: socket task from registration to disconnect

pub mod connection;
pub mod dispatch;
pub mod heartbeat;
pub mod registry;
pub mod session;
