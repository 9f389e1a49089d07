//! # herald-server
//!
//! Real-time notification delivery over WebSocket.
//!
//! - **Admission**: a socket claims a `userId`; only known users are registered
//! - **Registry**: live connections indexed by user, many sockets per user
//! - **Liveness**: periodic ping probes evict connections that stop answering
//! - **Dispatch**: serialize a notification once and fan it out to a user's open sockets
//! - **Relay**: publish notifications to every process over a broadcast channel
//!   (Redis pub/sub or in-memory) and dispatch what arrives locally
//! - **HTTP**: `/ws`, `/health`, `/metrics` and `POST /api/v1/notifications`

#![deny(unsafe_code)]

pub mod admission;
pub mod cache;
pub mod config;
pub mod health;
pub mod identity;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use admission::{Admission, AdmissionError};
pub use config::ServerConfig;
pub use identity::{CachedIdentityStore, IdentityStore, InMemoryIdentityStore, PgIdentityStore};
pub use relay::{BroadcastChannel, MemoryChannel, RedisChannel, Relay, RelayConfig, RelayError};
pub use server::HeraldServer;
