//! # herald-core
//!
//! Shared vocabulary for the Herald crates:
//!
//! - **IDs**: [`UserId`] (numeric, validated) and [`ConnectionId`]
//! - **Retry**: [`RetryConfig`] and [`Backoff`] for publish retries and resubscription
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod retry;

pub use ids::{ConnectionId, InvalidUserId, UserId};
pub use logging::LogFormat;
pub use retry::{Backoff, RetryConfig};
