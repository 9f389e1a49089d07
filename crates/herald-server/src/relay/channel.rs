//! Shared publish/subscribe channel abstraction.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

/// Stream of raw payloads received on a subscribed topic.
///
/// The stream ends when the subscription drops.
pub type MessageStream = BoxStream<'static, String>;

/// Broadcast channel failures.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Redis command or connection failure.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// The channel cannot be reached.
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// Fan-out channel shared by every process. No replay: a subscriber only
/// sees messages published while it is subscribed.
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    /// Publish `payload` to every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError>;

    /// Subscribe to `topic`. Resolves once the subscription is active.
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError>;
}
