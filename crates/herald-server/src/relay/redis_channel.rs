//! Redis pub/sub channel.

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use super::channel::{BroadcastChannel, ChannelError, MessageStream};

/// Redis-backed broadcast channel.
///
/// Publishing goes through a reconnecting [`ConnectionManager`]; each
/// subscription opens its own dedicated pub/sub connection.
#[derive(Clone)]
pub struct RedisChannel {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisChannel {
    /// Connect the publishing side. Subscriptions connect lazily.
    pub async fn connect(client: redis::Client) -> Result<Self, ChannelError> {
        let publisher = ConnectionManager::new(client.clone()).await?;
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl BroadcastChannel for RedisChannel {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(topic, payload).await?;
        debug!(topic, receivers, "published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(channel = msg.get_channel_name(), error = %e, "non-utf8 payload");
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }
}
