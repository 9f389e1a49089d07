//! In-process broadcast channel.
//!
//! Every relay sharing one [`MemoryChannel`] behaves like a separate process
//! attached to the same pub/sub server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::channel::{BroadcastChannel, ChannelError, MessageStream};

/// Process-local pub/sub.
pub struct MemoryChannel {
    topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
    available: AtomicBool,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryChannel {
    /// Create an empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every active subscription, ending their streams.
    pub fn sever(&self) {
        self.topics.lock().clear();
    }

    /// Make publish and subscribe fail until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map_or(0, |subs| subs.iter().filter(|tx| !tx.is_closed()).count())
    }

    fn ensure_available(&self) -> Result<(), ChannelError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChannelError::Unavailable("memory channel disabled".into()))
        }
    }
}

#[async_trait]
impl BroadcastChannel for MemoryChannel {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError> {
        self.ensure_available()?;
        if let Some(subs) = self.topics.lock().get_mut(topic) {
            subs.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError> {
        self.ensure_available()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_receives_publish() {
        let channel = MemoryChannel::new();
        let mut a = channel.subscribe("t").await.unwrap();
        let mut b = channel.subscribe("t").await.unwrap();

        channel.publish("t", "hello".into()).await.unwrap();
        assert_eq!(a.next().await.as_deref(), Some("hello"));
        assert_eq!(b.next().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let channel = MemoryChannel::new();
        let mut other = channel.subscribe("other").await.unwrap();
        channel.publish("t", "x".into()).await.unwrap();
        channel.sever();
        assert_eq!(other.next().await, None);
    }

    #[tokio::test]
    async fn no_replay_for_late_subscribers() {
        let channel = MemoryChannel::new();
        channel.publish("t", "early".into()).await.unwrap();
        let mut late = channel.subscribe("t").await.unwrap();
        channel.publish("t", "late".into()).await.unwrap();
        assert_eq!(late.next().await.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn sever_ends_streams() {
        let channel = MemoryChannel::new();
        let mut sub = channel.subscribe("t").await.unwrap();
        assert_eq!(channel.subscriber_count("t"), 1);
        channel.sever();
        assert_eq!(sub.next().await, None);
        assert_eq!(channel.subscriber_count("t"), 0);
    }

    #[tokio::test]
    async fn unavailable_channel_errors() {
        let channel = MemoryChannel::new();
        channel.set_available(false);
        assert!(channel.publish("t", "x".into()).await.is_err());
        assert!(channel.subscribe("t").await.is_err());
        channel.set_available(true);
        assert!(channel.subscribe("t").await.is_ok());
    }
}
