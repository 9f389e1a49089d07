//! Distributed relay: cross-process fan-out over a shared broadcast channel.
//!
//! Every process subscribes to the same topic. [`Relay::publish`] puts a
//! record on a bounded outbox and returns; a publisher task sends it to the
//! channel. Each process receives every record and delivers it to whatever
//! connections of the target user it holds locally, so global delivery is
//! the union of local deliveries. Delivery is at-most-once: records
//! published while a process is unsubscribed never reach it.

pub mod channel;
pub mod memory;
pub mod message;
pub mod redis_channel;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use herald_core::{Backoff, RetryConfig, UserId};
use herald_settings::RelaySettings;
use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use channel::{BroadcastChannel, ChannelError, MessageStream};
pub use memory::MemoryChannel;
pub use message::ChannelMessage;
pub use redis_channel::RedisChannel;

use crate::metrics::{
    RELAY_MESSAGES_MALFORMED_TOTAL, RELAY_MESSAGES_PUBLISHED_TOTAL,
    RELAY_MESSAGES_RECEIVED_TOTAL, RELAY_PUBLISH_FAILURES_TOTAL, RELAY_RESUBSCRIPTIONS_TOTAL,
};
use crate::websocket::dispatch::Dispatcher;

/// Relay tuning.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Topic every process subscribes to.
    pub channel: String,
    /// Records buffered between `publish` and the publisher task.
    pub outbox_capacity: usize,
    /// Attempts and backoff for one channel publish.
    pub publish_retry: RetryConfig,
    /// Backoff between resubscription attempts.
    pub resubscribe: RetryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from(&RelaySettings::default())
    }
}

impl From<&RelaySettings> for RelayConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            channel: settings.channel.clone(),
            outbox_capacity: settings.outbox_capacity.max(1),
            publish_retry: settings.publish_retry.clone(),
            resubscribe: settings.resubscribe.clone(),
        }
    }
}

/// Relay failures surfaced to publishers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    /// The outbox is at capacity.
    #[error("relay outbox is full")]
    OutboxFull,
    /// The publisher task has stopped.
    #[error("relay is stopped")]
    Stopped,
}

/// Cross-process notification relay.
pub struct Relay {
    channel: Arc<dyn BroadcastChannel>,
    dispatcher: Dispatcher,
    config: RelayConfig,
    outbox_tx: mpsc::Sender<ChannelMessage>,
    outbox_rx: Mutex<Option<mpsc::Receiver<ChannelMessage>>>,
    started: AtomicBool,
    subscribed: AtomicBool,
}

impl Relay {
    /// Create a relay. Nothing runs until [`Relay::start`].
    pub fn new(
        channel: Arc<dyn BroadcastChannel>,
        dispatcher: Dispatcher,
        config: RelayConfig,
    ) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::channel(config.outbox_capacity.max(1));
        Self {
            channel,
            dispatcher,
            config,
            outbox_tx,
            outbox_rx: Mutex::new(Some(outbox_rx)),
            started: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
        }
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.config.channel
    }

    /// Whether the subscription is currently active.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Queue a notification for every process. Returns immediately.
    ///
    /// Succeeds while the channel is unreachable; the publisher task retries
    /// in the background and drops the record once its attempts run out.
    pub fn publish(&self, user_id: UserId, message: Value) -> Result<(), RelayError> {
        match self.outbox_tx.try_send(ChannelMessage::new(user_id, message)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(%user_id, "relay outbox full, dropping notification");
                counter!(RELAY_PUBLISH_FAILURES_TOTAL, "cause" => "outbox_full").increment(1);
                Err(RelayError::OutboxFull)
            }
            Err(TrySendError::Closed(_)) => Err(RelayError::Stopped),
        }
    }

    /// Handle one raw record from the channel. Returns the local delivery
    /// count; malformed records are logged and count as zero.
    pub fn on_message(&self, raw: &str) -> usize {
        counter!(RELAY_MESSAGES_RECEIVED_TOTAL).increment(1);
        match serde_json::from_str::<ChannelMessage>(raw) {
            Ok(msg) => self.dispatcher.dispatch_local(msg.user_id, &msg.message),
            Err(e) => {
                warn!(error = %e, len = raw.len(), "dropping malformed channel record");
                counter!(RELAY_MESSAGES_MALFORMED_TOTAL).increment(1);
                0
            }
        }
    }

    /// Spawn the publisher and subscriber tasks.
    ///
    /// Only the first call starts anything; later calls return no handles so
    /// each record is dispatched once per process.
    pub fn start(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("relay already started");
            return Vec::new();
        }
        let mut handles = Vec::with_capacity(2);
        if let Some(rx) = self.outbox_rx.lock().take() {
            handles.push(tokio::spawn(Arc::clone(self).run_publisher(rx, cancel.clone())));
        }
        handles.push(tokio::spawn(Arc::clone(self).run_subscriber(cancel.clone())));
        handles
    }

    async fn run_publisher(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<ChannelMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                () = cancel.cancelled() => break,
            };

            let payload = match serde_json::to_string(&msg) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(user_id = %msg.user_id, error = %e, "failed to encode channel record");
                    continue;
                }
            };

            let _ = self.publish_with_retry(payload, &cancel).await;
        }
        debug!("relay publisher stopped");
    }

    /// Publish one payload, retrying with exponential backoff.
    async fn publish_with_retry(&self, payload: String, cancel: &CancellationToken) -> bool {
        let policy = &self.config.publish_retry;
        let attempts = policy.max_attempts.max(1);

        for attempt in 0..attempts {
            match self.channel.publish(&self.config.channel, payload.clone()).await {
                Ok(()) => {
                    counter!(RELAY_MESSAGES_PUBLISHED_TOTAL).increment(1);
                    return true;
                }
                Err(e) if attempt + 1 >= attempts => {
                    error!(attempts, error = %e, "publish failed, dropping notification");
                    counter!(RELAY_PUBLISH_FAILURES_TOTAL, "cause" => "retries_exhausted")
                        .increment(1);
                    return false;
                }
                Err(e) => {
                    let delay = policy.delay_for(attempt);
                    warn!(attempt = attempt + 1, ?delay, error = %e, "publish failed, retrying");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = cancel.cancelled() => return false,
                    }
                }
            }
        }
        false
    }

    async fn run_subscriber(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.config.resubscribe.clone());
        let mut established: u64 = 0;

        loop {
            let subscribed = tokio::select! {
                result = self.channel.subscribe(&self.config.channel) => result,
                () = cancel.cancelled() => break,
            };

            match subscribed {
                Ok(mut stream) => {
                    self.subscribed.store(true, Ordering::SeqCst);
                    if established == 0 {
                        info!(topic = %self.config.channel, "relay subscribed");
                    } else {
                        info!(topic = %self.config.channel, "relay resubscribed");
                        counter!(RELAY_RESUBSCRIPTIONS_TOTAL).increment(1);
                    }
                    established += 1;
                    backoff.reset();

                    loop {
                        tokio::select! {
                            raw = stream.next() => match raw {
                                Some(raw) => {
                                    let _ = self.on_message(&raw);
                                }
                                None => break,
                            },
                            () = cancel.cancelled() => {
                                self.subscribed.store(false, Ordering::SeqCst);
                                return;
                            }
                        }
                    }

                    self.subscribed.store(false, Ordering::SeqCst);
                    warn!(topic = %self.config.channel, "relay subscription dropped");
                }
                Err(e) => {
                    warn!(topic = %self.config.channel, error = %e, "relay subscribe failed");
                }
            }

            let delay = backoff.next_delay();
            debug!(?delay, attempt = backoff.attempts(), "resubscribing after backoff");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => break,
            }
        }

        self.subscribed.store(false, Ordering::SeqCst);
        debug!("relay subscriber stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::websocket::connection::{Connection, Frame};
    use crate::websocket::registry::ConnectionRegistry;
    use async_trait::async_trait;
    use serde_json::json;

    fn user(n: i64) -> UserId {
        UserId::new(n).unwrap()
    }

    fn fast_config() -> RelayConfig {
        let fast = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
            jitter_factor: 0.0,
        };
        RelayConfig {
            channel: "test-channel".into(),
            outbox_capacity: 16,
            publish_retry: fast.clone(),
            resubscribe: fast,
        }
    }

    struct Node {
        relay: Arc<Relay>,
        registry: Arc<ConnectionRegistry>,
    }

    fn node(channel: Arc<dyn BroadcastChannel>, config: RelayConfig) -> Node {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Arc::new(Relay::new(
            channel,
            Dispatcher::new(registry.clone()),
            config,
        ));
        Node { relay, registry }
    }

    fn attach(registry: &ConnectionRegistry, id: i64) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(8);
        let _ = registry.register(Arc::new(Connection::new(user(id), tx)));
        rx
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached");
    }

    /// Fails the first `failures` publishes, then forwards to a memory channel.
    struct FlakyChannel {
        inner: MemoryChannel,
        failures: AtomicUsize,
        publishes: AtomicUsize,
    }

    #[async_trait]
    impl BroadcastChannel for FlakyChannel {
        async fn publish(&self, topic: &str, payload: String) -> Result<(), ChannelError> {
            let _ = self.publishes.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ChannelError::Unavailable("flaky".into()));
            }
            self.inner.publish(topic, payload).await
        }

        async fn subscribe(&self, topic: &str) -> Result<MessageStream, ChannelError> {
            self.inner.subscribe(topic).await
        }
    }

    #[test]
    fn config_from_settings() {
        let config = RelayConfig::default();
        assert_eq!(config.channel, "notification-channel");
        assert_eq!(config.publish_retry.max_attempts, 3);
        assert_eq!(config.publish_retry.base_delay_ms, 3000);
    }

    #[test]
    fn on_message_dispatches_locally() {
        let n = node(Arc::new(MemoryChannel::new()), fast_config());
        let mut rx = attach(&n.registry, 42);

        let delivered = n.relay.on_message(r#"{"userId":42,"message":"hi"}"#);
        assert_eq!(delivered, 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            Frame::Text(Arc::from(r#"{"type":"notification","message":"hi"}"#))
        );
    }

    #[test]
    fn on_message_malformed_is_dropped() {
        let n = node(Arc::new(MemoryChannel::new()), fast_config());
        let _rx = attach(&n.registry, 1);
        assert_eq!(n.relay.on_message("not json"), 0);
        assert_eq!(n.relay.on_message(r#"{"userId":"abc","message":1}"#), 0);
    }

    #[test]
    fn publish_without_local_connections_succeeds() {
        let n = node(Arc::new(MemoryChannel::new()), fast_config());
        assert_eq!(n.relay.publish(user(5), json!("x")), Ok(()));
    }

    #[test]
    fn publish_reports_full_outbox() {
        let mut config = fast_config();
        config.outbox_capacity = 1;
        let n = node(Arc::new(MemoryChannel::new()), config);
        assert_eq!(n.relay.publish(user(1), json!(1)), Ok(()));
        assert_eq!(n.relay.publish(user(1), json!(2)), Err(RelayError::OutboxFull));
    }

    #[tokio::test]
    async fn cross_process_delivery() {
        let shared = Arc::new(MemoryChannel::new());
        let p1 = node(shared.clone(), fast_config());
        let p2 = node(shared.clone(), fast_config());
        let mut rx = attach(&p2.registry, 7);
        let cancel = CancellationToken::new();
        let _h1 = p1.relay.start(&cancel);
        let _h2 = p2.relay.start(&cancel);
        wait_until(|| p1.relay.is_subscribed() && p2.relay.is_subscribed()).await;

        p1.relay.publish(user(7), json!("x")).unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            frame,
            Frame::Text(Arc::from(r#"{"type":"notification","message":"x"}"#))
        );
        assert!(p1.registry.connections_for(user(7)).is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn second_start_does_not_duplicate_delivery() {
        let n = node(Arc::new(MemoryChannel::new()), fast_config());
        let mut rx = attach(&n.registry, 1);
        let cancel = CancellationToken::new();
        let first = n.relay.start(&cancel);
        let second = n.relay.start(&cancel);
        assert_eq!(first.len(), 2);
        assert!(second.is_empty());
        wait_until(|| n.relay.is_subscribed()).await;

        n.relay.publish(user(1), json!("once")).unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            frame,
            Frame::Text(Arc::from(r#"{"type":"notification","message":"once"}"#))
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        cancel.cancel();
    }

    #[tokio::test]
    async fn publish_retries_then_succeeds() {
        let flaky = Arc::new(FlakyChannel {
            inner: MemoryChannel::new(),
            failures: AtomicUsize::new(2),
            publishes: AtomicUsize::new(0),
        });
        let n = node(flaky.clone(), fast_config());
        let mut rx = attach(&n.registry, 3);
        let cancel = CancellationToken::new();
        let _handles = n.relay.start(&cancel);
        wait_until(|| n.relay.is_subscribed()).await;

        n.relay.publish(user(3), json!("retry")).unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(frame.unwrap().is_some());
        assert_eq!(flaky.publishes.load(Ordering::SeqCst), 3);
        cancel.cancel();
    }

    #[tokio::test]
    async fn publish_gives_up_after_max_attempts() {
        let flaky = Arc::new(FlakyChannel {
            inner: MemoryChannel::new(),
            failures: AtomicUsize::new(usize::MAX),
            publishes: AtomicUsize::new(0),
        });
        let n = node(flaky.clone(), fast_config());
        let cancel = CancellationToken::new();
        let _handles = n.relay.start(&cancel);

        n.relay.publish(user(3), json!("lost")).unwrap();
        wait_until(|| flaky.publishes.load(Ordering::SeqCst) >= 3).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(flaky.publishes.load(Ordering::SeqCst), 3);
        cancel.cancel();
    }

    #[tokio::test]
    async fn resubscribes_after_drop() {
        let shared = Arc::new(MemoryChannel::new());
        let n = node(shared.clone(), fast_config());
        let mut rx = attach(&n.registry, 11);
        let cancel = CancellationToken::new();
        let _handles = n.relay.start(&cancel);
        wait_until(|| n.relay.is_subscribed()).await;

        shared.sever();
        wait_until(|| shared.subscriber_count("test-channel") == 1).await;
        wait_until(|| n.relay.is_subscribed()).await;

        n.relay.publish(user(11), json!("after")).unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(frame.unwrap().is_some());
        cancel.cancel();
    }

    #[tokio::test]
    async fn subscriber_retries_while_channel_unavailable() {
        let shared = Arc::new(MemoryChannel::new());
        shared.set_available(false);
        let n = node(shared.clone(), fast_config());
        let cancel = CancellationToken::new();
        let _handles = n.relay.start(&cancel);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!n.relay.is_subscribed());

        shared.set_available(true);
        wait_until(|| n.relay.is_subscribed()).await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn cancel_stops_tasks() {
        let n = node(Arc::new(MemoryChannel::new()), fast_config());
        let cancel = CancellationToken::new();
        let handles = n.relay.start(&cancel);
        wait_until(|| n.relay.is_subscribed()).await;
        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(!n.relay.is_subscribed());
    }
}
