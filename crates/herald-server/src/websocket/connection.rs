//! Per-socket connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use herald_core::{ConnectionId, UserId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outbound frame queued for a connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A serialized JSON text frame.
    Text(Arc<str>),
    /// A liveness probe.
    Ping,
}

/// One live duplex channel to a single client instance.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// The admitted user this connection belongs to.
    pub user_id: UserId,
    /// Send channel to the socket writer task.
    tx: mpsc::Sender<Frame>,
    /// Monotonic time the connection was registered.
    pub connected_at: Instant,
    /// Wall-clock time the connection was registered.
    pub created_at: DateTime<Utc>,
    /// Cleared before each probe, set again by a pong.
    is_alive: AtomicBool,
    /// Cancelled once the connection is being torn down.
    closed: CancellationToken,
    /// Frames dropped because the writer queue was full or gone.
    dropped_frames: AtomicU64,
}

impl Connection {
    /// Create a connection for an admitted user.
    pub fn new(user_id: UserId, tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            tx,
            connected_at: Instant::now(),
            created_at: Utc::now(),
            is_alive: AtomicBool::new(true),
            closed: CancellationToken::new(),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Whether frames can still be written to this connection.
    pub fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }

    /// Queue a text frame.
    ///
    /// Returns `false` without blocking if the connection is closing or its
    /// queue is full; the drop is counted.
    pub fn send(&self, text: Arc<str>) -> bool {
        self.enqueue(Frame::Text(text))
    }

    /// Queue a liveness probe.
    pub fn probe(&self) -> bool {
        self.enqueue(Frame::Ping)
    }

    fn enqueue(&self, frame: Frame) -> bool {
        if self.closed.is_cancelled() {
            return false;
        }
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Record a probe response.
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Flip the connection to suspect, returning whether it was alive.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Current liveness flag.
    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    /// Force-close: signal the session task to drop the socket.
    pub fn terminate(&self) {
        self.closed.cancel();
    }

    /// Whether [`Connection::terminate`] has been called.
    pub fn is_terminated(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection has been terminated.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("created_at", &self.created_at)
            .field("is_alive", &self.is_alive())
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (Connection, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = Connection::new(UserId::new(1).unwrap(), tx);
        (conn, rx)
    }

    #[test]
    fn new_connection_is_alive_and_open() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.is_alive());
        assert!(conn.is_open());
        assert!(conn.id.as_str().starts_with("conn_"));
    }

    #[tokio::test]
    async fn send_enqueues_text() {
        let (conn, mut rx) = make_connection(4);
        assert!(conn.send(Arc::from("hello")));
        assert_eq!(rx.recv().await.unwrap(), Frame::Text(Arc::from("hello")));
    }

    #[test]
    fn send_to_full_queue_counts_drop() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::from("one")));
        assert!(!conn.send(Arc::from("two")));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn send_after_receiver_dropped_fails() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(!conn.is_open());
        assert!(!conn.send(Arc::from("x")));
    }

    #[test]
    fn check_alive_flips_to_suspect() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.check_alive());
        assert!(!conn.is_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }

    #[tokio::test]
    async fn terminate_closes_and_wakes_waiters() {
        let (conn, _rx) = make_connection(4);
        conn.terminate();
        assert!(!conn.is_open());
        assert!(!conn.probe());
        conn.closed().await;
    }

    #[test]
    fn debug_shows_identity_and_registration_time() {
        let (conn, _rx) = make_connection(1);
        let rendered = format!("{conn:?}");
        assert!(rendered.contains(conn.id.as_str()));
        assert!(rendered.contains("created_at"));
        assert!(conn.created_at <= Utc::now());
    }
}
