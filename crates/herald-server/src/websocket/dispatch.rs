//! Local dispatcher: writes a notification to every open connection of a
//! user on this process.

use std::sync::Arc;

use herald_core::UserId;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::registry::ConnectionRegistry;
use crate::metrics::{NOTIFICATIONS_DELIVERED_TOTAL, WS_FRAME_DROPS_TOTAL};

/// Wire shape of an outbound notification frame.
#[derive(Serialize)]
struct NotificationFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: &'a Value,
}

/// Serialize `{"type":"notification","message":<payload>}`.
pub fn notification_frame(payload: &Value) -> Result<Arc<str>, serde_json::Error> {
    let json = serde_json::to_string(&NotificationFrame {
        kind: "notification",
        message: payload,
    })?;
    Ok(Arc::from(json))
}

/// Fans a payload out to a user's local connections.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver `payload` to every open local connection of `user_id`.
    ///
    /// Returns the number of connections the frame was enqueued on. Closing
    /// or backed-up connections are skipped and left for their session task
    /// or the liveness monitor to clean up.
    pub fn dispatch_local(&self, user_id: UserId, payload: &Value) -> usize {
        let connections = self.registry.connections_for(user_id);
        if connections.is_empty() {
            debug!(%user_id, "no local connections");
            return 0;
        }

        let frame = match notification_frame(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%user_id, error = %e, "failed to serialize notification");
                return 0;
            }
        };

        let mut delivered = 0;
        for connection in &connections {
            if !connection.is_open() {
                continue;
            }
            if connection.send(frame.clone()) {
                delivered += 1;
            } else {
                warn!(%user_id, conn_id = %connection.id, "notification dropped, send queue full");
                counter!(WS_FRAME_DROPS_TOTAL).increment(1);
            }
        }

        counter!(NOTIFICATIONS_DELIVERED_TOTAL).increment(delivered as u64);
        debug!(%user_id, delivered, candidates = connections.len(), "dispatched notification");
        delivered
    }
}
