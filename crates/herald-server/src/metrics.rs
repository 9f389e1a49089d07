//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Renders an empty exposition; used when no global recorder is wanted.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// Metric name constants shared by every emitter.

/// WebSocket connections admitted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Admission rejections (counter, labels: reason).
pub const WS_ADMISSION_REJECTIONS_TOTAL: &str = "ws_admission_rejections_total";
/// Frames dropped on a full or closed writer queue (counter).
pub const WS_FRAME_DROPS_TOTAL: &str = "ws_frame_drops_total";
/// Connections evicted by the liveness monitor (counter).
pub const LIVENESS_EVICTIONS_TOTAL: &str = "liveness_evictions_total";
/// Probes sent by the liveness monitor (counter).
pub const LIVENESS_PROBES_TOTAL: &str = "liveness_probes_total";
/// Notification frames enqueued to local connections (counter).
pub const NOTIFICATIONS_DELIVERED_TOTAL: &str = "notifications_delivered_total";
/// Messages received from the broadcast channel (counter).
pub const RELAY_MESSAGES_RECEIVED_TOTAL: &str = "relay_messages_received_total";
/// Channel records that failed to decode (counter).
pub const RELAY_MESSAGES_MALFORMED_TOTAL: &str = "relay_messages_malformed_total";
/// Messages published to the broadcast channel (counter).
pub const RELAY_MESSAGES_PUBLISHED_TOTAL: &str = "relay_messages_published_total";
/// Publishes dropped after exhausting retries or a full outbox (counter, labels: cause).
pub const RELAY_PUBLISH_FAILURES_TOTAL: &str = "relay_publish_failures_total";
/// Subscription (re)establishments after the first (counter).
pub const RELAY_RESUBSCRIPTIONS_TOTAL: &str = "relay_resubscriptions_total";
