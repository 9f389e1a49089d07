//! `HeraldServer`: the Axum HTTP and WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use herald_core::UserId;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::admission::Admission;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::identity::IdentityStore;
use crate::relay::{BroadcastChannel, Relay, RelayConfig, RelayError};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::dispatch::Dispatcher;
use crate::websocket::heartbeat::LivenessMonitor;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{reject, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections on this process.
    pub registry: Arc<ConnectionRegistry>,
    /// Identity gate for new sockets.
    pub admission: Admission,
    /// Cross-process fan-out.
    pub relay: Arc<Relay>,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
    /// When the server started.
    pub start_time: Instant,
    /// Per-connection outbound queue size.
    pub send_queue_capacity: usize,
    /// Max inbound WebSocket message size.
    pub max_message_size: usize,
}

/// The notification server for one process.
pub struct HeraldServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Dispatcher,
    admission: Admission,
    relay: Arc<Relay>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl HeraldServer {
    /// Assemble a server over an identity store and a broadcast channel.
    pub fn new(
        config: ServerConfig,
        identity: Arc<dyn IdentityStore>,
        channel: Arc<dyn BroadcastChannel>,
        relay_config: RelayConfig,
        metrics: PrometheusHandle,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let relay = Arc::new(Relay::new(channel, dispatcher.clone(), relay_config));
        Self {
            config,
            registry,
            dispatcher,
            admission: Admission::new(identity),
            relay,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            admission: self.admission.clone(),
            relay: self.relay.clone(),
            metrics: self.metrics.clone(),
            start_time: self.start_time,
            send_queue_capacity: self.config.send_queue_capacity,
            max_message_size: self.config.max_message_size,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .route("/api/v1/notifications", post(publish_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Start the liveness monitor and relay tasks.
    ///
    /// The tasks stop when the shutdown token is cancelled.
    pub fn start_background(&self) {
        let token = self.shutdown.token();
        let monitor = LivenessMonitor::new(self.registry.clone(), self.config.probe_interval);
        self.shutdown.track([monitor.spawn(token.clone())]);
        self.shutdown.track(self.relay.start(&token));
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let token = self.shutdown.token();

        info!(%addr, "herald server listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                warn!(error = %e, "server exited with error");
            }
        });
        Ok((addr, handle))
    }

    /// Live connections on this process.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Local dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Cross-process relay.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.registry.user_count(),
        state.relay.is_subscribed(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.render()
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// GET /ws?userId=<id>
///
/// Admission runs before the upgrade completes, so a client that goes away
/// mid-lookup never reaches the registry. Rejected clients are still
/// upgraded so they receive the close code and reason.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let outcome = state.admission.admit(params.user_id.as_deref()).await;
    let registry = state.registry.clone();
    let capacity = state.send_queue_capacity;

    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            match outcome {
                Ok(user_id) => run_ws_session(socket, user_id, registry, capacity).await,
                Err(err) => reject(socket, err).await,
            }
        })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishRequest {
    user_id: UserId,
    message: Value,
}

/// POST /api/v1/notifications
async fn publish_handler(
    State(state): State<AppState>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": rejection.body_text() })),
            )
                .into_response();
        }
    };

    match state.relay.publish(req.user_id, req.message) {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))).into_response(),
        Err(e @ (RelayError::OutboxFull | RelayError::Stopped)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::InMemoryIdentityStore;
    use crate::metrics::detached_handle;
    use crate::relay::MemoryChannel;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_server() -> HeraldServer {
        HeraldServer::new(
            ServerConfig::default(),
            Arc::new(InMemoryIdentityStore::new()),
            Arc::new(MemoryChannel::new()),
            RelayConfig::default(),
            detached_handle(),
        )
    }

    async fn body_json(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/notifications")
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint_reports_counts() {
        let server = make_server();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let parsed = body_json(resp).await;
        assert_eq!(parsed["status"], "degraded");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["users"], 0);
        assert_eq!(parsed["relaySubscribed"], false);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_text() {
        let server = make_server();
        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn publish_accepts_valid_body() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(post_json(r#"{"userId":7,"message":"x"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["status"], "queued");
    }

    #[tokio::test]
    async fn publish_rejects_invalid_body() {
        let server = make_server();
        for body in [r#"{"userId":"abc","message":"x"}"#, r#"{"userId":0,"message":1}"#, "nope"] {
            let resp = server.router().oneshot(post_json(body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
        }
    }

    #[tokio::test]
    async fn publish_full_outbox_is_unavailable() {
        let server = HeraldServer::new(
            ServerConfig::default(),
            Arc::new(InMemoryIdentityStore::new()),
            Arc::new(MemoryChannel::new()),
            RelayConfig {
                outbox_capacity: 1,
                ..RelayConfig::default()
            },
            detached_handle(),
        );
        let first = server
            .router()
            .oneshot(post_json(r#"{"userId":1,"message":1}"#))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let second = server
            .router()
            .oneshot(post_json(r#"{"userId":1,"message":2}"#))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ws_without_upgrade_headers_is_rejected() {
        let server = make_server();
        let req = Request::builder()
            .uri("/ws?userId=1")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = server.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn shutdown_coordinator_accessible() {
        let server = make_server();
        assert!(!server.shutdown().is_shutting_down());
        server.shutdown().shutdown();
        assert!(server.shutdown().is_shutting_down());
    }
}
