//! HTTP Server
//!
//! Single axum server for subscribers, health checks, metrics and the
//! browser client.
//!
//! # Endpoints
//!
//! - `GET /ws` - Subscriber WebSocket upgrade
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (upstream streaming)
//! - `GET /metrics` - Prometheus metrics in text format
//! - anything else - static files from the configured directory
//!
//! CORS is permissive so a page served from another origin can connect.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::{
    Json, Router, extract::State, http::StatusCode, response::IntoResponse, response::Response,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::application::ports::SharedSinkRegistry;
use crate::infrastructure::binance::{SessionSnapshot, SessionState, SessionStatus};
use crate::infrastructure::broadcast::{BroadcastStats, BroadcastStatsSnapshot};
use crate::infrastructure::downstream;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Upstream session status.
    pub upstream: SessionSnapshot,
    /// Downstream subscriber counts.
    pub subscribers: SubscriberStatus,
    /// Broadcast engine counters.
    pub broadcast: BroadcastStatsSnapshot,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Upstream is streaming.
    Healthy,
    /// Upstream is connecting or waiting for its first event.
    Degraded,
    /// Upstream is down.
    Unhealthy,
}

/// Downstream subscriber counts.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SubscriberStatus {
    /// Currently registered.
    pub active: usize,
    /// Registered since startup.
    pub total_connected: u64,
    /// Removed since startup.
    pub total_disconnected: u64,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP handlers.
pub struct AppState {
    version: String,
    started_at: Instant,
    registry: SharedSinkRegistry,
    session: Arc<SessionStatus>,
    broadcast: Arc<BroadcastStats>,
}

impl AppState {
    /// Create new server state.
    #[must_use]
    pub fn new(
        version: String,
        registry: SharedSinkRegistry,
        session: Arc<SessionStatus>,
        broadcast: Arc<BroadcastStats>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            session,
            broadcast,
        }
    }
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Build the application router.
///
/// Without a static directory, unknown paths return 404.
pub fn router(state: Arc<AppState>, static_dir: Option<PathBuf>) -> Router {
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler));

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(CorsLayer::permissive()).with_state(state)
}

/// HTTP server for the relay.
pub struct HttpServer {
    port: u16,
    static_dir: Option<PathBuf>,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new HTTP server.
    #[must_use]
    pub const fn new(
        port: u16,
        static_dir: Option<PathBuf>,
        state: Arc<AppState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            static_dir,
            state,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, static_dir = ?self.static_dir, "HTTP server listening");

        serve(listener, router(self.state, self.static_dir), self.cancel).await
    }
}

/// Serve `app` on an already bound listener until `cancel` fires.
///
/// # Errors
///
/// Returns `HttpServerError::ServerFailed` if the server stops with an error.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
) -> Result<(), HttpServerError> {
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let registry = Arc::clone(&state.registry);
    ws.on_upgrade(move |socket| downstream::handle_socket(socket, registry))
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.session.is_streaming() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let upstream = state.session.snapshot();
    let registry = state.registry.stats();

    HealthResponse {
        status: determine_health_status(upstream.state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        upstream,
        subscribers: SubscriberStatus {
            active: registry.active,
            total_connected: registry.total_registered,
            total_disconnected: registry.total_unregistered,
        },
        broadcast: state.broadcast.snapshot(),
    }
}

const fn determine_health_status(state: SessionState) -> HealthStatus {
    match state {
        SessionState::Streaming => HealthStatus::Healthy,
        SessionState::Connecting | SessionState::Subscribed => HealthStatus::Degraded,
        SessionState::Disconnected | SessionState::Closing | SessionState::Closed => {
            HealthStatus::Unhealthy
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use test_case::test_case;
    use tower::ServiceExt;

    use super::*;
    use crate::application::ports::SinkRegistry;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(
            "0.1.0-test".to_string(),
            Arc::new(SinkRegistry::new()),
            Arc::new(SessionStatus::new()),
            Arc::new(BroadcastStats::default()),
        ))
    }

    async fn get_path(app: Router, path: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test_case(SessionState::Streaming, HealthStatus::Healthy ; "streaming")]
    #[test_case(SessionState::Subscribed, HealthStatus::Degraded ; "subscribed")]
    #[test_case(SessionState::Connecting, HealthStatus::Degraded ; "connecting")]
    #[test_case(SessionState::Closed, HealthStatus::Unhealthy ; "closed")]
    #[test_case(SessionState::Disconnected, HealthStatus::Unhealthy ; "disconnected")]
    fn health_follows_session_state(state: SessionState, expected: HealthStatus) {
        assert_eq!(determine_health_status(state), expected);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (status, body) = get_path(router(state(), None), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn readiness_tracks_streaming() {
        let state = state();

        let (status, _) = get_path(router(Arc::clone(&state), None), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        state.session.set_state(SessionState::Subscribed);
        state.session.set_state(SessionState::Streaming);
        let (status, body) = get_path(router(state, None), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");
    }

    #[tokio::test]
    async fn health_reports_upstream_and_subscribers() {
        let state = state();
        state.session.set_state(SessionState::Subscribed);
        state.session.set_state(SessionState::Streaming);

        let (status, body) = get_path(router(state, None), "/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "0.1.0-test");
        assert_eq!(json["upstream"]["state"], "streaming");
        assert_eq!(json["subscribers"]["active"], 0);
        assert_eq!(json["broadcast"]["frames_dispatched"], 0);
    }

    #[tokio::test]
    async fn unknown_path_without_static_dir_is_not_found() {
        let (status, _) = get_path(router(state(), None), "/index.html").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_dir_serves_browser_client() {
        let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("static");
        let (status, body) = get_path(router(state(), Some(dir)), "/index.html").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("/ws"));
    }

    #[tokio::test]
    async fn ws_without_upgrade_is_rejected() {
        let (status, _) = get_path(router(state(), None), "/ws").await;
        assert!(status.is_client_error());
    }
}
