//! `NotifyServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use eqnotify_auth::TokenVerifier;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::simulator::run_simulator;
use crate::websocket::delivery::Delivery;
use crate::websocket::handler::NotifyContext;
use crate::websocket::heartbeat::run_heartbeat;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{SessionConfig, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registry, delivery and verifier.
    pub ctx: NotifyContext,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Knobs handed to each session.
    pub session: SessionConfig,
    /// Upgrades are refused at this many registered connections.
    pub max_connections: usize,
    /// Largest accepted inbound frame.
    pub max_message_size: usize,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The notification gateway server.
pub struct NotifyServer {
    config: ServerConfig,
    ctx: NotifyContext,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl NotifyServer {
    /// Create a new server around a token verifier.
    pub fn new(config: ServerConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            config,
            ctx: NotifyContext::new(verifier),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from this handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            shutdown: self.shutdown.clone(),
            session: self.config.session(),
            max_connections: self.config.max_connections,
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Bind the listener and spawn the server, heartbeat and simulator.
    ///
    /// Returns the bound address and the listener task, which finishes once
    /// shutdown has been initiated and in-flight HTTP requests are done.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let _heartbeat = tokio::spawn(self.shutdown.track(run_heartbeat(
            self.ctx.registry.clone(),
            self.config.heartbeat_interval(),
            self.shutdown.token(),
        )));

        if let Some(secs) = self.config.simulator_interval_secs {
            let _simulator = tokio::spawn(self.shutdown.track(run_simulator(
                self.delivery(),
                Duration::from_secs(secs),
                self.shutdown.token(),
            )));
        }

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });

        info!(%local_addr, "notification server listening");
        Ok((local_addr, handle))
    }

    /// Two-phase graceful shutdown.
    ///
    /// 1. Cancel: the listener stops accepting, every session closes its
    ///    socket with 1001, heartbeat and simulator stop
    /// 2. Drain: wait for sessions up to `shutdown_timeout_secs`, then clear
    ///    whatever is still registered
    ///
    /// Returns `false` if the drain timed out.
    pub async fn stop(&self) -> bool {
        info!(
            connections = self.ctx.registry.len(),
            "shutting down notification server"
        );
        let drained = self.shutdown.drain(Some(self.config.shutdown_timeout())).await;
        let leftover = self.ctx.registry.clear();
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "connections still registered after drain");
        }
        info!(drained, "notification server stopped");
        drained
    }

    /// Cloneable delivery handle for external triggers.
    pub fn delivery(&self) -> Delivery {
        self.ctx.delivery.clone()
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.ctx.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        counter!(WS_REJECTED_TOTAL, "reason" => "shutting_down").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }
    let live = state.ctx.registry.len();
    if live >= state.max_connections {
        counter!(WS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        warn!(live, max = state.max_connections, "connection refused, at capacity");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    let AppState {
        ctx,
        shutdown,
        session,
        max_message_size,
        ..
    } = state;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| {
            shutdown.track(run_ws_session(socket, ctx, session, shutdown.token()))
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = &state.ctx.registry;
    Json(health::health_check(
        state.start_time,
        registry.len(),
        registry.authenticated_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
