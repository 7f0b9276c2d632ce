//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if a global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused (counter, labels: reason).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Auth attempts (counter, labels: outcome).
pub const WS_AUTH_TOTAL: &str = "ws_auth_total";
/// Relayed notifications (counter, labels: target).
pub const NOTIFICATIONS_RELAYED_TOTAL: &str = "notifications_relayed_total";
/// Outbound frames dropped on full or closed queues (counter).
pub const WS_DELIVERY_DROPS_TOTAL: &str = "ws_delivery_drops_total";
/// Dead connections pruned by the heartbeat sweep (counter).
pub const HEARTBEAT_PRUNED_TOTAL: &str = "heartbeat_pruned_total";
