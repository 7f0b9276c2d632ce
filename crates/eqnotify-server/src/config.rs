//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::websocket::session::SessionConfig;

/// Configuration for the notification server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Per-connection outbound queue length.
    pub outbound_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Close connections still unauthenticated after this many seconds.
    pub auth_timeout_secs: Option<u64>,
    /// Upper bound on draining sessions during shutdown.
    pub shutdown_timeout_secs: u64,
    /// Simulated notification period; `None` disables the simulator.
    pub simulator_interval_secs: Option<u64>,
}

impl ServerConfig {
    /// Heartbeat period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Shutdown drain budget.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Knobs handed to every session.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            outbound_queue_capacity: self.outbound_queue_capacity,
            auth_timeout: self.auth_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 10_000,
            heartbeat_interval_secs: 30,
            outbound_queue_capacity: 256,
            max_message_size: 1024 * 1024, // 1 MiB
            auth_timeout_secs: None,
            shutdown_timeout_secs: 10,
            simulator_interval_secs: None,
        }
    }
}
