//! Settings types.

use serde::{Deserialize, Serialize};

/// Secret the admin application falls back to when `JWT_SECRET` is unset.
///
/// Kept identical so development tokens interoperate; refused in production.
pub const DEFAULT_JWT_SECRET: &str = "default-secret";

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifySettings {
    /// Deployment environment.
    pub environment: Environment,
    /// Listener and connection handling.
    pub server: ServerSettings,
    /// Token verification.
    pub auth: AuthSettings,
    /// Development-only simulated system notifications.
    pub simulator: SimulatorSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl NotifySettings {
    /// Whether the notification simulator should run.
    ///
    /// An explicit `simulator.enabled` wins; otherwise it runs only in
    /// development.
    pub fn simulator_enabled(&self) -> bool {
        self.simulator
            .enabled
            .unwrap_or(self.environment == Environment::Development)
    }
}

/// Deployment environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development: default secret tolerated, simulator on.
    Development,
    /// Anything deployed.
    #[default]
    Production,
}

impl Environment {
    /// Parse `NODE_ENV`-style values (`development`, `dev`, `production`, `prod`).
    pub fn parse(val: &str) -> Option<Self> {
        match val.trim().to_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

/// Listener and connection handling settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// Upgrades beyond this many live connections are refused.
    pub max_connections: usize,
    /// Period of the heartbeat sweep in seconds.
    pub heartbeat_interval_secs: u64,
    /// Per-connection outbound queue length.
    pub outbound_queue_capacity: usize,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// Close connections that have not authenticated within this many seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_timeout_secs: Option<u64>,
    /// Upper bound on draining sessions during shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            max_connections: 10_000,
            heartbeat_interval_secs: 30,
            outbound_queue_capacity: 256,
            max_message_size: 1024 * 1024,
            auth_timeout_secs: None,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Token verification settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 signing secret shared with the admin application.
    pub jwt_secret: String,
    /// Lifetime of tokens minted by `issue-token`.
    pub token_ttl_secs: u64,
}

impl AuthSettings {
    /// Whether the secret is still the well-known fallback.
    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            token_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &"<redacted>")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

/// Simulated system notification settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimulatorSettings {
    /// Force the simulator on or off; unset follows the environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Seconds between simulated notifications.
    pub interval_secs: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            enabled: None,
            interval_secs: 60,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact human format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
