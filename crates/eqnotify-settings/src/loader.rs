//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`NotifySettings::default()`]
//! 2. If a settings file is given, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{Environment, NotifySettings};

/// Load settings, optionally merging a JSON file, then apply env overrides.
///
/// Unlike a missing optional file, an explicitly named file that does not
/// exist is an error.
pub fn load_settings(path: Option<&Path>) -> Result<NotifySettings> {
    let defaults = serde_json::to_value(NotifySettings::default())?;

    let merged = match path {
        Some(path) => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        None => defaults,
    };

    let mut settings: NotifySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut NotifySettings) {
    apply_overrides_from(settings, &|name| std::env::var(name).ok());
}

/// Apply overrides using `lookup` as the variable source.
///
/// Each variable has strict parsing rules; invalid values are logged and
/// ignored (falling back to file/default).
pub fn apply_overrides_from(settings: &mut NotifySettings, lookup: &dyn Fn(&str) -> Option<String>) {
    // ── Names shared with the admin application ─────────────────────
    if let Some(v) = read_u16(lookup, "WEBSOCKET_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_string(lookup, "WEBSOCKET_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_string(lookup, "JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = read_environment(lookup, "NODE_ENV") {
        settings.environment = v;
    }

    // ── Gateway-specific ────────────────────────────────────────────
    if let Some(v) = read_environment(lookup, "EQNOTIFY_ENV") {
        settings.environment = v;
    }
    if let Some(v) = read_usize(lookup, "EQNOTIFY_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = read_u64(lookup, "EQNOTIFY_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = read_u64(lookup, "EQNOTIFY_AUTH_TIMEOUT_SECS", 1, 86_400) {
        settings.server.auth_timeout_secs = Some(v);
    }
    if let Some(v) = read_bool(lookup, "EQNOTIFY_SIMULATE") {
        settings.simulator.enabled = Some(v);
    }
    if let Some(v) = read_string(lookup, "EQNOTIFY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_bool(lookup, "EQNOTIFY_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// Reject settings the gateway cannot run with.
pub fn validate(settings: &NotifySettings) -> Result<()> {
    if settings.auth.jwt_secret.is_empty() {
        return Err(SettingsError::InvalidValue("auth.jwtSecret must not be empty".into()));
    }
    if settings.auth.uses_default_secret() {
        if settings.environment == Environment::Production {
            return Err(SettingsError::InvalidValue(
                "auth.jwtSecret is the built-in default; set JWT_SECRET in production".into(),
            ));
        }
        warn!("using the built-in default JWT secret (development only)");
    }
    if settings.server.heartbeat_interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "server.heartbeatIntervalSecs must be at least 1".into(),
        ));
    }
    if settings.server.outbound_queue_capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "server.outboundQueueCapacity must be at least 1".into(),
        ));
    }
    if settings.server.max_connections == 0 {
        return Err(SettingsError::InvalidValue(
            "server.maxConnections must be at least 1".into(),
        ));
    }
    if settings.simulator.interval_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "simulator.intervalSecs must be at least 1".into(),
        ));
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Variable readers (thin wrappers) ────────────────────────────────────────

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn read_string(lookup: Lookup<'_>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.is_empty())
}

fn read_bool(lookup: Lookup<'_>, name: &str) -> Option<bool> {
    let val = lookup(name)?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_environment(lookup: Lookup<'_>, name: &str) -> Option<Environment> {
    let val = read_string(lookup, name)?;
    let result = Environment::parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "unknown environment name, ignoring");
    }
    result
}

fn read_u16(lookup: Lookup<'_>, name: &str, min: u16, max: u16) -> Option<u16> {
    let val = lookup(name)?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_u64(lookup: Lookup<'_>, name: &str, min: u64, max: u64) -> Option<u64> {
    let val = lookup(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_usize(lookup: Lookup<'_>, name: &str, min: usize, max: usize) -> Option<usize> {
    let val = lookup(name)?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
