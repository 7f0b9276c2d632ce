//! Wire format: inbound frame parsing and outbound message shapes.

use std::sync::Arc;

use eqnotify_auth::Identity;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ── Inbound ─────────────────────────────────────────────────────────────────

/// A parsed client frame.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// `{type:"auth", token}`. A missing token is kept as `None` so it can be
    /// reported as an auth failure rather than a protocol error.
    Auth {
        /// Bearer token.
        token: Option<String>,
    },
    /// `{type:"ping"}`.
    Ping,
    /// `{type:"notification", target, data, role?, userId?}`.
    Notification {
        /// Where the relay goes.
        route: Route,
        /// Opaque payload forwarded as-is.
        data: Value,
    },
}

/// Resolved addressing mode of a notification relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    /// Every live connection except the sender.
    All,
    /// Connections authenticated with this role.
    Role(String),
    /// Connections authenticated as this user.
    User(String),
}

impl Route {
    /// Target name as it appears on the wire.
    pub fn target(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Role(_) => "role",
            Self::User(_) => "user",
        }
    }
}

/// Why a frame could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Not JSON, or not a JSON object.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// Object without a string `type`.
    #[error("frame is missing a \"type\" field")]
    MissingType,
    /// `type` is not one of `auth`, `ping`, `notification`.
    #[error("unknown message type: {0}")]
    UnknownType(String),
    /// Known `type` with invalid or missing fields.
    #[error("invalid {kind} frame: {reason}")]
    InvalidField {
        /// Frame type.
        kind: &'static str,
        /// What was wrong.
        reason: String,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum Target {
    All,
    Role,
    User,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationFields {
    target: Target,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    role: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    user_id: Option<String>,
}

/// Parse one text frame.
pub fn parse_frame(text: &str) -> Result<InboundFrame, FrameError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(FrameError::Malformed("frame must be a JSON object".into()));
    }
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingType)?
        .to_owned();

    match kind.as_str() {
        "auth" => Ok(InboundFrame::Auth {
            token: value.get("token").and_then(Value::as_str).map(str::to_owned),
        }),
        "ping" => Ok(InboundFrame::Ping),
        "notification" => parse_notification(value),
        _ => Err(FrameError::UnknownType(kind)),
    }
}

fn parse_notification(value: Value) -> Result<InboundFrame, FrameError> {
    let invalid = |reason: String| FrameError::InvalidField {
        kind: "notification",
        reason,
    };
    let fields: NotificationFields =
        serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?;

    let route = match fields.target {
        Target::All => Route::All,
        Target::Role => Route::Role(
            fields
                .role
                .filter(|r| !r.is_empty())
                .ok_or_else(|| invalid("\"role\" is required when target is \"role\"".into()))?,
        ),
        Target::User => Route::User(
            fields
                .user_id
                .filter(|u| !u.is_empty())
                .ok_or_else(|| invalid("\"userId\" is required when target is \"user\"".into()))?,
        ),
    };
    Ok(InboundFrame::Notification {
        route,
        data: fields.data,
    })
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    Ok(Option::<Repr>::deserialize(deserializer)?.map(|r| match r {
        Repr::Text(s) => s,
        Repr::Signed(n) => n.to_string(),
        Repr::Unsigned(n) => n.to_string(),
    }))
}

// ── Outbound ────────────────────────────────────────────────────────────────

/// Outcome carried by `auth` replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    /// Token accepted.
    Success,
    /// Token rejected.
    Error,
}

/// Server-to-client frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Sent once, first, on accept.
    Connection {
        /// Always `connected`.
        status: String,
        /// Human-readable greeting.
        message: String,
    },
    /// Reply to an `auth` frame.
    Auth {
        /// Outcome.
        status: AuthStatus,
        /// Established identity on success.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<Identity>,
        /// Failure reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Reply to a `ping` frame.
    Pong {
        /// Server time in ms.
        timestamp: i64,
    },
    /// Relayed or server-initiated notification.
    Notification {
        /// Opaque payload.
        data: Value,
        /// Sender username, when the relaying connection is authenticated.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        /// Server time in ms, set on server-initiated notifications.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    /// Periodic liveness probe.
    Heartbeat {
        /// Server time in ms.
        timestamp: i64,
    },
    /// Protocol error report.
    Error {
        /// What went wrong.
        message: String,
    },
}

impl OutboundMessage {
    /// Connection acknowledgment.
    pub fn connected() -> Self {
        Self::Connection {
            status: "connected".into(),
            message: "WebSocket connection established".into(),
        }
    }

    /// Successful `auth` reply.
    pub fn auth_success(identity: Identity) -> Self {
        Self::Auth {
            status: AuthStatus::Success,
            user: Some(identity),
            message: None,
        }
    }

    /// Failed `auth` reply.
    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::Auth {
            status: AuthStatus::Error,
            user: None,
            message: Some(message.into()),
        }
    }

    /// `pong` stamped with the current time.
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: now_millis(),
        }
    }

    /// Relayed notification.
    pub fn notification(data: Value, from: Option<String>) -> Self {
        Self::Notification {
            data,
            from,
            timestamp: None,
        }
    }

    /// Server-initiated notification stamped with the current time.
    pub fn system_notification(data: Value) -> Self {
        Self::Notification {
            data,
            from: None,
            timestamp: Some(now_millis()),
        }
    }

    /// `heartbeat` stamped with the current time.
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: now_millis(),
        }
    }

    /// `error` frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Auth { .. } => "auth",
            Self::Pong { .. } => "pong",
            Self::Notification { .. } => "notification",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize once for fan-out.
    pub fn encode(&self) -> Result<Arc<String>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::new)
    }
}
