//! Identity and JWT claim types.

use serde::{Deserialize, Deserializer, Serialize};

/// The `{userId, username, role}` triple established by a successful `auth`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Admin-application user id.
    pub user_id: String,
    /// Login name, stamped as `from` on relayed notifications.
    pub username: String,
    /// Role name used for role-targeted delivery (e.g. `ADMIN`, `OPERATOR`).
    pub role: String,
}

impl Identity {
    /// Build an identity from its parts.
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            role: role.into(),
        }
    }
}

/// JWT payload signed by the admin application.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// User id. Accepted as a JSON string or number.
    #[serde(deserialize_with = "string_or_number")]
    pub user_id: String,
    /// Login name.
    pub username: String,
    /// Role name.
    pub role: String,
    /// Expiry (seconds since the Unix epoch).
    pub exp: u64,
    /// Issued-at (seconds since the Unix epoch).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            username: claims.username,
            role: claims.role,
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
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

    Ok(match Repr::deserialize(deserializer)? {
        Repr::Text(s) => s,
        Repr::Signed(n) => n.to_string(),
        Repr::Unsigned(n) => n.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
