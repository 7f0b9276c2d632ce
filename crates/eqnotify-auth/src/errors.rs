//! Auth error types.

/// Errors that can occur while verifying or issuing tokens.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The frame carried no token (or an empty one).
    #[error("missing token")]
    MissingToken,

    /// The token signature was valid but its `exp` claim is in the past.
    #[error("token expired")]
    Expired,

    /// Bad signature, wrong algorithm, malformed claims, or garbage input.
    #[error("invalid token: {0}")]
    Invalid(String),

    /// Signing a new token failed.
    #[error("failed to sign token: {0}")]
    Encode(#[source] jsonwebtoken::errors::Error),
}

impl AuthError {
    /// Short machine-friendly label, used as a metrics/log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing",
            Self::Expired => "expired",
            Self::Invalid(_) => "invalid",
            Self::Encode(_) => "encode",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_display() {
        assert_eq!(AuthError::MissingToken.to_string(), "missing token");
    }

    #[test]
    fn invalid_display_includes_reason() {
        let err = AuthError::Invalid("InvalidSignature".to_string());
        assert_eq!(err.to_string(), "invalid token: InvalidSignature");
    }

    #[test]
    fn kinds_are_distinct() {
        assert_eq!(AuthError::MissingToken.kind(), "missing");
        assert_eq!(AuthError::Expired.kind(), "expired");
        assert_eq!(AuthError::Invalid(String::new()).kind(), "invalid");
    }
}
