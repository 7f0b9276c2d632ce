//! Token verification and issuance.

use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;

use crate::errors::AuthError;
use crate::types::{Claims, Identity};

/// Turns a bearer token into an [`Identity`].
///
/// Implementations must be side-effect free and cheap; the gateway calls
/// them inline while processing a connection's frames.
pub trait TokenVerifier: Send + Sync {
    /// Validate `token` and extract the identity it carries.
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// HS256 JWT verifier keyed by a shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for tokens signed with `secret`.
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            debug!(error = %e, "token rejected");
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;

        if data.claims.user_id.is_empty() {
            return Err(AuthError::Invalid("empty userId claim".into()));
        }
        Ok(data.claims.into())
    }
}

/// Sign an HS256 token for `identity` that expires after `ttl`.
pub fn issue_token(secret: &[u8], identity: &Identity, ttl: Duration) -> Result<String, AuthError> {
    let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
    let claims = Claims {
        user_id: identity.user_id.clone(),
        username: identity.username.clone(),
        role: identity.role.clone(),
        exp: now + ttl.as_secs(),
        iat: Some(now),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(AuthError::Encode)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
