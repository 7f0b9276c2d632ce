//! # eqnotify-auth
//!
//! Bearer token verification for the notification gateway.
//!
//! The admin application signs HS256 JWTs carrying the user's id, username
//! and role. The gateway only needs to turn such a token back into an
//! [`Identity`]; it never talks to the user database.
//!
//! - [`TokenVerifier`]: the seam the gateway consumes
//! - [`JwtVerifier`]: HS256 implementation backed by `jsonwebtoken`
//! - [`issue_token`]: mints tokens with the same claims (dev tooling, tests)

#![deny(unsafe_code)]

pub mod errors;
pub mod types;
pub mod verifier;

pub use errors::AuthError;
pub use types::{Claims, Identity};
pub use verifier::{JwtVerifier, TokenVerifier, issue_token};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
