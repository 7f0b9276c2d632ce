//! # eqnotify-settings
//!
//! Configuration for the notification gateway, loaded from three layers
//! (in priority order):
//! 1. **Compiled defaults**: [`NotifySettings::default()`]
//! 2. **Settings file**: optional JSON file, deep-merged over defaults
//! 3. **Environment variables**: `WEBSOCKET_PORT`, `JWT_SECRET`, `NODE_ENV`,
//!    `EQNOTIFY_*` overrides
//!
//! CLI flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, validate};
pub use types::*;
