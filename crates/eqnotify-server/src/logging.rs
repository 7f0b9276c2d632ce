//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber on stderr.
///
/// Call once at application startup. Subsequent calls are no-ops.
/// `RUST_LOG` wins over `level` when set.
///
/// # Arguments
///
/// * `level` - Default filter directive, e.g. `"info"` or `"eqnotify_server=debug"`.
/// * `json` - Emit one JSON object per line instead of the compact format.
pub fn init_subscriber(level: &str, json: bool) {
    let filter = build_filter(level);

    // try_init is a no-op if a subscriber is already set
    if json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .json()
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .try_init();
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
