//! Server error types.

use thiserror::Error;

/// Errors that can occur while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Other listener I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Could not install the metrics recorder.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}
