//! Graceful shutdown coordination via `CancellationToken`.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

/// Default timeout for draining sessions before giving up.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates graceful shutdown across the listener, sessions and timers.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wrap a future so `drain` waits for it.
    pub fn track<F: Future>(&self, future: F) -> TrackedFuture<F> {
        self.tracker.track_future(future)
    }

    /// Number of tracked futures still running.
    pub fn tracked(&self) -> usize {
        self.tracker.len()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel everything and wait for tracked futures to finish.
    ///
    /// 1. Cancel the shutdown token (signals all sessions and timers)
    /// 2. Wait up to `timeout` for every tracked future to complete
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn drain(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let _ = self.tracker.close();
        info!(
            task_count = self.tracker.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for sessions to complete"
        );

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(remaining = self.tracker.len(), "shutdown timed out after {timeout:?}");
            false
        } else {
            true
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
