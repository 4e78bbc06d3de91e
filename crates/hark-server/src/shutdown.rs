//! Coordinated shutdown for the listener and its connection tasks.
//!
//! A single [`CancellationToken`] fans out to the accept loop and every
//! per-connection task. [`ShutdownCoordinator::graceful_shutdown`] cancels the
//! token and then waits for the tasks to drain, up to a grace period, so
//! in-flight utterances get a chance to flush their final results before the
//! process exits.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period applied when the caller does not supply one.
const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// Owns the cancellation token that every server task watches.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Creates a coordinator with a fresh, untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a token handle for a task to select on.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signals shutdown to every task holding a token. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels the token and waits for `tasks` to finish.
    ///
    /// Tasks still running after the grace period are left to be dropped with
    /// the runtime; a warning records how many were abandoned.
    pub async fn graceful_shutdown(&self, tasks: Vec<JoinHandle<()>>, grace: Option<Duration>) {
        let grace = grace.unwrap_or(DEFAULT_GRACE);
        self.shutdown();

        if tasks.is_empty() {
            info!("shutdown complete, no tasks to drain");
            return;
        }

        let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        info!(tasks = tasks.len(), grace_ms, "draining connection tasks");

        let task_count = tasks.len();
        match tokio::time::timeout(grace, join_all(tasks)).await {
            Ok(results) => {
                let panicked = results.iter().filter(|r| r.is_err()).count();
                if panicked > 0 {
                    warn!(panicked, "connection tasks ended abnormally during drain");
                } else {
                    info!("all connection tasks drained");
                }
            }
            Err(_) => {
                warn!(
                    tasks = task_count,
                    grace_ms,
                    "grace period expired with connection tasks still running"
                );
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
