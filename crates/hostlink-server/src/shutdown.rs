//! Graceful shutdown coordination via `CancellationToken`.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default time allowed for session tasks to wind down.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the server-wide cancellation token and tracks every session task so
/// shutdown can wait for them.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the token. Session loops select on `cancelled()`.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a task that shutdown will wait for.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task)
    }

    pub fn tracked_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then wait up to `timeout` for tracked tasks.
    /// Returns `false` if some were still running when time ran out.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        self.tasks.close();
        info!(
            task_count = self.tasks.len(),
            timeout_ms = timeout.as_millis() as u64,
            "waiting for session tasks"
        );

        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!(remaining = self.tasks.len(), "shutdown timed out after {timeout:?}");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        assert_eq!(coord.tracked_tasks(), 0);
    }

    #[test]
    fn shutdown_is_idempotent_and_reaches_all_tokens() {
        let coord = ShutdownCoordinator::new();
        let t1 = coord.token();
        let t2 = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(t1.is_cancelled());
        assert!(t2.is_cancelled());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let _ = coord.spawn(async move {
            token.cancelled().await;
        });
        assert_eq!(coord.tracked_tasks(), 1);

        assert!(coord.graceful_shutdown(None).await);
        assert_eq!(coord.tracked_tasks(), 0);
    }

    #[tokio::test]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        let _ = coord.spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        let drained = coord
            .graceful_shutdown(Some(Duration::from_millis(50)))
            .await;
        assert!(!drained);
        assert!(coord.is_shutting_down());
    }
}
