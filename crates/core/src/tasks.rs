//! Lifecycle of a component's background tasks
//!
//! Every task observes one [`CancellationToken`]; `shutdown` cancels it and
//! waits for the tasks with a bounded timeout.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vigil_domain::{Result, VigilError};

/// A named group of spawned tasks sharing one cancellation token
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    cancel: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by every task in the group
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a task built from the group's token
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.cancel.clone()));
        debug!(task = name, "Background task spawned");
        self.handles.push((name, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every task and wait up to `timeout` for all of them
    pub async fn shutdown(self, timeout: Duration) -> Result<()> {
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut first_error = None;

        for (name, handle) in self.handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => debug!(task = name, "Background task stopped"),
                Ok(Err(e)) => {
                    warn!(task = name, error = %e, "Background task ended abnormally");
                    first_error
                        .get_or_insert_with(|| VigilError::Internal(format!("Task {} failed: {}", name, e)));
                }
                Err(_) => {
                    warn!(task = name, ?timeout, "Background task did not stop in time");
                    first_error.get_or_insert_with(|| {
                        VigilError::timeout(format!("{} shutdown", name), timeout)
                    });
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_shutdown_cancels_tasks() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = stopped.clone();

        let mut tasks = BackgroundTasks::new();
        tasks.spawn("waiter", |cancel| async move {
            cancel.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(tasks.len(), 1);

        tasks.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(stopped.load(Ordering::SeqCst));
    }

    /// Validates shutdown is bounded when a task ignores cancellation.
    #[tokio::test(start_paused = true)]
    async fn test_shutdown_times_out() {
        let mut tasks = BackgroundTasks::new();
        tasks.spawn("stubborn", |_cancel| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let err = tasks.shutdown(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, VigilError::Timeout { .. }));
    }
}
