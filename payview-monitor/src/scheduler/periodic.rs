//! Generic periodic task runner
//!
//! Each registered task gets its own interval loop. Firing is
//! at-least-once and roughly on schedule: a tick missed while a run is
//! still in progress is skipped, not queued.

use async_trait::async_trait;
use payview_common::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Work run on a fixed interval
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<()>;
}

/// Owns the interval loops of every registered task
pub struct TaskRunner {
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRunner {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Start running `task` every `period`; the first run happens immediately
    pub fn register(&self, period: Duration, task: Arc<dyn PeriodicTask>) {
        let cancel = self.cancel.child_token();

        info!(task = task.name(), period_secs = period.as_secs(), "Registering periodic task");

        let handle = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }

                debug!(task = task.name(), "Running periodic task");
                if let Err(e) = task.run().await {
                    error!(task = task.name(), error = %e, "Periodic task failed");
                }
            }

            debug!(task = task.name(), "Periodic task stopped");
        });

        self.handles.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
    }

    pub fn task_count(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Stop all loops and wait for in-flight runs to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let handles = std::mem::take(&mut *self.handles.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Periodic task ended abnormally");
            }
        }

        info!("Periodic tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTask {
        runs: AtomicU32,
    }

    #[async_trait]
    impl PeriodicTask for CountingTask {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingTask;

    #[async_trait]
    impl PeriodicTask for FailingTask {
        fn name(&self) -> &str {
            "failing"
        }

        async fn run(&self) -> Result<()> {
            Err(payview_common::Error::Internal("boom".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_runs_on_interval() {
        let runner = TaskRunner::new();
        let task = Arc::new(CountingTask { runs: AtomicU32::new(0) });
        runner.register(Duration::from_secs(60), task.clone());

        // Immediate first run, then one per minute
        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 3);

        runner.shutdown().await;
        let after = task.runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), after);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_task_keeps_running() {
        let runner = TaskRunner::new();
        runner.register(Duration::from_secs(10), Arc::new(FailingTask));
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(runner.task_count(), 1);
        runner.shutdown().await;
        assert_eq!(runner.task_count(), 0);
    }
}
