//! Repeating sync tasks and their supervisor
//!
//! Each extractor and the aggregator run as an independent tokio task:
//! one cycle, then a fixed sleep, forever. The first fatal cycle error
//! cancels every sibling and is handed back to `main`, which exits so an
//! external process supervisor can restart from the cached watermarks.

use super::error::SyncError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

/// A unit of work run on a fixed interval
#[async_trait]
pub trait SyncTask: Send + Sync {
    fn name(&self) -> &str;

    /// One full cycle; an error is fatal for the task
    async fn run_cycle(&self) -> Result<(), SyncError>;
}

/// Run `task` every `interval` until cancelled or a cycle fails
///
/// Cancellation is observed before each cycle and while sleeping, never
/// in the middle of a cycle.
pub async fn run_repeating(
    task: Arc<dyn SyncTask>,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<(), SyncError> {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        if let Err(e) = task.run_cycle().await {
            log::error!("❌ {}: sync cycle failed: {}", task.name(), e);
            return Err(e);
        }

        log::info!("{}: Sleeping for {}s", task.name(), interval.as_secs());
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }

    log::info!("{}: stopped", task.name());
    Ok(())
}

/// Owns every running sync task and fails fast on the first error
pub struct Supervisor {
    tasks: JoinSet<(String, Result<(), SyncError>)>,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn spawn(&mut self, task: Arc<dyn SyncTask>, interval: Duration) {
        let name = task.name().to_string();
        let cancel = self.cancel.child_token();
        log::info!("   ├─ Spawning {} (every {}s)", name, interval.as_secs());

        self.tasks.spawn(async move {
            let result = run_repeating(task, interval, cancel).await;
            (name, result)
        });
    }

    /// Token that stops every task at its next cancellation point
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for all tasks; the first failure cancels the rest and is returned
    pub async fn wait(mut self) -> Result<(), SyncError> {
        let mut first_error = None;

        while let Some(joined) = self.tasks.join_next().await {
            let failure = match joined {
                Ok((_, Ok(()))) => None,
                Ok((name, Err(e))) => {
                    log::error!("❌ {} stopped with a fatal error", name);
                    Some(e)
                }
                Err(join_error) => {
                    log::error!("❌ sync task panicked: {}", join_error);
                    Some(SyncError::TaskFailed(join_error.to_string()))
                }
            };

            if let Some(e) = failure {
                if first_error.is_none() {
                    self.cancel.cancel();
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts cycles; fails on cycle number `fail_on` when set
    struct CountingTask {
        name: String,
        cycles: AtomicUsize,
        fail_on: Option<usize>,
    }

    impl CountingTask {
        fn new(name: &str, fail_on: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                cycles: AtomicUsize::new(0),
                fail_on,
            })
        }
    }

    #[async_trait]
    impl SyncTask for CountingTask {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run_cycle(&self) -> Result<(), SyncError> {
            let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on == Some(cycle) {
                return Err(SyncError::InsertCountMismatch {
                    source_name: self.name.clone(),
                    expected: 2,
                    inserted: 1,
                });
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeats_on_interval_until_cancelled() {
        let task = CountingTask::new("relay", None);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_repeating(task.clone(), Duration::from_secs(30), cancel.clone()));

        sleep(Duration::from_secs(95)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        // Cycles at t=0, 30, 60, 90
        assert_eq!(task.cycles.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let task = CountingTask::new("relay", None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_repeating(task.clone(), Duration::from_secs(30), cancel).await.unwrap();
        assert_eq!(task.cycles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_error_propagates() {
        let task = CountingTask::new("relay", Some(2));
        let result = run_repeating(task.clone(), Duration::from_secs(30), CancellationToken::new()).await;

        assert!(matches!(result, Err(SyncError::InsertCountMismatch { .. })));
        assert_eq!(task.cycles.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_fails_fast_and_cancels_siblings() {
        let healthy = CountingTask::new("healthy", None);
        let failing = CountingTask::new("failing", Some(3));

        let mut supervisor = Supervisor::new();
        supervisor.spawn(healthy.clone(), Duration::from_secs(30));
        supervisor.spawn(failing.clone(), Duration::from_secs(30));

        let result = supervisor.wait().await;

        assert!(matches!(result, Err(SyncError::InsertCountMismatch { .. })));
        assert_eq!(failing.cycles.load(Ordering::SeqCst), 3);
        // Healthy task was stopped while sleeping instead of running forever
        assert!(healthy.cycles.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_clean_shutdown() {
        let task = CountingTask::new("relay", None);
        let mut supervisor = Supervisor::new();
        supervisor.spawn(task.clone(), Duration::from_secs(30));

        let cancel = supervisor.cancellation_token();
        tokio::spawn(async move {
            sleep(Duration::from_secs(45)).await;
            cancel.cancel();
        });

        supervisor.wait().await.unwrap();
        assert_eq!(task.cycles.load(Ordering::SeqCst), 2);
    }
}
