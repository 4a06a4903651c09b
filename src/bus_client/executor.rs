use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::error;

enum Job {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// The executor that runs user-supplied message handlers and connection
/// state listeners.
///
/// A single worker task drains jobs in submission order, which preserves
/// per-subscription delivery order. Handlers never run on the network I/O
/// tasks and never while the engine lock is held. A panicking handler is
/// caught at this boundary and logged; it cannot poison the engine.
#[derive(Clone)]
pub struct CallbackExecutor {
    tx: UnboundedSender<Job>,
}

impl CallbackExecutor {
    /// Spawn a new single-worker executor on the given runtime.
    pub fn new(runtime: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Run(work) => {
                        if catch_unwind(AssertUnwindSafe(work)).is_err() {
                            error!("callback handler panicked");
                        }
                    }
                    Job::Shutdown => break,
                }
            }
        });
        CallbackExecutor { tx }
    }

    /// Submit a unit of work. Silently dropped after shutdown.
    pub fn submit(&self, work: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Job::Run(Box::new(work)));
    }

    /// Drain already-submitted jobs, then stop the worker.
    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Job::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let executor = CallbackExecutor::new(&Handle::current());
        let (tx, rx) = std_mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            executor.submit(move || {
                let _ = tx.send(i);
            });
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let seen: Vec<i32> = rx.try_iter().collect();
        assert_eq!(seen, (0..10).collect::<Vec<i32>>());
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_worker() {
        let executor = CallbackExecutor::new(&Handle::current());
        let (tx, rx) = std_mpsc::channel();
        executor.submit(|| panic!("boom"));
        executor.submit(move || {
            let _ = tx.send(());
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_jobs() {
        let executor = CallbackExecutor::new(&Handle::current());
        let (tx, rx) = std_mpsc::channel();
        executor.submit(move || {
            let _ = tx.send(());
        });
        executor.shutdown();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_ok());
    }
}
