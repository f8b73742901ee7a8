//! Serialized notification queue.
//!
//! Every delegate call, completion callback and `*_filter` hook of an agent
//! runs on one queue, one job at a time, in submission order.

use std::panic::{AssertUnwindSafe, catch_unwind};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

type Job = Box<dyn FnOnce() + Send>;

/// FIFO executor backed by a single spawned task
#[derive(Debug)]
pub struct NotificationQueue {
    sender: mpsc::UnboundedSender<Job>,
}

impl NotificationQueue {
    /// Spawn the drain task on `runtime`
    #[must_use]
    pub fn new(runtime: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();

        runtime.spawn(async move {
            while let Some(job) = receiver.recv().await {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::warn!("Notification job panicked");
                }
            }
        });

        Self { sender }
    }

    /// Queue `job` behind everything already submitted.
    ///
    /// Once the runtime that hosts the drain task has shut down, the job
    /// runs inline on the caller.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        if let Err(rejected) = self.sender.send(Box::new(job)) {
            tracing::warn!("Notification queue closed, running job inline");
            if catch_unwind(AssertUnwindSafe(rejected.0)).is_err() {
                tracing::warn!("Notification job panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let queue = NotificationQueue::new(&Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let seen = Arc::clone(&seen);
            queue.submit(move || seen.lock().push(i));
        }
        let (tx, rx) = oneshot::channel();
        queue.submit(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_queue() {
        let queue = NotificationQueue::new(&Handle::current());
        queue.submit(|| panic!("boom"));
        let (tx, rx) = oneshot::channel();
        queue.submit(move || {
            let _ = tx.send(7);
        });
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[test]
    fn test_submit_after_runtime_shutdown_runs_inline() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let queue = NotificationQueue::new(runtime.handle());
        drop(runtime);
        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        queue.submit(move || *flag.lock() = true);
        assert!(*ran.lock());
    }
}
