//! RetryProcessor — failure escalation off the firing path.
//!
//! A bounded channel plus one worker task, both created when the context
//! is built. Submitting a failed job queues `(job, remaining budget)`; the
//! worker sleeps out the delay, then re-invokes the job's full execution
//! path with the budget decremented. There is no cancel: once queued, a
//! retry fires unless the context shuts down first.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::context::{ContextInner, JobContext};
use crate::job::ScheduledJob;

/// Delay between a failure and its retry, unless overridden.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Bound on queued retries across all jobs, unless overridden.
pub const DEFAULT_RETRY_CAPACITY: usize = 64;

/// A queued retry: the job handle and how many attempts it has left.
pub(crate) struct RetryTask {
    pub(crate) job: Arc<ScheduledJob>,
    pub(crate) remaining: u32,
}

/// Submission handle to the retry worker. Cheap to clone.
#[derive(Clone)]
pub struct RetryProcessor {
    queue: mpsc::Sender<RetryTask>,
}

impl RetryProcessor {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<RetryTask>) {
        let (queue, rx) = mpsc::channel(capacity);
        (Self { queue }, rx)
    }

    /// Queue a failed job for another attempt.
    ///
    /// Never blocks the firing path: when the queue is full (or the worker
    /// is gone) the retry is dropped with a warning.
    pub fn submit(&self, job: Arc<ScheduledJob>, remaining: u32) {
        let name = job.qualified_name();
        match self.queue.try_send(RetryTask { job, remaining }) {
            Ok(()) => info!(job = %name, remaining, "retry scheduled"),
            Err(e) => warn!(job = %name, error = %e, "dropping retry"),
        }
    }
}

/// Worker loop driving queued retries.
///
/// Holds the context weakly: a dropped context ends the loop instead of
/// being kept alive by its own worker.
pub(crate) async fn run_retry_worker(
    mut queue: mpsc::Receiver<RetryTask>,
    delay: Duration,
    context: Weak<ContextInner>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let task = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            task = queue.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = time::sleep(delay) => {}
        }

        let Some(inner) = context.upgrade() else { break };
        let ctx = JobContext::from_inner(inner);
        let budget = task.remaining.saturating_sub(1);
        if let Err(e) = task.job.execute_attempt(&ctx, budget).await {
            error!(job = %task.job.qualified_name(), error = %e, "retry fire failed");
        }
    }
    debug!("retry worker stopped");
}
