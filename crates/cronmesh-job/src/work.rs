//! WorkUnit — the user-supplied capability a scheduled job wraps.

use async_trait::async_trait;

use crate::context::JobContext;

/// A unit of recurring work, composed into a `ScheduledJob`.
///
/// `run` is invoked once per fire the coordination layer decides this node
/// owns. Returning an error marks the cycle failed: the error is absorbed,
/// recorded through the run-log hook, and retried if the job carries a
/// retry budget. It never propagates to the trigger scheduler.
#[async_trait]
pub trait WorkUnit: Send + Sync + 'static {
    /// Execute one cycle of the work.
    async fn run(&self, ctx: &JobContext) -> anyhow::Result<()>;

    /// When true, every node runs the job on each fire and the ownership
    /// protocol is bypassed for the skip decision.
    fn parallel(&self) -> bool {
        false
    }
}
