//! cronmesh-job — cluster-coordinated job execution.
//!
//! The coordination core: given a registry client (from
//! `cronmesh-registry`) and a trigger scheduler, every job fires on every
//! node, and this crate decides on each fire whether this node actually
//! runs the work. Coordination is lock-free in the distributed sense:
//! no leases, no fencing, only shared job documents plus time heuristics,
//! yielding at-most-one intended execution per cycle.
//!
//! # Architecture
//!
//! ```text
//! JobContext (one per process)
//!   ├── RegistryClient session (ephemeral membership markers)
//!   ├── JobRegistry (job documents, read-modify-write)
//!   ├── TriggerScheduler (fire times, hot-reload)
//!   ├── RetryProcessor (bounded queue + worker task)
//!   └── ScheduledJob* (decision predicate + fire cycle)
//!         └── WorkUnit (the actual work)
//! ```
//!
//! A fire cycle reads the job's document, runs the should-run predicate
//! (parallel / active / catch-up / ownership / abandonment), claims by
//! writing `isRunning` + `currentNodeId`, runs the [`WorkUnit`], then
//! releases and records the next fire time. Failures hand the job to the
//! [`RetryProcessor`] with a decrementing budget.

pub mod context;
pub mod error;
pub mod job;
pub mod retry;
pub mod trigger;
pub mod work;

pub use context::{ConfigMergeHook, JobContext, JobContextBuilder, RunLogHook};
pub use error::{JobError, JobResult, TriggerError, TriggerResult};
pub use job::{FireDecision, RunMode, ScheduledJob, SkipReason};
pub use retry::RetryProcessor;
pub use trigger::{FireTimes, TriggerKey, TriggerScheduler};
pub use work::WorkUnit;
