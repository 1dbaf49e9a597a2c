//! Coordination core error types.

use thiserror::Error;

/// Errors that can occur on the job coordination path.
///
/// User work failures are deliberately absent here: they are absorbed
/// inside the fire path and surface only through the run-log hook and the
/// retry processor.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("job not registered: {0}")]
    NotRegistered(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("registry error: {0}")]
    Registry(#[from] cronmesh_registry::RegistryError),

    #[error("trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("config merge hook failed for {job}: {reason}")]
    ConfigMerge { job: String, reason: String },
}

pub type JobResult<T> = Result<T, JobError>;

/// Errors surfaced by the external trigger scheduler.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid cron expression `{expr}`: {reason}")]
    BadCron { expr: String, reason: String },

    #[error("trigger not found: {0}")]
    NotFound(String),

    #[error("trigger scheduler error: {0}")]
    Scheduler(String),
}

pub type TriggerResult<T> = Result<T, TriggerError>;
