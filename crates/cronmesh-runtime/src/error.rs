//! Runtime error types.

use cronmesh_job::{JobError, TriggerError};
use cronmesh_registry::RegistryError;
use thiserror::Error;

/// Fatal startup and shutdown errors of the job engine.
///
/// Everything here prevents or aborts bootstrap; once an engine is
/// running, job failures stay inside the coordination core and never
/// surface through this type.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job group name must not be blank")]
    BlankGroup,

    #[error("duplicate job name: {0}")]
    DuplicateJob(String),

    #[error("config file unreadable: {0}")]
    ConfigRead(#[from] std::io::Error),

    #[error("config file invalid: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("job startup error: {0}")]
    Job(#[from] JobError),

    #[error("trigger error: {0}")]
    Trigger(#[from] TriggerError),
}

pub type EngineResult<T> = Result<T, EngineError>;
