//! cronmesh-runtime — concrete trigger scheduler and node bootstrap.
//!
//! Everything the coordination core (`cronmesh-job`) treats as external
//! lives here: a cron-driven [`CronTriggerScheduler`] (one tokio task per
//! trigger) implementing the core's `TriggerScheduler` contract, the
//! [`JobEngine`] that boots a node (membership, job registration, trigger
//! wiring, readiness, graceful shutdown), and the TOML-loadable
//! [`NodeConfig`].
//!
//! # Architecture
//!
//! ```text
//! JobEngine::builder(config, registry client)
//!   ├── JobContext (from cronmesh-job)
//!   ├── CronTriggerScheduler
//!   │     └── trigger task per job: sleep → fire → job.execute(ctx)
//!   └── post-init task (after_initialized, execute-on-started fires)
//! ```

pub mod config;
pub mod cron_scheduler;
pub mod engine;
pub mod error;

pub use config::{NodeConfig, RetryConfig};
pub use cron_scheduler::{CronTriggerScheduler, FireCallback};
pub use engine::{JobEngine, JobEngineBuilder};
pub use error::{EngineError, EngineResult};
