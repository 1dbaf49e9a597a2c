//! cronmesh-registry — shared coordination registry for CronMesh.
//!
//! All nodes of a job group agree on job ownership and run state through a
//! hierarchical key-value registry. This crate defines:
//!
//! - The [`RegistryClient`] contract every backend implements
//!   (exists / create / read / write / children, ephemeral keys, close)
//! - Slash-path helpers with `mkdir -p` semantics ([`paths::mkdirp`])
//! - [`EmbeddedRegistry`], a redb-backed registry for single-node
//!   deployments and tests (on-disk or in-memory)
//! - [`JobRegistry`], the job-level read/write helpers the coordination
//!   core drives (register, claim, release, unregister)
//! - The persisted domain types ([`JobConfig`], [`JobGroupInfo`],
//!   [`MonitorCommand`])
//!
//! # Path layout
//!
//! ```text
//! ROOT/{group}/{jobName}        serialized JobConfig
//! ROOT/{group}/nodes/{nodeId}   ephemeral membership marker
//! ```
//!
//! Registry state is eventually consistent and last-writer-wins: clients
//! read before writing, and nothing here is an atomic compare-and-set.
//! The coordination core is designed around that (see cronmesh-job).

pub mod client;
pub mod error;
pub mod jobs;
pub mod paths;
pub mod store;
pub mod types;

pub use client::RegistryClient;
pub use error::{RegistryError, RegistryResult};
pub use jobs::JobRegistry;
pub use store::EmbeddedRegistry;
pub use types::*;
