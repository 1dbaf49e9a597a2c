//! cronmesh-monitor — read-side cluster visibility for CronMesh.
//!
//! Aggregates the coordination registry into per-group snapshots
//! ([`cronmesh_registry::JobGroupInfo`]) and publishes control commands
//! ([`cronmesh_registry::MonitorCommand`]) to live nodes. A monitor is a
//! plain registry client: it shares no process state with the nodes it
//! observes and can run anywhere the registry is reachable.
//!
//! # Architecture
//!
//! ```text
//! ClusterMonitor
//!   ├── get_all_job_groups() → groups with live nodes, their jobs
//!   └── publish_event(cmd)   → command onto one node's membership key
//! ```

pub mod monitor;

pub use monitor::ClusterMonitor;
