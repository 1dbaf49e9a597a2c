//! Persisted domain types for the CronMesh registry.
//!
//! `JobConfig` is the record all coordination revolves around; it is
//! JSON-serialized with camelCase field names so payloads match the wire
//! shape used by existing deployments (`jobName`, `cronExpr`, `isActive`,
//! `isRunning`, `currentNodeId`, `lastFireTime`, `nextFireTime`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a node in a job group's cluster.
pub type NodeId = String;

// ── Job configuration ──────────────────────────────────────────────

/// Per-job coordination record, keyed by `(group, jobName)`.
///
/// Logically owned by the registry (last-writer-wins); every node holds
/// only a stale cached view refreshed by a direct read on each fire.
/// At most one node holds `is_running = true` under the protocol's
/// intended behavior; this is advisory, not enforced by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Job group name; immutable after creation.
    pub group: String,
    /// Job name, unique within the group; immutable after creation.
    pub job_name: String,
    /// Current firing schedule; mutable, hot-reloadable.
    pub cron_expr: String,
    /// When false the job is skipped cluster-wide.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Set by whichever node currently owns execution.
    #[serde(default)]
    pub is_running: bool,
    /// Node that owns the current run, or empty if none.
    #[serde(default)]
    pub current_node_id: NodeId,
    /// When the current/last run began (the owning node's fire time).
    #[serde(default)]
    pub last_fire_time: Option<DateTime<Utc>>,
    /// Next expected fire time, recorded when a run completes.
    #[serde(default)]
    pub next_fire_time: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl JobConfig {
    /// Create a fresh, active, not-running config.
    pub fn new(group: &str, job_name: &str, cron_expr: &str) -> Self {
        Self {
            group: group.to_string(),
            job_name: job_name.to_string(),
            cron_expr: cron_expr.to_string(),
            is_active: true,
            is_running: false,
            current_node_id: String::new(),
            last_fire_time: None,
            next_fire_time: None,
        }
    }

    /// `group/jobName`, for log lines and display.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.group, self.job_name)
    }
}

// ── Group view ─────────────────────────────────────────────────────

/// Read-side aggregate of one job group: its live nodes and jobs.
///
/// Constructed on demand by the cluster monitor; never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobGroupInfo {
    pub name: String,
    /// Node ids with a live membership marker under `{group}/nodes`.
    pub cluster_nodes: Vec<NodeId>,
    /// Every `JobConfig` registered under the group.
    pub jobs: Vec<JobConfig>,
}

// ── Monitor commands ───────────────────────────────────────────────

/// Operational nudge written by the monitor into one node's namespace.
///
/// Delivery is best-effort: the payload lands on exactly one membership
/// key and no acknowledgment is waited for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorCommand {
    pub group: String,
    pub job_name: String,
    pub action: CommandAction,
    pub issued_at: DateTime<Utc>,
}

/// What the addressed node should do with the job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum CommandAction {
    /// Fire the job immediately, outside its schedule.
    TriggerNow,
    /// Hot-reload the job's firing schedule.
    UpdateCron { cron_expr: String },
    /// Enable or disable the job cluster-wide.
    SetActive { active: bool },
}

impl MonitorCommand {
    pub fn new(group: &str, job_name: &str, action: CommandAction) -> Self {
        Self {
            group: group.to_string(),
            job_name: job_name.to_string(),
            action,
            issued_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_config_payload_uses_camel_case_names() {
        let conf = JobConfig::new("demo", "cleanup", "*/5 * * * * *");
        let json = serde_json::to_value(&conf).unwrap();

        assert_eq!(json["jobName"], "cleanup");
        assert_eq!(json["cronExpr"], "*/5 * * * * *");
        assert_eq!(json["isActive"], true);
        assert_eq!(json["isRunning"], false);
        assert_eq!(json["currentNodeId"], "");
        assert!(json["lastFireTime"].is_null());
    }

    #[test]
    fn job_config_defaults_apply_to_sparse_payloads() {
        // Payload written by an operator's hand or an older node.
        let json = r#"{"group":"demo","jobName":"cleanup","cronExpr":"0 0 * * * *"}"#;
        let conf: JobConfig = serde_json::from_str(json).unwrap();

        assert!(conf.is_active);
        assert!(!conf.is_running);
        assert!(conf.current_node_id.is_empty());
        assert!(conf.next_fire_time.is_none());
    }

    #[test]
    fn command_action_round_trips_with_tagged_shape() {
        let cmd = MonitorCommand::new(
            "demo",
            "cleanup",
            CommandAction::UpdateCron {
                cron_expr: "0 */10 * * * *".to_string(),
            },
        );
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["action"]["type"], "update_cron");
        assert_eq!(json["action"]["cronExpr"], "0 */10 * * * *");

        let back: MonitorCommand = serde_json::from_value(json).unwrap();
        assert_eq!(back, cmd);
    }
}
