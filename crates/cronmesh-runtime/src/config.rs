//! Node configuration file parser.

use std::path::Path;
use std::time::Duration;

use cronmesh_job::retry::{DEFAULT_RETRY_CAPACITY, DEFAULT_RETRY_DELAY};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// Per-process node configuration, loadable from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Job group this node joins.
    pub group: String,
    /// Fixed node identity. Generated per process when absent.
    #[serde(default)]
    pub node_id: Option<String>,
    /// Registry root for all coordination paths. Library default when
    /// absent.
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry worker tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Seconds between a failure and its retry attempt.
    #[serde(default = "default_retry_delay_secs")]
    pub delay_secs: u64,
    /// Bound on the retry queue across all jobs.
    #[serde(default = "default_retry_queue_depth")]
    pub queue_depth: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_retry_delay_secs(),
            queue_depth: default_retry_queue_depth(),
        }
    }
}

fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY.as_secs()
}

fn default_retry_queue_depth() -> usize {
    DEFAULT_RETRY_CAPACITY
}

impl NodeConfig {
    /// Config with library defaults for everything but the group.
    pub fn new(group: &str) -> Self {
        Self {
            group: group.to_string(),
            node_id: None,
            root: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry.delay_secs)
    }
}
