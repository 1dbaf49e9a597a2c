//! Cluster monitor — aggregates registry state into group views.
//!
//! Strictly a read-side collaborator plus one narrow write: publishing a
//! control command into a single node's membership key. It never touches
//! job state documents and takes no part in the ownership protocol.

use std::sync::Arc;

use cronmesh_registry::client::{read_json, write_json};
use cronmesh_registry::paths::{self, DEFAULT_ROOT, NODES_DIR};
use cronmesh_registry::{
    JobConfig, JobGroupInfo, MonitorCommand, NodeId, RegistryClient, RegistryError, RegistryResult,
};
use tracing::{debug, info, warn};

/// Read-side view over a coordination registry.
pub struct ClusterMonitor {
    client: Arc<dyn RegistryClient>,
    root: String,
}

impl ClusterMonitor {
    /// Monitor rooted at the default coordination prefix.
    pub fn new(client: Arc<dyn RegistryClient>) -> Self {
        Self {
            client,
            root: DEFAULT_ROOT.to_string(),
        }
    }

    /// Override the coordination root.
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Snapshot every job group that has at least one live node.
    ///
    /// Groups whose membership directory is empty or missing are
    /// excluded: nothing would act on their jobs anyway. A registry
    /// with no coordination root yet yields an empty list.
    pub async fn get_all_job_groups(&self) -> RegistryResult<Vec<JobGroupInfo>> {
        let groups = match self.client.get_children(&self.root).await {
            Ok(children) => children,
            Err(RegistryError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut out = Vec::new();
        for group in groups {
            if let Some(info) = self.read_group(&group).await? {
                out.push(info);
            }
        }
        Ok(out)
    }

    async fn read_group(&self, group: &str) -> RegistryResult<Option<JobGroupInfo>> {
        let group_path = paths::group_path(&self.root, group);
        let children = self.client.get_children(&group_path).await?;

        let mut info = JobGroupInfo {
            name: group.to_string(),
            ..JobGroupInfo::default()
        };
        for child in children {
            if child == NODES_DIR {
                let nodes_path = paths::nodes_path(&self.root, group);
                info.cluster_nodes = self.client.get_children(&nodes_path).await?;
                continue;
            }
            let job_path = paths::job_path(&self.root, group, &child);
            match read_json::<JobConfig>(self.client.as_ref(), &job_path).await {
                Ok(Some(conf)) => info.jobs.push(conf),
                Ok(None) => {}
                Err(RegistryError::Payload(_, reason)) => {
                    warn!(%group, job = %child, %reason, "skipping malformed job document");
                }
                Err(e) => return Err(e),
            }
        }

        if info.cluster_nodes.is_empty() {
            debug!(%group, "excluding group with no live nodes");
            return Ok(None);
        }
        Ok(Some(info))
    }

    /// Publish a control command to one node of the addressed group.
    ///
    /// The payload lands on the first membership key (child order is
    /// lexicographic) and no acknowledgment is waited for. Returns the
    /// targeted node id, or `None` when the group has no live node.
    pub async fn publish_event(&self, cmd: &MonitorCommand) -> RegistryResult<Option<NodeId>> {
        let nodes_path = paths::nodes_path(&self.root, &cmd.group);
        let nodes = match self.client.get_children(&nodes_path).await {
            Ok(nodes) => nodes,
            Err(RegistryError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let Some(node_id) = nodes.into_iter().next() else {
            warn!(group = %cmd.group, job = %cmd.job_name, "no live node to receive command");
            return Ok(None);
        };

        let marker = paths::node_path(&self.root, &cmd.group, &node_id);
        write_json(self.client.as_ref(), &marker, cmd).await?;
        info!(group = %cmd.group, job = %cmd.job_name, node = %node_id, "command published");
        Ok(Some(node_id))
    }

    /// Close the monitor's registry session.
    pub async fn close(&self) -> RegistryResult<()> {
        self.client.close().await
    }
}
