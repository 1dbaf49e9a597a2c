//! JobRegistry — job-level operations over the raw registry client.
//!
//! Wraps path construction and JSON payload handling so scheduling code
//! works with [`JobConfig`] values instead of byte blobs. All writes are
//! read-modify-write without compare-and-set; last writer wins, and the
//! coordination heuristics upstream tolerate the lost updates.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::client::{RegistryClient, read_json, write_json};
use crate::error::{RegistryError, RegistryResult};
use crate::paths::{self, DEFAULT_ROOT};
use crate::types::JobConfig;

/// Job-level read/write helpers rooted at a registry prefix.
#[derive(Clone)]
pub struct JobRegistry {
    client: Arc<dyn RegistryClient>,
    root: String,
}

impl JobRegistry {
    /// Wrap a client using the default coordination root.
    pub fn new(client: Arc<dyn RegistryClient>) -> Self {
        Self {
            client,
            root: DEFAULT_ROOT.to_string(),
        }
    }

    /// Override the coordination root (mainly for tests and multi-tenant
    /// deployments sharing one backend).
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Registry path of a job's state document.
    pub fn job_path(&self, group: &str, job_name: &str) -> String {
        paths::job_path(&self.root, group, job_name)
    }

    /// Announce this node as a live member of `group`.
    ///
    /// The marker is an ephemeral leaf under `{group}/nodes`; a marker
    /// already present for this id is accepted as ours, so reconnecting
    /// after a dropped session is not an error.
    pub async fn register_node(&self, group: &str, node_id: &str) -> RegistryResult<()> {
        paths::mkdirp(self.client.as_ref(), &paths::nodes_path(&self.root, group)).await?;
        let marker = paths::node_path(&self.root, group, node_id);
        match self.client.create_ephemeral(&marker, b"").await {
            Ok(()) => {
                info!(%group, %node_id, "node registered in group");
                Ok(())
            }
            Err(RegistryError::AlreadyExists(_)) => {
                debug!(%group, %node_id, "node marker already present");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Register a job, creating its state document if absent.
    ///
    /// When a document already exists it is the live cluster truth and wins
    /// over the compiled-in `config`: the persisted `cronExpr` and activity
    /// flag survive a node restart. Returns the effective config. A
    /// document that fails to decode is replaced with `config` so one bad
    /// write cannot wedge the job forever.
    pub async fn register(&self, config: &JobConfig) -> RegistryResult<JobConfig> {
        let path = self.job_path(&config.group, &config.job_name);
        paths::mkdirp(
            self.client.as_ref(),
            &paths::group_path(&self.root, &config.group),
        )
        .await?;

        match read_json::<JobConfig>(self.client.as_ref(), &path).await {
            Ok(Some(existing)) => {
                if existing.cron_expr != config.cron_expr {
                    info!(
                        job = %config.qualified_name(),
                        registry_cron = %existing.cron_expr,
                        configured_cron = %config.cron_expr,
                        "registry schedule overrides configured one"
                    );
                }
                Ok(existing)
            }
            Ok(None) => {
                self.put(&path, config).await?;
                info!(job = %config.qualified_name(), cron = %config.cron_expr, "job registered");
                Ok(config.clone())
            }
            Err(RegistryError::Payload(_, reason)) => {
                warn!(
                    job = %config.qualified_name(),
                    %reason,
                    "malformed job document, replacing with configured defaults"
                );
                self.put(&path, config).await?;
                Ok(config.clone())
            }
            Err(e) => Err(e),
        }
    }

    /// Read a job's current state document.
    pub async fn get_config(&self, group: &str, job_name: &str) -> RegistryResult<Option<JobConfig>> {
        let path = self.job_path(group, job_name);
        read_json(self.client.as_ref(), &path).await
    }

    /// Claim a fire: mark the job running under `node_id` as of `fire_time`.
    pub async fn set_running(
        &self,
        group: &str,
        job_name: &str,
        node_id: &str,
        fire_time: DateTime<Utc>,
    ) -> RegistryResult<JobConfig> {
        self.update_config(group, job_name, |conf| {
            conf.is_running = true;
            conf.current_node_id = node_id.to_string();
            conf.last_fire_time = Some(fire_time);
        })
        .await
    }

    /// Release a fire: clear the running flag and ownership, record the
    /// next expected fire time. `lastFireTime` is left for the abandonment
    /// heuristic of later cycles.
    pub async fn set_stopped(
        &self,
        group: &str,
        job_name: &str,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> RegistryResult<JobConfig> {
        self.update_config(group, job_name, |conf| {
            conf.is_running = false;
            conf.current_node_id = String::new();
            conf.next_fire_time = next_fire_time;
        })
        .await
    }

    /// Read-modify-write a job document. Fails with
    /// [`RegistryError::NotFound`] when the job is not registered.
    pub async fn update_config<F>(
        &self,
        group: &str,
        job_name: &str,
        mutate: F,
    ) -> RegistryResult<JobConfig>
    where
        F: FnOnce(&mut JobConfig) + Send,
    {
        let path = self.job_path(group, job_name);
        let mut conf = read_json::<JobConfig>(self.client.as_ref(), &path)
            .await?
            .ok_or_else(|| RegistryError::NotFound(path.clone()))?;
        mutate(&mut conf);
        write_json(self.client.as_ref(), &path, &conf).await?;
        Ok(conf)
    }

    /// Remove a job's state document. Idempotent: unregistering a job that
    /// is already gone succeeds.
    pub async fn unregister(&self, group: &str, job_name: &str) -> RegistryResult<()> {
        let path = self.job_path(group, job_name);
        match self.client.delete(&path).await {
            Ok(()) => {
                info!(%group, %job_name, "job unregistered");
                Ok(())
            }
            Err(RegistryError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Write a document, creating the node when it does not exist yet.
    async fn put(&self, path: &str, config: &JobConfig) -> RegistryResult<()> {
        if self.client.exists(path).await? {
            write_json(self.client.as_ref(), path, config).await
        } else {
            let raw = serde_json::to_vec(config)
                .map_err(|e| RegistryError::Payload(path.to_string(), e.to_string()))?;
            self.client.create(path, &raw).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EmbeddedRegistry;
    use chrono::TimeZone;

    fn test_registry() -> JobRegistry {
        let store = EmbeddedRegistry::open_in_memory().unwrap();
        JobRegistry::new(Arc::new(store))
    }

    fn fire_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[tokio::test]
    async fn register_creates_group_and_document() {
        let registry = test_registry();
        let conf = JobConfig::new("etl", "nightly-sync", "0 0 2 * * *");

        let effective = registry.register(&conf).await.unwrap();
        assert_eq!(effective, conf);

        let stored = registry.get_config("etl", "nightly-sync").await.unwrap();
        assert_eq!(stored, Some(conf));
    }

    #[tokio::test]
    async fn register_adopts_persisted_state_over_configured() {
        let registry = test_registry();
        let conf = JobConfig::new("etl", "sync", "0 0 2 * * *");
        registry.register(&conf).await.unwrap();

        // A hot-reload landed while this node was down.
        registry
            .update_config("etl", "sync", |c| {
                c.cron_expr = "0 0 4 * * *".to_string();
                c.is_active = false;
            })
            .await
            .unwrap();

        let effective = registry.register(&conf).await.unwrap();
        assert_eq!(effective.cron_expr, "0 0 4 * * *");
        assert!(!effective.is_active);
    }

    #[tokio::test]
    async fn register_replaces_malformed_document() {
        let registry = test_registry();
        let conf = JobConfig::new("etl", "sync", "0 0 2 * * *");
        registry.register(&conf).await.unwrap();

        let path = registry.job_path("etl", "sync");
        registry
            .client
            .write_data(&path, b"{ not json")
            .await
            .unwrap();

        let effective = registry.register(&conf).await.unwrap();
        assert_eq!(effective, conf);
        assert_eq!(
            registry.get_config("etl", "sync").await.unwrap(),
            Some(conf)
        );
    }

    #[tokio::test]
    async fn set_running_claims_ownership() {
        let registry = test_registry();
        registry
            .register(&JobConfig::new("etl", "sync", "0 * * * * *"))
            .await
            .unwrap();

        let conf = registry
            .set_running("etl", "sync", "node-1", fire_time())
            .await
            .unwrap();

        assert!(conf.is_running);
        assert_eq!(conf.current_node_id, "node-1");
        assert_eq!(conf.last_fire_time, Some(fire_time()));
    }

    #[tokio::test]
    async fn set_stopped_releases_ownership() {
        let registry = test_registry();
        registry
            .register(&JobConfig::new("etl", "sync", "0 * * * * *"))
            .await
            .unwrap();
        registry
            .set_running("etl", "sync", "node-1", fire_time())
            .await
            .unwrap();

        let next = Utc.timestamp_opt(1_700_000_060, 0).unwrap();
        let conf = registry
            .set_stopped("etl", "sync", Some(next))
            .await
            .unwrap();

        assert!(!conf.is_running);
        assert_eq!(conf.next_fire_time, Some(next));
        assert!(conf.current_node_id.is_empty());
        // The heuristic input survives the release.
        assert_eq!(conf.last_fire_time, Some(fire_time()));
    }

    #[tokio::test]
    async fn set_running_unregistered_job_fails() {
        let registry = test_registry();
        let err = registry
            .set_running("etl", "ghost", "node-1", fire_time())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = test_registry();
        registry
            .register(&JobConfig::new("etl", "sync", "0 * * * * *"))
            .await
            .unwrap();

        registry.unregister("etl", "sync").await.unwrap();
        registry.unregister("etl", "sync").await.unwrap();
        assert!(registry.get_config("etl", "sync").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_node_tolerates_existing_marker() {
        let registry = test_registry();
        registry.register_node("etl", "node-1").await.unwrap();
        registry.register_node("etl", "node-1").await.unwrap();

        let marker = paths::node_path(DEFAULT_ROOT, "etl", "node-1");
        assert!(registry.client.exists(&marker).await.unwrap());
    }
}
