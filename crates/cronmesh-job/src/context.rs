//! JobContext — per-process coordination state, passed by handle.
//!
//! One context is built at startup and handed to every job and processor;
//! there is no ambient global. It owns the node identity, the registry
//! handles, the trigger scheduler reference, the retry worker, and the
//! optional persistence hooks. Jobs firing right at startup wait on the
//! context's readiness barrier so they cannot race initialization.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cronmesh_registry::{
    CommandAction, JobConfig, JobRegistry, MonitorCommand, NodeId, RegistryClient,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{JobError, JobResult};
use crate::job::ScheduledJob;
use crate::retry::{self, DEFAULT_RETRY_CAPACITY, DEFAULT_RETRY_DELAY, RetryProcessor};
use crate::trigger::TriggerScheduler;

// ── Persistence hooks ──────────────────────────────────────────────

/// Lets an external store override compiled-in job settings at
/// registration time. A failure here is fatal to startup.
#[async_trait]
pub trait ConfigMergeHook: Send + Sync {
    async fn merge(&self, config: &mut JobConfig) -> anyhow::Result<()>;
}

/// Receives the outcome of every owned fire. Best-effort: failures are
/// logged and swallowed, never fed back into the firing path.
#[async_trait]
pub trait RunLogHook: Send + Sync {
    async fn on_success(
        &self,
        config: &JobConfig,
        next_fire: Option<DateTime<Utc>>,
    ) -> anyhow::Result<()>;

    async fn on_error(
        &self,
        config: &JobConfig,
        next_fire: Option<DateTime<Utc>>,
        error: &anyhow::Error,
    ) -> anyhow::Result<()>;
}

// ── Context ────────────────────────────────────────────────────────

pub(crate) struct ContextInner {
    node_id: NodeId,
    client: Arc<dyn RegistryClient>,
    registry: JobRegistry,
    triggers: Arc<dyn TriggerScheduler>,
    retries: RetryProcessor,
    config_hook: Option<Arc<dyn ConfigMergeHook>>,
    run_log_hook: Option<Arc<dyn RunLogHook>>,
    jobs: Mutex<HashMap<String, Arc<ScheduledJob>>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
}

/// Handle to the process's coordination state. Cheap to clone.
#[derive(Clone)]
pub struct JobContext {
    inner: Arc<ContextInner>,
}

impl JobContext {
    /// Start building a context over a registry client and a trigger
    /// scheduler.
    pub fn builder(
        client: Arc<dyn RegistryClient>,
        triggers: Arc<dyn TriggerScheduler>,
    ) -> JobContextBuilder {
        JobContextBuilder {
            client,
            triggers,
            node_id: None,
            root: None,
            retry_delay: DEFAULT_RETRY_DELAY,
            retry_capacity: DEFAULT_RETRY_CAPACITY,
            config_hook: None,
            run_log_hook: None,
        }
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self { inner }
    }

    /// This node's identity as seen by the rest of the cluster.
    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Job-level registry operations.
    pub fn registry(&self) -> &JobRegistry {
        &self.inner.registry
    }

    /// The external trigger scheduler.
    pub fn triggers(&self) -> &dyn TriggerScheduler {
        self.inner.triggers.as_ref()
    }

    /// The retry submission handle.
    pub fn retries(&self) -> &RetryProcessor {
        &self.inner.retries
    }

    /// Queue a retry for a tracked job. A job this context never tracked
    /// cannot be re-invoked later; such a request is dropped with a
    /// warning.
    pub(crate) fn submit_retry(&self, group: &str, job_name: &str, remaining: u32) {
        match self.job(group, job_name) {
            Some(job) => self.inner.retries.submit(job, remaining),
            None => warn!(job = %format!("{group}/{job_name}"), "untracked job cannot be retried"),
        }
    }

    /// Track a job under this context. Returns false when a job with the
    /// same qualified name is already tracked.
    pub fn add_job(&self, job: Arc<ScheduledJob>) -> bool {
        let mut jobs = self.inner.jobs.lock().unwrap();
        match jobs.entry(job.qualified_name()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(job);
                true
            }
        }
    }

    /// Look up a tracked job.
    pub fn job(&self, group: &str, job_name: &str) -> Option<Arc<ScheduledJob>> {
        let jobs = self.inner.jobs.lock().unwrap();
        jobs.get(&format!("{group}/{job_name}")).cloned()
    }

    /// Snapshot of every tracked job.
    pub fn jobs(&self) -> Vec<Arc<ScheduledJob>> {
        self.inner.jobs.lock().unwrap().values().cloned().collect()
    }

    /// Declare initialization complete, releasing all fires parked in
    /// [`JobContext::wait_until_ready`].
    pub fn mark_ready(&self) {
        let _ = self.inner.ready_tx.send(true);
        info!(node_id = %self.inner.node_id, "coordination context initialized");
    }

    /// Park until the context is marked ready.
    ///
    /// No timeout: a stuck initializer stalls every fire until shutdown,
    /// which operators must watch for.
    pub async fn wait_until_ready(&self) {
        let mut ready = self.inner.ready_rx.clone();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Execute an operational command addressed to this node.
    pub async fn apply_command(&self, cmd: &MonitorCommand) -> JobResult<()> {
        let job = self
            .job(&cmd.group, &cmd.job_name)
            .ok_or_else(|| JobError::UnknownJob(format!("{}/{}", cmd.group, cmd.job_name)))?;

        match &cmd.action {
            CommandAction::TriggerNow => {
                info!(job = %job.qualified_name(), "manual fire requested");
                let ctx = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = job.execute(&ctx).await {
                        error!(job = %job.qualified_name(), error = %e, "manual fire failed");
                    }
                });
            }
            CommandAction::UpdateCron { cron_expr } => {
                let expr = cron_expr.clone();
                self.inner
                    .registry
                    .update_config(&cmd.group, &cmd.job_name, |conf| conf.cron_expr = expr)
                    .await?;
                job.reset_trigger_cron(self, cron_expr).await;
            }
            CommandAction::SetActive { active } => {
                let active = *active;
                self.inner
                    .registry
                    .update_config(&cmd.group, &cmd.job_name, |conf| conf.is_active = active)
                    .await?;
                info!(job = %job.qualified_name(), active, "activity flag updated");
            }
        }
        Ok(())
    }

    /// Run the config-merge hook over a freshly built config.
    pub(crate) async fn merge_config(&self, config: &mut JobConfig) -> JobResult<()> {
        if let Some(hook) = &self.inner.config_hook {
            hook.merge(config)
                .await
                .map_err(|e| JobError::ConfigMerge {
                    job: config.qualified_name(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Feed a fire outcome to the run-log hook, swallowing hook failures.
    pub(crate) async fn record_run(
        &self,
        config: &JobConfig,
        next_fire: Option<DateTime<Utc>>,
        error: Option<&anyhow::Error>,
    ) {
        let Some(hook) = &self.inner.run_log_hook else {
            return;
        };
        let outcome = match error {
            Some(err) => hook.on_error(config, next_fire, err).await,
            None => hook.on_success(config, next_fire).await,
        };
        if let Err(e) = outcome {
            warn!(job = %config.qualified_name(), error = %e, "run-log hook failed");
        }
    }

    /// Tear the context down: stop the retry worker and close the registry
    /// session, releasing this node's ephemeral markers.
    pub async fn close(&self) -> JobResult<()> {
        let _ = self.inner.shutdown_tx.send(true);
        self.inner.client.close().await?;
        info!(node_id = %self.inner.node_id, "coordination context closed");
        Ok(())
    }
}

// ── Builder ────────────────────────────────────────────────────────

/// Configures and builds a [`JobContext`].
pub struct JobContextBuilder {
    client: Arc<dyn RegistryClient>,
    triggers: Arc<dyn TriggerScheduler>,
    node_id: Option<NodeId>,
    root: Option<String>,
    retry_delay: Duration,
    retry_capacity: usize,
    config_hook: Option<Arc<dyn ConfigMergeHook>>,
    run_log_hook: Option<Arc<dyn RunLogHook>>,
}

impl JobContextBuilder {
    /// Fix the node identity instead of generating one.
    pub fn with_node_id(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Registry root for all coordination paths.
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Delay between a failure and its retry attempt.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Bound on the retry queue.
    pub fn with_retry_capacity(mut self, capacity: usize) -> Self {
        self.retry_capacity = capacity;
        self
    }

    pub fn with_config_hook(mut self, hook: Arc<dyn ConfigMergeHook>) -> Self {
        self.config_hook = Some(hook);
        self
    }

    pub fn with_run_log_hook(mut self, hook: Arc<dyn RunLogHook>) -> Self {
        self.run_log_hook = Some(hook);
        self
    }

    /// Build the context and spawn its retry worker.
    ///
    /// Must run inside a tokio runtime. The context is not ready yet;
    /// the host calls [`JobContext::mark_ready`] once every job is
    /// initialized and every trigger registered.
    pub fn build(self) -> JobContext {
        let node_id = self.node_id.unwrap_or_else(generate_node_id);
        let mut registry = JobRegistry::new(Arc::clone(&self.client));
        if let Some(root) = self.root {
            registry = registry.with_root(root);
        }

        let (retries, retry_rx) = RetryProcessor::channel(self.retry_capacity);
        let (ready_tx, ready_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(ContextInner {
            node_id,
            client: self.client,
            registry,
            triggers: self.triggers,
            retries,
            config_hook: self.config_hook,
            run_log_hook: self.run_log_hook,
            jobs: Mutex::new(HashMap::new()),
            ready_tx,
            ready_rx,
            shutdown_tx,
        });

        tokio::spawn(retry::run_retry_worker(
            retry_rx,
            self.retry_delay,
            Arc::downgrade(&inner),
            shutdown_rx,
        ));

        info!(node_id = %inner.node_id, "coordination context built");
        JobContext { inner }
    }
}

/// Derive a node identity unique enough within a job group's cluster.
fn generate_node_id() -> NodeId {
    let mut hasher = DefaultHasher::new();
    std::process::id().hash(&mut hasher);
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    format!("node-{:08x}", hasher.finish() as u32)
}
