//! JobEngine — node bootstrap and graceful shutdown.
//!
//! Wires a set of `ScheduledJob`s into a running node: validates the
//! group, builds the process context, announces membership, registers
//! every job and its cron trigger, then opens the readiness barrier.
//! Startup is all-or-nothing: a blank group, a duplicate job name, an
//! unparseable cron expression, or a registry failure aborts the whole
//! engine rather than starting a partial node.

use std::sync::Arc;

use cronmesh_job::{
    ConfigMergeHook, JobContext, RunLogHook, ScheduledJob, TriggerScheduler,
};
use cronmesh_registry::RegistryClient;
use tracing::{error, info, warn};

use crate::config::NodeConfig;
use crate::cron_scheduler::{CronTriggerScheduler, FireCallback};
use crate::error::{EngineError, EngineResult};

/// A running node: context, trigger scheduler, and the group it joined.
pub struct JobEngine {
    group: String,
    context: JobContext,
    triggers: Arc<CronTriggerScheduler>,
}

impl std::fmt::Debug for JobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngine")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl JobEngine {
    /// Start assembling an engine over a registry client.
    pub fn builder(config: NodeConfig, client: Arc<dyn RegistryClient>) -> JobEngineBuilder {
        JobEngineBuilder {
            config,
            client,
            jobs: Vec::new(),
            config_hook: None,
            run_log_hook: None,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn context(&self) -> &JobContext {
        &self.context
    }

    pub fn triggers(&self) -> &Arc<CronTriggerScheduler> {
        &self.triggers
    }

    /// Tear the node down: unregister every job, stop the trigger tasks,
    /// close the context and its registry session.
    pub async fn shutdown(&self) -> EngineResult<()> {
        for job in self.context.jobs() {
            if let Err(e) = job.destroy(&self.context).await {
                warn!(job = %job.qualified_name(), error = %e, "job teardown failed");
            }
        }
        self.triggers.shutdown().await;
        self.context.close().await?;
        info!(group = %self.group, "job engine stopped");
        Ok(())
    }
}

/// Collects jobs and hooks, then boots the engine.
pub struct JobEngineBuilder {
    config: NodeConfig,
    client: Arc<dyn RegistryClient>,
    jobs: Vec<Arc<ScheduledJob>>,
    config_hook: Option<Arc<dyn ConfigMergeHook>>,
    run_log_hook: Option<Arc<dyn RunLogHook>>,
}

impl JobEngineBuilder {
    pub fn with_job(mut self, job: Arc<ScheduledJob>) -> Self {
        self.jobs.push(job);
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

    /// Boot the node. On success the context is ready and every trigger
    /// is live; on failure nothing keeps running and the registry session
    /// is closed.
    pub async fn start(self) -> EngineResult<JobEngine> {
        let group = self.config.group.trim().to_string();
        if group.is_empty() {
            return Err(EngineError::BlankGroup);
        }

        let triggers = Arc::new(CronTriggerScheduler::new());
        let mut builder = JobContext::builder(
            Arc::clone(&self.client),
            Arc::clone(&triggers) as Arc<dyn TriggerScheduler>,
        )
        .with_retry_delay(self.config.retry_delay())
        .with_retry_capacity(self.config.retry.queue_depth);
        if let Some(node_id) = &self.config.node_id {
            builder = builder.with_node_id(node_id.clone());
        }
        if let Some(root) = &self.config.root {
            builder = builder.with_root(root.clone());
        }
        if let Some(hook) = self.config_hook {
            builder = builder.with_config_hook(hook);
        }
        if let Some(hook) = self.run_log_hook {
            builder = builder.with_run_log_hook(hook);
        }
        let context = builder.build();

        if let Err(e) = bootstrap(&group, &context, &triggers, &self.jobs).await {
            triggers.shutdown().await;
            if let Err(close_err) = context.close().await {
                warn!(error = %close_err, "context teardown after failed startup");
            }
            return Err(e);
        }

        // Post-init work runs once the barrier opens.
        {
            let context = context.clone();
            let jobs = self.jobs.clone();
            tokio::spawn(async move {
                context.wait_until_ready().await;
                for job in jobs {
                    job.after_initialized();
                    if job.execute_on_started() {
                        let context = context.clone();
                        tokio::spawn(async move {
                            if let Err(e) = job.execute(&context).await {
                                error!(job = %job.qualified_name(), error = %e, "startup fire failed");
                            }
                        });
                    }
                }
            });
        }

        context.mark_ready();
        info!(
            group = %group,
            node_id = %context.node_id(),
            jobs = self.jobs.len(),
            "job engine started"
        );
        Ok(JobEngine {
            group,
            context,
            triggers,
        })
    }
}

/// All fallible startup steps, so a failure can unwind in one place.
async fn bootstrap(
    group: &str,
    context: &JobContext,
    triggers: &CronTriggerScheduler,
    jobs: &[Arc<ScheduledJob>],
) -> EngineResult<()> {
    context.registry().register_node(group, context.node_id()).await?;

    // Name collisions are fatal before any per-job registry write.
    for job in jobs {
        if !context.add_job(Arc::clone(job)) {
            return Err(EngineError::DuplicateJob(job.qualified_name()));
        }
    }

    for job in jobs {
        let effective = job.init(context).await?;
        let callback = fire_callback(Arc::clone(job), context.clone());
        triggers
            .register(job.trigger_key().clone(), &effective.cron_expr, callback)
            .await?;
    }
    Ok(())
}

/// Bind a job's full fire cycle to its trigger.
fn fire_callback(job: Arc<ScheduledJob>, context: JobContext) -> FireCallback {
    Arc::new(move || {
        let job = Arc::clone(&job);
        let context = context.clone();
        Box::pin(async move {
            if let Err(e) = job.execute(&context).await {
                error!(job = %job.qualified_name(), error = %e, "scheduled fire failed");
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cronmesh_job::{TriggerError, WorkUnit};
    use cronmesh_registry::{paths, EmbeddedRegistry};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    struct TickWork {
        runs: AtomicU32,
    }

    impl TickWork {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicU32::new(0),
            })
        }

        fn runs(&self) -> u32 {
            self.runs.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl WorkUnit for TickWork {
        async fn run(&self, _ctx: &JobContext) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn test_client() -> Arc<dyn RegistryClient> {
        Arc::new(EmbeddedRegistry::open_in_memory().unwrap())
    }

    fn config_with_node(group: &str, node_id: &str) -> NodeConfig {
        let mut config = NodeConfig::new(group);
        config.node_id = Some(node_id.to_string());
        config
    }

    #[tokio::test]
    async fn blank_group_fails_startup() {
        let err = JobEngine::builder(NodeConfig::new("  "), test_client())
            .start()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BlankGroup));
    }

    #[tokio::test]
    async fn duplicate_job_name_fails_startup() {
        let work = TickWork::new();
        let err = JobEngine::builder(NodeConfig::new("etl"), test_client())
            .with_job(Arc::new(ScheduledJob::new(
                "etl",
                "sync",
                "0 0 * * * *",
                work.clone(),
            )))
            .with_job(Arc::new(ScheduledJob::new(
                "etl",
                "sync",
                "0 30 * * * *",
                work,
            )))
            .start()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateJob(_)));
    }

    #[tokio::test]
    async fn unparseable_cron_fails_startup() {
        let err = JobEngine::builder(NodeConfig::new("etl"), test_client())
            .with_job(Arc::new(ScheduledJob::new(
                "etl",
                "sync",
                "every tuesday",
                TickWork::new(),
            )))
            .start()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Trigger(TriggerError::BadCron { .. })
        ));
    }

    #[tokio::test]
    async fn start_announces_membership_and_registers_jobs() {
        let store = EmbeddedRegistry::open_in_memory().unwrap();
        let client: Arc<dyn RegistryClient> = Arc::new(store.clone());
        let job = Arc::new(ScheduledJob::new(
            "etl",
            "sync",
            "0 0 * * * *",
            TickWork::new(),
        ));

        let engine = JobEngine::builder(config_with_node("etl", "node-a"), client)
            .with_job(Arc::clone(&job))
            .start()
            .await
            .unwrap();

        let marker = paths::node_path(paths::DEFAULT_ROOT, "etl", "node-a");
        assert!(store.exists(&marker).await.unwrap());

        let conf = engine
            .context()
            .registry()
            .get_config("etl", "sync")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(conf.cron_expr, "0 0 * * * *");

        let times = engine.triggers().fire_times(job.trigger_key()).await.unwrap();
        assert!(times.next.is_some());

        engine.shutdown().await.unwrap();
        assert!(engine
            .context()
            .registry()
            .get_config("etl", "sync")
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            engine.triggers().fire_times(job.trigger_key()).await,
            Err(TriggerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn execute_on_started_fires_before_the_schedule() {
        let work = TickWork::new();
        // Hourly schedule: any run inside the test window is the startup
        // fire, not a cron fire.
        let job = Arc::new(
            ScheduledJob::new("etl", "sync", "0 0 * * * *", work.clone())
                .with_execute_on_started(),
        );

        let engine = JobEngine::builder(NodeConfig::new("etl"), test_client())
            .with_job(job)
            .start()
            .await
            .unwrap();

        for _ in 0..100 {
            if work.runs() >= 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(work.runs(), 1);

        let conf = engine
            .context()
            .registry()
            .get_config("etl", "sync")
            .await
            .unwrap()
            .unwrap();
        assert!(!conf.is_running);

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn registered_schedule_overrides_compiled_default() {
        let store = EmbeddedRegistry::open_in_memory().unwrap();
        let client: Arc<dyn RegistryClient> = Arc::new(store.clone());

        // A prior node hot-reloaded the schedule, then the cluster went
        // down; the surviving document wins over the compiled-in cron.
        let registry = cronmesh_registry::JobRegistry::new(Arc::new(store.clone()));
        registry
            .register(&cronmesh_registry::JobConfig::new(
                "etl",
                "sync",
                "0 */10 * * * *",
            ))
            .await
            .unwrap();

        let job = Arc::new(ScheduledJob::new(
            "etl",
            "sync",
            "0 0 * * * *",
            TickWork::new(),
        ));
        let engine = JobEngine::builder(NodeConfig::new("etl"), client)
            .with_job(Arc::clone(&job))
            .start()
            .await
            .unwrap();

        assert_eq!(job.current_cron().await, "0 */10 * * * *");
        let times = engine.triggers().fire_times(job.trigger_key()).await.unwrap();
        let until_next = times.next.unwrap() - chrono::Utc::now();
        // Ten-minute schedule, not the top-of-hour default.
        assert!(until_next.num_seconds() <= 600);

        engine.shutdown().await.unwrap();
    }
}
