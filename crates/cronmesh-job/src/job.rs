//! ScheduledJob — the per-job coordination unit.
//!
//! Wraps a [`WorkUnit`] and owns everything that happens on a fire: the
//! should-I-run decision, the ownership claim, the run itself, the release
//! write, and the retry hand-off. The decision runs against a fresh
//! registry read every cycle, in this order:
//!
//! 1. Parallel jobs always run; no coordination.
//! 2. Inactive jobs are skipped cluster-wide.
//! 3. A recorded next fire more than [`CATCH_UP_GRACE_SECS`] in the past
//!    forces a run, before any ownership check. A stuck running flag can
//!    therefore not block schedule recovery, at the price of a possible
//!    double execution while the legitimate owner is still working.
//! 4. A foreign `currentNodeId` means another node is designated owner:
//!    skip.
//! 5. A set running flag sends the fire through the abandonment heuristic:
//!    takeover when the prior owner is presumed dead, skip otherwise.
//! 6. Nobody owns the job: adopt the persisted cron expression and run.
//!
//! The abandonment heuristic compares the time since `lastFireTime`
//! against the job's nominal fire interval, capped at
//! [`ABANDON_CAP_SECS`]. It is the sole failure detector; there are no
//! locks, leases, or fencing tokens anywhere on this path, and the
//! claim/release writes are plain last-writer-wins round trips.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use cronmesh_registry::JobConfig;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::context::JobContext;
use crate::error::{JobError, JobResult};
use crate::trigger::{FireTimes, TriggerKey};
use crate::work::WorkUnit;

/// How far past its recorded next fire a schedule may slip before any
/// node force-runs it.
pub const CATCH_UP_GRACE_SECS: i64 = 5;

/// Upper bound on the abandonment threshold, bounding takeover latency
/// for long-period jobs.
pub const ABANDON_CAP_SECS: i64 = 1800;

// ── Fire decision ──────────────────────────────────────────────────

/// Outcome of the per-fire should-run predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum FireDecision {
    Run(RunMode),
    Skip(SkipReason),
}

/// Why a fire proceeds.
#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    /// The job runs on every node; the ownership protocol is bypassed.
    Parallel,
    /// The recorded next fire slipped past the grace window.
    CatchUp,
    /// The prior owner is presumed dead; this node takes over and adopts
    /// the persisted schedule.
    Takeover { cron_expr: String },
    /// Nobody owns the job; the persisted schedule is adopted if present.
    Fresh { cron_expr: Option<String> },
}

impl RunMode {
    /// The cron expression this fire adopts from the registry, if any.
    pub fn adopted_cron(&self) -> Option<&str> {
        match self {
            RunMode::Takeover { cron_expr } => Some(cron_expr),
            RunMode::Fresh { cron_expr } => cron_expr.as_deref(),
            _ => None,
        }
    }
}

/// Why a fire is skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The job is deactivated cluster-wide.
    Inactive,
    /// Another node is the designated owner.
    ForeignOwner,
    /// A run is in progress and not presumed abandoned.
    OwnerAlive,
}

// ── Scheduled job ──────────────────────────────────────────────────

/// One coordinated job: identity, schedule, retry budget, and work unit.
pub struct ScheduledJob {
    group: String,
    job_name: String,
    trigger_key: TriggerKey,
    default_cron: String,
    retries: u32,
    execute_on_started: bool,
    work: Arc<dyn WorkUnit>,
    /// Live schedule as last pushed to the trigger scheduler. The lock
    /// serializes hot-reloads against in-flight fires of the same job.
    live_cron: Mutex<String>,
    /// Nominal fire interval in seconds, computed once; 0 until known.
    cached_interval: AtomicI64,
    /// Completed fire attempts on this node (diagnostic only).
    executions: AtomicU64,
}

impl ScheduledJob {
    pub fn new(group: &str, job_name: &str, cron_expr: &str, work: Arc<dyn WorkUnit>) -> Self {
        Self {
            trigger_key: TriggerKey::for_job(group, job_name),
            group: group.to_string(),
            job_name: job_name.to_string(),
            default_cron: cron_expr.to_string(),
            retries: 0,
            execute_on_started: false,
            work,
            live_cron: Mutex::new(cron_expr.to_string()),
            cached_interval: AtomicI64::new(0),
            executions: AtomicU64::new(0),
        }
    }

    /// Retry budget: how many extra attempts a failed fire is granted.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Fire once immediately when the hosting engine starts, outside the
    /// cron schedule.
    pub fn with_execute_on_started(mut self) -> Self {
        self.execute_on_started = true;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// `group/jobName`.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.group, self.job_name)
    }

    pub fn trigger_key(&self) -> &TriggerKey {
        &self.trigger_key
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn execute_on_started(&self) -> bool {
        self.execute_on_started
    }

    /// Fire attempts completed on this node.
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    /// The schedule currently pushed to the trigger scheduler.
    pub async fn current_cron(&self) -> String {
        self.live_cron.lock().await.clone()
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Build this job's config, run the merge hook, and register it.
    ///
    /// Returns the effective config: a document already present in the
    /// registry wins over the compiled-in defaults, so hot-reloaded
    /// settings survive a node restart.
    pub async fn init(&self, ctx: &JobContext) -> JobResult<JobConfig> {
        let mut config = JobConfig::new(&self.group, &self.job_name, &self.default_cron);
        ctx.merge_config(&mut config).await?;
        let effective = ctx.registry().register(&config).await?;
        *self.live_cron.lock().await = effective.cron_expr.clone();
        debug!(job = %self.qualified_name(), cron = %effective.cron_expr, "job initialized");
        Ok(effective)
    }

    /// Post-registration hook, called once all triggers are live.
    ///
    /// Deliberately does not prefetch the next fire time: writing it
    /// before the first real fire would double-book the slot against
    /// other nodes.
    pub fn after_initialized(&self) {
        if self.retries > 0 {
            debug!(job = %self.qualified_name(), retries = self.retries, "retry budget armed");
        }
    }

    /// Remove this job's registry document at graceful shutdown.
    pub async fn destroy(&self, ctx: &JobContext) -> JobResult<()> {
        ctx.registry().unregister(&self.group, &self.job_name).await?;
        Ok(())
    }

    // ── Firing ─────────────────────────────────────────────────────

    /// One fire cycle with the full retry budget.
    ///
    /// Work failures are absorbed here; an error return means the fire
    /// itself could not complete its registry round trips. The retry
    /// hand-off resolves the job through its context, so only tracked
    /// jobs ([`JobContext::add_job`]) are retried.
    pub async fn execute(&self, ctx: &JobContext) -> JobResult<()> {
        self.execute_attempt(ctx, self.retries).await
    }

    pub(crate) async fn execute_attempt(&self, ctx: &JobContext, budget: u32) -> JobResult<()> {
        ctx.wait_until_ready().await;

        let conf = ctx
            .registry()
            .get_config(&self.group, &self.job_name)
            .await?
            .ok_or_else(|| JobError::NotRegistered(self.qualified_name()))?;

        let times = self.read_fire_times(ctx).await;
        let now = Utc::now();

        match self.decide(&conf, ctx.node_id(), &times, now) {
            FireDecision::Skip(reason) => {
                debug!(job = %self.qualified_name(), ?reason, "fire skipped");
                return Ok(());
            }
            FireDecision::Run(mode) => {
                match &mode {
                    RunMode::CatchUp => {
                        info!(job = %self.qualified_name(), "next fire slipped past grace window, forcing run");
                    }
                    RunMode::Takeover { .. } => {
                        info!(
                            job = %self.qualified_name(),
                            prior_owner = %conf.current_node_id,
                            "presuming prior owner dead, taking over"
                        );
                    }
                    _ => {}
                }
                if let Some(expr) = mode.adopted_cron() {
                    self.reset_trigger_cron(ctx, expr).await;
                }
            }
        }

        let begin = times.previous.unwrap_or(now);
        ctx.registry()
            .set_running(&self.group, &self.job_name, ctx.node_id(), begin)
            .await?;

        let outcome = self.work.run(ctx).await;
        if let Err(error) = &outcome {
            error!(job = %self.qualified_name(), %error, "work unit failed");
            if budget > 0 {
                ctx.submit_retry(&self.group, &self.job_name, budget);
            }
        }
        self.executions.fetch_add(1, Ordering::Relaxed);

        let next_fire = self.read_fire_times(ctx).await.next;
        let conf = ctx
            .registry()
            .set_stopped(&self.group, &self.job_name, next_fire)
            .await?;
        ctx.record_run(&conf, next_fire, outcome.as_ref().err()).await;
        Ok(())
    }

    /// The should-run predicate, evaluated against a fresh registry read.
    pub fn decide(
        &self,
        conf: &JobConfig,
        node_id: &str,
        times: &FireTimes,
        now: DateTime<Utc>,
    ) -> FireDecision {
        if self.work.parallel() {
            return FireDecision::Run(RunMode::Parallel);
        }
        if !conf.is_active {
            return FireDecision::Skip(SkipReason::Inactive);
        }
        // Evaluated before any ownership check: a stuck running flag must
        // not block schedule recovery. Can co-occur with a live run on
        // another node; that double execution is accepted.
        if let Some(next) = conf.next_fire_time {
            if (now - next).num_seconds() > CATCH_UP_GRACE_SECS {
                return FireDecision::Run(RunMode::CatchUp);
            }
        }
        if !conf.current_node_id.is_empty() && conf.current_node_id != node_id {
            return FireDecision::Skip(SkipReason::ForeignOwner);
        }
        if conf.is_running {
            if self.abnormal_abort(conf, times, now) {
                return FireDecision::Run(RunMode::Takeover {
                    cron_expr: conf.cron_expr.clone(),
                });
            }
            return FireDecision::Skip(SkipReason::OwnerAlive);
        }
        let cron_expr = (!conf.cron_expr.trim().is_empty()).then(|| conf.cron_expr.clone());
        FireDecision::Run(RunMode::Fresh { cron_expr })
    }

    /// Abandonment heuristic: is the recorded run presumed dead?
    ///
    /// True when the time since `lastFireTime` exceeds
    /// `min(nominal_interval, ABANDON_CAP_SECS)`. With no interval known
    /// yet, the cap alone applies.
    pub fn abnormal_abort(&self, conf: &JobConfig, times: &FireTimes, now: DateTime<Utc>) -> bool {
        let Some(last_fire) = conf.last_fire_time else {
            // A running flag without a fire time is a partial write;
            // leave it to the catch-up branch of a later cycle.
            return false;
        };
        let threshold = self
            .nominal_interval_secs(times)
            .map_or(ABANDON_CAP_SECS, |interval| interval.min(ABANDON_CAP_SECS));
        (now - last_fire).num_seconds() > threshold
    }

    /// Nominal fire interval, computed once from the first trigger read
    /// that carries both fire times, then reused for the process's life.
    pub(crate) fn nominal_interval_secs(&self, times: &FireTimes) -> Option<i64> {
        let cached = self.cached_interval.load(Ordering::Relaxed);
        if cached > 0 {
            return Some(cached);
        }
        let (Some(previous), Some(next)) = (times.previous, times.next) else {
            return None;
        };
        let interval = (next - previous).num_seconds();
        if interval <= 0 {
            return None;
        }
        self.cached_interval.store(interval, Ordering::Relaxed);
        Some(interval)
    }

    /// Push a new cron expression into the live trigger.
    ///
    /// A no-op when the expression matches the live one (case-insensitive).
    /// A rejected expression leaves the prior schedule active. Safe to call
    /// concurrently with an in-flight fire of the same job.
    pub async fn reset_trigger_cron(&self, ctx: &JobContext, cron_expr: &str) {
        let mut live = self.live_cron.lock().await;
        if live.eq_ignore_ascii_case(cron_expr) {
            return;
        }
        match ctx.triggers().reschedule(&self.trigger_key, cron_expr).await {
            Ok(()) => {
                info!(
                    job = %self.qualified_name(),
                    from = %*live,
                    to = %cron_expr,
                    "cron expression hot-reloaded"
                );
                *live = cron_expr.to_string();
            }
            Err(e) => {
                warn!(job = %self.qualified_name(), error = %e, "cron update rejected, prior schedule stays");
            }
        }
    }

    async fn read_fire_times(&self, ctx: &JobContext) -> FireTimes {
        match ctx.triggers().fire_times(&self.trigger_key).await {
            Ok(times) => times,
            Err(e) => {
                warn!(trigger = %self.trigger_key, error = %e, "fire time read failed");
                FireTimes::default()
            }
        }
    }
}
