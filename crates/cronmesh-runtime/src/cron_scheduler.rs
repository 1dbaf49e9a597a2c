//! CronTriggerScheduler — tokio-task cron triggers behind the contract.
//!
//! One task per trigger: compute the next fire from the cron schedule,
//! sleep until it, run the bound callback inline, repeat. Running the
//! callback inline means fires of one trigger never overlap; fire
//! instants missed while a callback is still running are skipped, not
//! replayed (the coordination layer's catch-up branch recovers slipped
//! schedules on its own). Reschedule and pause/resume nudge the task
//! through a watch channel so a sleeping trigger picks changes up
//! immediately instead of at its next fire.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use cronmesh_job::{FireTimes, TriggerError, TriggerKey, TriggerResult, TriggerScheduler};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Callback bound to a trigger, invoked once per fire.
pub type FireCallback = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Mutable trigger state, shared between the API and the firing task.
struct TriggerState {
    schedule: Schedule,
    paused: bool,
    previous: Option<DateTime<Utc>>,
    next: Option<DateTime<Utc>>,
}

struct TriggerShared {
    state: Mutex<TriggerState>,
    /// Bumped on reschedule/pause/resume to wake the sleeping task.
    nudge_tx: watch::Sender<()>,
}

/// Per-trigger slot: the firing task and its shutdown signal.
struct TriggerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    shared: Arc<TriggerShared>,
}

/// Cron-driven trigger scheduler.
pub struct CronTriggerScheduler {
    triggers: Arc<RwLock<HashMap<TriggerKey, TriggerSlot>>>,
}

impl CronTriggerScheduler {
    pub fn new() -> Self {
        Self {
            triggers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a trigger and start its firing task.
    ///
    /// A trigger already registered under `key` is replaced and its old
    /// task stopped.
    pub async fn register(
        &self,
        key: TriggerKey,
        cron_expr: &str,
        callback: FireCallback,
    ) -> TriggerResult<()> {
        let schedule = parse_cron(cron_expr)?;
        let next = schedule.after(&Utc::now()).next();
        let shared = Arc::new(TriggerShared {
            state: Mutex::new(TriggerState {
                schedule,
                paused: false,
                previous: None,
                next,
            }),
            nudge_tx: watch::channel(()).0,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_trigger_loop(
            key.clone(),
            Arc::clone(&shared),
            callback,
            shutdown_rx,
        ));

        let mut triggers = self.triggers.write().await;
        if let Some(old) = triggers.insert(
            key.clone(),
            TriggerSlot {
                handle,
                shutdown_tx,
                shared,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(trigger = %key, cron = %cron_expr, "trigger registered");
        Ok(())
    }

    /// Suspend firing without dropping the trigger.
    pub async fn pause(&self, key: &TriggerKey) -> TriggerResult<()> {
        self.set_paused(key, true).await
    }

    /// Resume a paused trigger.
    pub async fn resume(&self, key: &TriggerKey) -> TriggerResult<()> {
        self.set_paused(key, false).await
    }

    async fn set_paused(&self, key: &TriggerKey, paused: bool) -> TriggerResult<()> {
        let triggers = self.triggers.read().await;
        let slot = triggers
            .get(key)
            .ok_or_else(|| TriggerError::NotFound(key.to_string()))?;
        slot.shared.state.lock().unwrap().paused = paused;
        let _ = slot.shared.nudge_tx.send(());
        debug!(trigger = %key, paused, "trigger pause state changed");
        Ok(())
    }

    /// Keys with a live firing task.
    pub async fn active_triggers(&self) -> Vec<TriggerKey> {
        self.triggers.read().await.keys().cloned().collect()
    }

    /// Stop every trigger task.
    pub async fn shutdown(&self) {
        let mut triggers = self.triggers.write().await;
        for (key, slot) in triggers.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(trigger = %key, "trigger task stopped");
        }
        info!("trigger scheduler stopped");
    }
}

impl Default for CronTriggerScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TriggerScheduler for CronTriggerScheduler {
    async fn fire_times(&self, key: &TriggerKey) -> TriggerResult<FireTimes> {
        let triggers = self.triggers.read().await;
        let slot = triggers
            .get(key)
            .ok_or_else(|| TriggerError::NotFound(key.to_string()))?;
        let state = slot.shared.state.lock().unwrap();
        Ok(FireTimes {
            previous: state.previous,
            next: state.next,
        })
    }

    async fn reschedule(&self, key: &TriggerKey, cron_expr: &str) -> TriggerResult<()> {
        let schedule = parse_cron(cron_expr)?;
        let triggers = self.triggers.read().await;
        let slot = triggers
            .get(key)
            .ok_or_else(|| TriggerError::NotFound(key.to_string()))?;
        {
            let mut state = slot.shared.state.lock().unwrap();
            state.next = schedule.after(&Utc::now()).next();
            state.schedule = schedule;
            state.paused = false;
        }
        let _ = slot.shared.nudge_tx.send(());
        info!(trigger = %key, cron = %cron_expr, "trigger rescheduled");
        Ok(())
    }
}

fn parse_cron(cron_expr: &str) -> TriggerResult<Schedule> {
    Schedule::from_str(cron_expr).map_err(|e| TriggerError::BadCron {
        expr: cron_expr.to_string(),
        reason: e.to_string(),
    })
}

/// The firing loop for a single trigger.
async fn run_trigger_loop(
    key: TriggerKey,
    shared: Arc<TriggerShared>,
    callback: FireCallback,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut nudge = shared.nudge_tx.subscribe();
    debug!(trigger = %key, "trigger task starting");

    loop {
        let target = {
            let mut state = shared.state.lock().unwrap();
            let next = state.schedule.after(&Utc::now()).next();
            state.next = next;
            next
        };

        let Some(target) = target else {
            // Schedule has no further fire; park until it changes.
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = nudge.changed() => continue,
            }
        };

        let delay = (target - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = nudge.changed() => continue,
            _ = tokio::time::sleep(delay) => {}
        }

        {
            let mut state = shared.state.lock().unwrap();
            if state.paused {
                continue;
            }
            // Advance before the callback runs so a fire-time read during
            // the run sees the upcoming fire, not the one in progress.
            state.previous = Some(target);
            state.next = state.schedule.after(&target).next();
        }
        debug!(trigger = %key, fire = %target, "trigger firing");
        callback().await;
    }

    debug!(trigger = %key, "trigger task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
    use tokio::time::{sleep, timeout};

    fn key(name: &str) -> TriggerKey {
        TriggerKey::for_job("etl", name)
    }

    fn counting_callback() -> (FireCallback, Arc<AtomicU32>) {
        let fires = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fires);
        let callback: FireCallback = Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::Relaxed);
            })
        });
        (callback, fires)
    }

    async fn wait_for_fires(fires: &AtomicU32, expected: u32) {
        for _ in 0..60 {
            if fires.load(Ordering::Relaxed) >= expected {
                return;
            }
            sleep(Duration::from_millis(100)).await;
        }
        panic!(
            "expected {expected} fires, saw {}",
            fires.load(Ordering::Relaxed)
        );
    }

    #[tokio::test]
    async fn register_rejects_malformed_cron() {
        let scheduler = CronTriggerScheduler::new();
        let (callback, _) = counting_callback();
        let err = scheduler
            .register(key("sync"), "not a cron", callback)
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::BadCron { .. }));
        assert!(scheduler.active_triggers().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_trigger_is_not_found() {
        let scheduler = CronTriggerScheduler::new();
        assert!(matches!(
            scheduler.fire_times(&key("ghost")).await,
            Err(TriggerError::NotFound(_))
        ));
        assert!(matches!(
            scheduler.reschedule(&key("ghost"), "* * * * * *").await,
            Err(TriggerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn registered_trigger_reports_upcoming_fire() {
        let scheduler = CronTriggerScheduler::new();
        let (callback, _) = counting_callback();
        scheduler
            .register(key("sync"), "0 0 * * * *", callback)
            .await
            .unwrap();

        let times = scheduler.fire_times(&key("sync")).await.unwrap();
        assert!(times.previous.is_none());
        assert!(times.next.unwrap() > Utc::now());

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn trigger_fires_and_records_previous() {
        let scheduler = CronTriggerScheduler::new();
        let (callback, fires) = counting_callback();
        scheduler
            .register(key("sync"), "* * * * * *", callback)
            .await
            .unwrap();

        wait_for_fires(&fires, 1).await;
        let times = scheduler.fire_times(&key("sync")).await.unwrap();
        let previous = times.previous.unwrap();
        assert!(previous <= Utc::now());
        // The advertised next fire is ahead of the one that just ran.
        assert!(times.next.unwrap() > previous);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn fires_of_one_trigger_never_overlap() {
        let scheduler = CronTriggerScheduler::new();
        let in_flight = Arc::new(AtomicI32::new(0));
        let overlapped = Arc::new(AtomicI32::new(0));
        let fires = Arc::new(AtomicU32::new(0));

        let callback: FireCallback = {
            let in_flight = Arc::clone(&in_flight);
            let overlapped = Arc::clone(&overlapped);
            let fires = Arc::clone(&fires);
            Arc::new(move || {
                let in_flight = Arc::clone(&in_flight);
                let overlapped = Arc::clone(&overlapped);
                let fires = Arc::clone(&fires);
                Box::pin(async move {
                    if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlapped.fetch_add(1, Ordering::SeqCst);
                    }
                    sleep(Duration::from_millis(1500)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    fires.fetch_add(1, Ordering::Relaxed);
                })
            })
        };

        scheduler
            .register(key("slow"), "* * * * * *", callback)
            .await
            .unwrap();

        wait_for_fires(&fires, 2).await;
        assert_eq!(overlapped.load(Ordering::SeqCst), 0);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn reschedule_swaps_the_live_schedule() {
        let scheduler = CronTriggerScheduler::new();
        let (callback, _) = counting_callback();
        scheduler
            .register(key("sync"), "0 0 * * * *", callback)
            .await
            .unwrap();

        scheduler
            .reschedule(&key("sync"), "*/2 * * * * *")
            .await
            .unwrap();

        let times = scheduler.fire_times(&key("sync")).await.unwrap();
        let until_next = times.next.unwrap() - Utc::now();
        assert!(until_next.num_seconds() <= 2);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_reschedule_keeps_old_schedule() {
        let scheduler = CronTriggerScheduler::new();
        let (callback, _) = counting_callback();
        scheduler
            .register(key("sync"), "0 0 * * * *", callback)
            .await
            .unwrap();
        let before = scheduler.fire_times(&key("sync")).await.unwrap();

        let err = scheduler
            .reschedule(&key("sync"), "garbage")
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::BadCron { .. }));

        let after = scheduler.fire_times(&key("sync")).await.unwrap();
        assert_eq!(after.next, before.next);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn paused_trigger_skips_fires_until_resumed() {
        let scheduler = CronTriggerScheduler::new();
        let (callback, fires) = counting_callback();
        scheduler
            .register(key("sync"), "* * * * * *", callback)
            .await
            .unwrap();
        scheduler.pause(&key("sync")).await.unwrap();

        // A fire may have squeezed in before the pause; none may follow it.
        let parked = fires.load(Ordering::Relaxed);
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(fires.load(Ordering::Relaxed), parked);

        scheduler.resume(&key("sync")).await.unwrap();
        wait_for_fires(&fires, parked + 1).await;

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn replacing_a_registration_stops_the_old_task() {
        let scheduler = CronTriggerScheduler::new();
        let (old_callback, old_fires) = counting_callback();
        let (new_callback, new_fires) = counting_callback();

        scheduler
            .register(key("sync"), "* * * * * *", old_callback)
            .await
            .unwrap();
        scheduler
            .register(key("sync"), "* * * * * *", new_callback)
            .await
            .unwrap();
        sleep(Duration::from_millis(100)).await;

        let old_snapshot = old_fires.load(Ordering::Relaxed);
        wait_for_fires(&new_fires, 1).await;
        assert_eq!(old_fires.load(Ordering::Relaxed), old_snapshot);
        assert_eq!(scheduler.active_triggers().await.len(), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_firing() {
        let scheduler = CronTriggerScheduler::new();
        let (callback, fires) = counting_callback();
        scheduler
            .register(key("sync"), "* * * * * *", callback)
            .await
            .unwrap();

        wait_for_fires(&fires, 1).await;
        scheduler.shutdown().await;
        assert!(scheduler.active_triggers().await.is_empty());

        let snapshot = fires.load(Ordering::Relaxed);
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(fires.load(Ordering::Relaxed), snapshot);
    }

    // Exercised via timeout to prove the select arms stay live.
    #[tokio::test]
    async fn reschedule_wakes_a_distant_sleeper() {
        let scheduler = CronTriggerScheduler::new();
        let (callback, fires) = counting_callback();
        // Yearly schedule: the task would otherwise sleep for months.
        scheduler
            .register(key("sync"), "0 0 0 1 1 *", callback)
            .await
            .unwrap();

        scheduler
            .reschedule(&key("sync"), "* * * * * *")
            .await
            .unwrap();

        timeout(Duration::from_secs(5), wait_for_fires(&fires, 1))
            .await
            .expect("rescheduled trigger should fire promptly");

        scheduler.shutdown().await;
    }
}
