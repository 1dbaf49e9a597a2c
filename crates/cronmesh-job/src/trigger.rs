//! Contract of the external trigger scheduler, as the core consumes it.
//!
//! The core never talks to a concrete timer directly. It only needs to
//! read a trigger's previous/next fire times and to push a new cron
//! expression into a live trigger (which also resumes it). Registration of
//! triggers with their fire callbacks is the hosting runtime's business.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::TriggerResult;

/// Identity of a trigger: `(name, group)`, name derived from the job name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    pub name: String,
    pub group: String,
}

impl TriggerKey {
    /// Key for a job's trigger, named `{jobName}Trigger`.
    pub fn for_job(group: &str, job_name: &str) -> Self {
        Self {
            name: format!("{job_name}Trigger"),
            group: group.to_string(),
        }
    }
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// Previous and next fire instants of a live trigger.
///
/// Either side may be absent: `previous` before the first fire, `next`
/// when the schedule has run out or the trigger is gone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FireTimes {
    pub previous: Option<DateTime<Utc>>,
    pub next: Option<DateTime<Utc>>,
}

/// What the coordination core requires from a trigger scheduler.
#[async_trait]
pub trait TriggerScheduler: Send + Sync {
    /// Previous/next fire times of the trigger.
    async fn fire_times(&self, key: &TriggerKey) -> TriggerResult<FireTimes>;

    /// Replace the trigger's cron expression and resume it.
    async fn reschedule(&self, key: &TriggerKey, cron_expr: &str) -> TriggerResult<()>;
}
