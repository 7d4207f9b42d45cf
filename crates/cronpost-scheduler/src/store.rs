//! Job Store seam. Backends must make `claim_lease` and `write_final`
//! single atomic conditional updates.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ErrorRecord, Job};

/// Proof of a successful claim: the `pending_ts` value this holder wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: String,
    pub pending_ts: String,
}

/// New schedule, always written as a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleUpdate {
    pub nextrun_ts: String,
    pub user_nextrun_ts: String,
}

/// Everything a dispatch cycle commits for one job.
///
/// Written in one update together with clearing `pending_ts`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalUpdate {
    /// `None` keeps the stored schedule (invalid crontab).
    pub schedule: Option<ScheduleUpdate>,
    /// `None` keeps the stored `previous_message_id` (failed send).
    pub previous_message_id: Option<String>,
    /// Appended to `errors`, in order.
    pub append_errors: Vec<ErrorRecord>,
    pub last_update_ts: String,
}

/// Canonical-timezone timestamps passed to the store, pre-rendered by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueQuery {
    /// Jobs with `nextrun_ts <= now` are due.
    pub now: String,
    /// Leases with `pending_ts < stale_before` have expired.
    pub stale_before: String,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Dispatchable jobs, oldest-created first. Read-only.
    async fn find_due(&self, query: &DueQuery) -> Result<Vec<Job>>;

    /// Set `pending_ts = query.now` if the job is still due at `query.now` and
    /// its lease is free or expired. `None` when another invocation holds the
    /// lease or the job stopped being due after selection.
    async fn claim_lease(&self, job_id: &str, query: &DueQuery) -> Result<Option<Lease>>;

    /// Commit `update` and clear `pending_ts`, but only while `lease` is still
    /// the current one. Returns `false` when the lease was lost.
    async fn write_final(&self, lease: &Lease, update: &FinalUpdate) -> Result<bool>;
}
