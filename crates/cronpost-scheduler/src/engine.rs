use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cronpost_core::config::DispatchConfig;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::{
    crontab::{format_timestamp, parse_timezone, validate},
    dispatch::ContentDispatcher,
    error::Result,
    gateway::MessagingGateway,
    lease::LeaseManager,
    reschedule::finalize,
    retry::{AttemptOutcome, RetryPolicy},
    store::JobStore,
    types::Job,
};

/// Everything the engine needs to know, fixed at construction.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub lease_timeout: chrono::Duration,
    pub retry: RetryPolicy,
    pub canonical_tz: Tz,
    /// Jobs processed in parallel within one cycle.
    pub concurrency: usize,
    /// Deadline for each gateway call.
    pub send_timeout: Duration,
}

impl EngineConfig {
    pub fn from_dispatch(config: &DispatchConfig) -> Result<Self> {
        Ok(Self {
            lease_timeout: chrono::Duration::seconds(config.lease_timeout_secs as i64),
            retry: RetryPolicy::new(
                config.retries,
                Duration::from_millis(config.retry_backoff_ms),
            ),
            canonical_tz: parse_timezone(&config.canonical_timezone)?,
            concurrency: config.concurrency.max(1),
            send_timeout: Duration::from_secs(config.send_timeout_secs),
        })
    }
}

/// Counts for one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Due jobs returned by selection.
    pub selected: usize,
    /// Jobs whose lease this cycle claimed.
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Lost the lease race to another invocation.
    pub skipped: usize,
}

enum JobResult {
    Delivered,
    Failed,
    Skipped,
    /// Store failure before the lease was held.
    Unclaimed,
}

/// Runs dispatch cycles: select due jobs, then claim, send, reschedule and
/// release each one.
pub struct DispatchEngine {
    store: Arc<dyn JobStore>,
    leases: LeaseManager,
    dispatcher: ContentDispatcher,
    config: EngineConfig,
}

impl DispatchEngine {
    pub fn new(
        store: Arc<dyn JobStore>,
        gateway: Arc<dyn MessagingGateway>,
        config: EngineConfig,
    ) -> Self {
        let leases = LeaseManager::new(store.clone(), config.lease_timeout, config.canonical_tz);
        let dispatcher = ContentDispatcher::new(gateway, config.send_timeout);
        Self {
            store,
            leases,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process every job due at `now`.
    ///
    /// Only a failed selection is returned as an error; per-job failures are
    /// logged, recorded on the job where possible, and counted.
    pub async fn run_dispatch_cycle(&self, now: DateTime<Utc>) -> Result<CycleSummary> {
        let query = self.leases.due_query(now);
        let due = self.store.find_due(&query).await.map_err(|e| {
            error!(error = %e, "due-job selection failed");
            e
        })?;

        let mut summary = CycleSummary {
            selected: due.len(),
            ..CycleSummary::default()
        };
        if due.is_empty() {
            return Ok(summary);
        }

        let results: Vec<JobResult> = stream::iter(due)
            .map(|job| self.process_job(job, now))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                JobResult::Delivered => {
                    summary.processed += 1;
                    summary.succeeded += 1;
                }
                JobResult::Failed => {
                    summary.processed += 1;
                    summary.failed += 1;
                }
                JobResult::Skipped => summary.skipped += 1,
                JobResult::Unclaimed => summary.failed += 1,
            }
        }

        info!(
            selected = summary.selected,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "dispatch cycle complete"
        );
        Ok(summary)
    }

    async fn process_job(&self, job: Job, now: DateTime<Utc>) -> JobResult {
        let lease = match self.leases.claim(&job.id, now).await {
            Ok(Some(lease)) => lease,
            Ok(None) => return JobResult::Skipped,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "lease claim failed");
                return JobResult::Unclaimed;
            }
        };
        let started = Instant::now();
        let now_ts = format_timestamp(now, self.config.canonical_tz);

        let outcome: Option<AttemptOutcome> = match validate(&job.crontab) {
            Ok(()) => Some(
                self.config
                    .retry
                    .attempt(&self.dispatcher, &job, &now_ts)
                    .await,
            ),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "invalid crontab, not sending");
                None
            }
        };

        let delivered = outcome.as_ref().is_some_and(|o| o.delivered.is_some());
        if delivered {
            self.dispatcher.delete_previous(&job).await;
        }

        // evaluate after the send so the next run is in the future of completion
        let elapsed = chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        let update = finalize(&job, outcome.as_ref(), self.config.canonical_tz, now + elapsed);
        if let Err(e) = self.leases.release(&lease, &update).await {
            error!(job_id = %job.id, error = %e, "final write failed; lease will expire");
        }

        if delivered {
            JobResult::Delivered
        } else {
            JobResult::Failed
        }
    }
}
