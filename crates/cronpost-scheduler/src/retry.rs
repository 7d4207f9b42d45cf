use std::time::Duration;

use tracing::{info, warn};

use crate::{
    dispatch::{ContentDispatcher, DispatchError},
    types::{ErrorRecord, Job},
};

/// Result of one job's delivery within a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// Delivered message id(s) on success.
    pub delivered: Option<String>,
    /// At most one record per cycle, describing the last failure.
    pub error: Option<ErrorRecord>,
    pub attempts: u32,
}

/// Bounded retry for transient delivery failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum send attempts per cycle; never less than one.
    pub retries: u32,
    /// Linear back-off step: the wait after attempt `n` is `backoff * n`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self {
            retries: retries.max(1),
            backoff,
        }
    }

    /// Send `job`, retrying transient failures up to the ceiling.
    ///
    /// `recorded_at` is the canonical timestamp stamped on the error record.
    pub async fn attempt(
        &self,
        dispatcher: &ContentDispatcher,
        job: &Job,
        recorded_at: &str,
    ) -> AttemptOutcome {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match dispatcher.send(job).await {
                Ok(delivered) => {
                    info!(job_id = %job.id, attempt, message_id = %delivered, "job delivered");
                    return AttemptOutcome {
                        delivered: Some(delivered),
                        error: None,
                        attempts: attempt,
                    };
                }
                Err(e) if e.is_transient() && attempt < self.retries => {
                    warn!(
                        job_id = %job.id,
                        attempt,
                        status = ?e.status(),
                        error = %e,
                        "transient send failure, retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(e) => {
                    warn!(
                        job_id = %job.id,
                        attempt,
                        status = ?e.status(),
                        transient = e.is_transient(),
                        error = %e,
                        "send failed"
                    );
                    return AttemptOutcome {
                        delivered: None,
                        error: Some(error_record(&e, attempt, recorded_at)),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}

fn error_record(err: &DispatchError, attempts: u32, recorded_at: &str) -> ErrorRecord {
    let plural = if attempts == 1 { "" } else { "s" };
    ErrorRecord {
        error: format!("send failed after {attempts} attempt{plural}: {err}"),
        timestamp: recorded_at.to_string(),
    }
}
