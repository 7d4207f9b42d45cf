use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::{
    crontab::{format_timestamp, next_run, parse_timezone},
    retry::AttemptOutcome,
    store::{FinalUpdate, ScheduleUpdate},
    types::{ErrorRecord, Job},
};

/// The chat's zone, or `canonical` when the chat has none (or an unknown one).
pub fn job_timezone(job: &Job, canonical: Tz) -> Tz {
    if job.timezone.is_empty() {
        return canonical;
    }
    parse_timezone(&job.timezone).unwrap_or_else(|e| {
        warn!(job_id = %job.id, timezone = %job.timezone, error = %e, "falling back to canonical timezone");
        canonical
    })
}

/// Build the single write that closes a claimed job's cycle.
///
/// `outcome` is `None` when nothing was sent (the crontab failed validation).
/// The next run is evaluated strictly after `reference`; an invalid crontab
/// keeps the stored schedule and adds an error record instead.
pub fn finalize(
    job: &Job,
    outcome: Option<&AttemptOutcome>,
    canonical: Tz,
    reference: DateTime<Utc>,
) -> FinalUpdate {
    let now_ts = format_timestamp(reference, canonical);
    let mut append_errors: Vec<ErrorRecord> = outcome
        .and_then(|o| o.error.clone())
        .into_iter()
        .collect();

    let schedule = match next_run(&job.crontab, job_timezone(job, canonical), canonical, reference) {
        Ok(next) => {
            debug!(job_id = %job.id, nextrun = %next.canonical, user_nextrun = %next.user, "rescheduled");
            Some(ScheduleUpdate {
                nextrun_ts: next.canonical,
                user_nextrun_ts: next.user,
            })
        }
        Err(e) => {
            warn!(job_id = %job.id, crontab = %job.crontab, error = %e, "cannot reschedule");
            append_errors.push(ErrorRecord {
                error: e.to_string(),
                timestamp: now_ts.clone(),
            });
            None
        }
    };

    FinalUpdate {
        schedule,
        previous_message_id: outcome.and_then(|o| o.delivered.clone()),
        append_errors,
        last_update_ts: now_ts,
    }
}
