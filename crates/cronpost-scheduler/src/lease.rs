use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::{
    crontab::format_timestamp,
    error::Result,
    store::{DueQuery, FinalUpdate, JobStore, Lease},
};

/// Claims and releases the per-job `pending_ts` lease.
///
/// Both operations are single conditional store updates; nothing here reads
/// lease state and then writes it.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn JobStore>,
    timeout: Duration,
    canonical_tz: Tz,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn JobStore>, timeout: Duration, canonical_tz: Tz) -> Self {
        Self {
            store,
            timeout,
            canonical_tz,
        }
    }

    /// `now` and the lease expiry cutoff, rendered the way the store compares them.
    pub fn due_query(&self, now: DateTime<Utc>) -> DueQuery {
        DueQuery {
            now: format_timestamp(now, self.canonical_tz),
            stale_before: format_timestamp(now - self.timeout, self.canonical_tz),
        }
    }

    /// `None` means another invocation holds a live lease; skip the job.
    pub async fn claim(&self, job_id: &str, now: DateTime<Utc>) -> Result<Option<Lease>> {
        let lease = self.store.claim_lease(job_id, &self.due_query(now)).await?;
        if lease.is_none() {
            debug!(job_id = %job_id, "lease held elsewhere, skipping");
        }
        Ok(lease)
    }

    /// Commit the cycle's outcome; clearing `pending_ts` is part of the same write.
    pub async fn release(&self, lease: &Lease, update: &FinalUpdate) -> Result<bool> {
        let written = self.store.write_final(lease, update).await?;
        if !written {
            warn!(
                job_id = %lease.job_id,
                pending_ts = %lease.pending_ts,
                "lease expired before final write; outcome discarded"
            );
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crontab::{next_run, parse_timestamp};
    use crate::db::SqliteJobStore;
    use crate::types::{ContentType, NewJob};

    fn at(s: &str) -> DateTime<Utc> {
        parse_timestamp(s, chrono_tz::UTC).unwrap()
    }

    #[test]
    fn due_query_renders_cutoff_in_canonical_zone() {
        let store = Arc::new(SqliteJobStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap());
        let leases = LeaseManager::new(store, Duration::minutes(5), chrono_tz::Asia::Singapore);
        let q = leases.due_query(at("2026-10-19 01:00:00"));
        assert_eq!(q.now, "2026-10-19 09:00:00");
        assert_eq!(q.stale_before, "2026-10-19 08:55:00");
    }

    #[tokio::test]
    async fn second_claim_before_release_fails() {
        let store = Arc::new(SqliteJobStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap());
        let job = store
            .add_job(
                &NewJob {
                    chat_id: 1,
                    channel_id: None,
                    jobname: "j".to_string(),
                    content: "hi".to_string(),
                    content_type: ContentType::Text,
                    photo_id: String::new(),
                    photo_group_id: String::new(),
                    option_delete_previous: false,
                    user_bot_token: None,
                    message_thread_id: None,
                    created_by: 1,
                },
                "2026-10-01 00:00:00",
            )
            .unwrap();
        let first_run = next_run("0 9 * * *", chrono_tz::UTC, chrono_tz::UTC, at("2026-10-18 09:00:00")).unwrap();
        store
            .set_schedule(&job.id, "0 9 * * *", &first_run, 1, "2026-10-01 00:00:00")
            .unwrap();
        let leases = LeaseManager::new(store.clone(), Duration::minutes(5), chrono_tz::UTC);
        let now = at("2026-10-19 09:00:00");

        let first = leases.claim(&job.id, now).await.unwrap();
        assert!(first.is_some());
        assert!(leases.claim(&job.id, now).await.unwrap().is_none());
        // still held four minutes later
        assert!(leases
            .claim(&job.id, now + Duration::minutes(4))
            .await
            .unwrap()
            .is_none());

        let update = FinalUpdate {
            last_update_ts: "2026-10-19 09:00:05".to_string(),
            ..FinalUpdate::default()
        };
        assert!(leases.release(&first.unwrap(), &update).await.unwrap());
        assert!(leases.claim(&job.id, now).await.unwrap().is_some());
    }
}
