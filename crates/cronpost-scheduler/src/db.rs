use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    crontab::NextRun,
    error::{Result, SchedulerError},
    store::{DueQuery, FinalUpdate, JobStore, Lease},
    types::{ContentType, ErrorRecord, Job, NewJob},
};

/// Initialise the cronpost schema in `conn`.
///
/// Creates the `jobs` and `chats` tables (idempotent). Every `*_ts` column is
/// `''` when unset so the due-job predicate is plain string comparison.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id                      TEXT    NOT NULL PRIMARY KEY,
            chat_id                 INTEGER NOT NULL,
            channel_id              INTEGER,
            jobname                 TEXT    NOT NULL,
            crontab                 TEXT    NOT NULL DEFAULT '',
            nextrun_ts              TEXT    NOT NULL DEFAULT '',  -- canonical timezone
            user_nextrun_ts         TEXT    NOT NULL DEFAULT '',  -- chat timezone
            paused_ts               TEXT    NOT NULL DEFAULT '',
            content                 TEXT    NOT NULL DEFAULT '',
            content_type            TEXT    NOT NULL DEFAULT 'text',
            photo_id                TEXT    NOT NULL DEFAULT '',  -- ';'-joined for groups
            photo_group_id          TEXT    NOT NULL DEFAULT '',
            previous_message_id     TEXT    NOT NULL DEFAULT '',
            option_delete_previous  INTEGER NOT NULL DEFAULT 0,
            user_bot_token          TEXT,
            message_thread_id       INTEGER,
            pending_ts              TEXT    NOT NULL DEFAULT '',  -- lease
            removed_ts              TEXT    NOT NULL DEFAULT '',
            errors                  TEXT    NOT NULL DEFAULT '[]', -- JSON array of {error, timestamp}
            created_by              INTEGER NOT NULL DEFAULT 0,
            last_updated_by         INTEGER NOT NULL DEFAULT 0,
            created_ts              TEXT    NOT NULL,
            last_update_ts          TEXT    NOT NULL
        ) STRICT;

        -- jobname is the human handle within a chat; removed jobs free it
        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_chat_jobname
            ON jobs (chat_id, jobname) WHERE removed_ts = '';

        -- due-job scan: WHERE removed_ts = '' AND paused_ts = '' AND nextrun_ts <= ?
        CREATE INDEX IF NOT EXISTS idx_jobs_due
            ON jobs (removed_ts, paused_ts, nextrun_ts);

        CREATE TABLE IF NOT EXISTS chats (
            chat_id     INTEGER NOT NULL PRIMARY KEY,
            timezone    TEXT    NOT NULL,
            updated_ts  TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}

const JOB_COLUMNS: &str = "
    j.id, j.chat_id, j.channel_id, j.jobname, j.crontab, j.nextrun_ts,
    j.user_nextrun_ts, j.paused_ts, j.content, j.content_type, j.photo_id,
    j.photo_group_id, j.previous_message_id, j.option_delete_previous,
    j.user_bot_token, j.message_thread_id, j.pending_ts, j.removed_ts, j.errors,
    j.created_by, j.last_updated_by, j.created_ts, j.last_update_ts,
    COALESCE(c.timezone, '') AS timezone";

impl ToSql for ContentType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for ContentType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let errors_json: String = row.get("errors")?;
    let errors: Vec<ErrorRecord> = serde_json::from_str(&errors_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(18, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Job {
        id: row.get("id")?,
        chat_id: row.get("chat_id")?,
        channel_id: row.get("channel_id")?,
        jobname: row.get("jobname")?,
        crontab: row.get("crontab")?,
        nextrun_ts: row.get("nextrun_ts")?,
        user_nextrun_ts: row.get("user_nextrun_ts")?,
        paused_ts: row.get("paused_ts")?,
        timezone: row.get("timezone")?,
        content: row.get("content")?,
        content_type: row.get("content_type")?,
        photo_id: row.get("photo_id")?,
        photo_group_id: row.get("photo_group_id")?,
        previous_message_id: row.get("previous_message_id")?,
        option_delete_previous: row.get("option_delete_previous")?,
        user_bot_token: row.get("user_bot_token")?,
        message_thread_id: row.get("message_thread_id")?,
        pending_ts: row.get("pending_ts")?,
        removed_ts: row.get("removed_ts")?,
        errors,
        created_by: row.get("created_by")?,
        last_updated_by: row.get("last_updated_by")?,
        created_ts: row.get("created_ts")?,
        last_update_ts: row.get("last_update_ts")?,
    })
}

/// SQLite-backed [`JobStore`] plus the management calls used by the operator CLI.
///
/// Thread-safe: the connection sits behind a Mutex that is never held across an await.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the database file at `path` in WAL mode with a bounded busy wait.
    pub fn open(path: &str, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    /// Insert a job without a schedule (`crontab = ''`); it is not due until
    /// [`set_schedule`](Self::set_schedule) attaches one.
    pub fn add_job(&self, new: &NewJob, now_ts: &str) -> Result<Job> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn.lock().unwrap();
            let taken: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM jobs
                 WHERE chat_id = ?1 AND jobname = ?2 AND removed_ts = '')",
                rusqlite::params![new.chat_id, new.jobname],
                |row| row.get(0),
            )?;
            if taken {
                return Err(SchedulerError::DuplicateJobName {
                    chat_id: new.chat_id,
                    jobname: new.jobname.clone(),
                });
            }

            conn.execute(
                "INSERT INTO jobs
                 (id, chat_id, channel_id, jobname, content, content_type, photo_id,
                  photo_group_id, option_delete_previous, user_bot_token, message_thread_id,
                  created_by, last_updated_by, created_ts, last_update_ts)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?12,?13,?13)",
                rusqlite::params![
                    id,
                    new.chat_id,
                    new.channel_id,
                    new.jobname,
                    new.content,
                    new.content_type,
                    new.photo_id,
                    new.photo_group_id,
                    new.option_delete_previous,
                    new.user_bot_token,
                    new.message_thread_id,
                    new.created_by,
                    now_ts,
                ],
            )?;
        }
        info!(job_id = %id, chat_id = new.chat_id, jobname = %new.jobname, "job added");
        self.get_job(&id)
    }

    pub fn get_job(&self, id: &str) -> Result<Job> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs j LEFT JOIN chats c ON c.chat_id = j.chat_id WHERE j.id = ?1"),
            [id],
            job_from_row,
        )
        .optional()?
        .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
    }

    /// Jobs that are not removed, oldest first, optionally for one chat.
    pub fn list_jobs(&self, chat_id: Option<i64>) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs j LEFT JOIN chats c ON c.chat_id = j.chat_id
             WHERE j.removed_ts = '' AND (?1 IS NULL OR j.chat_id = ?1)
             ORDER BY j.created_ts, j.rowid"
        ))?;
        let jobs = stmt
            .query_map([chat_id], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    /// Attach or replace the crontab and its first evaluated run.
    pub fn set_schedule(&self, id: &str, crontab: &str, next: &NextRun, updated_by: i64, now_ts: &str) -> Result<()> {
        self.update_one(
            id,
            "UPDATE jobs SET crontab = ?2, nextrun_ts = ?3, user_nextrun_ts = ?4,
                 last_updated_by = ?5, last_update_ts = ?6
             WHERE id = ?1 AND removed_ts = ''",
            rusqlite::params![id, crontab, next.canonical, next.user, updated_by, now_ts],
        )?;
        info!(job_id = %id, %crontab, nextrun = %next.canonical, "job schedule set");
        Ok(())
    }

    pub fn pause_job(&self, id: &str, updated_by: i64, now_ts: &str) -> Result<()> {
        self.update_one(
            id,
            "UPDATE jobs SET paused_ts = ?2, last_updated_by = ?3, last_update_ts = ?2
             WHERE id = ?1 AND removed_ts = ''",
            rusqlite::params![id, now_ts, updated_by],
        )?;
        info!(job_id = %id, "job paused");
        Ok(())
    }

    /// Unpause with a freshly evaluated run so a long pause does not fire immediately.
    pub fn resume_job(&self, id: &str, next: &NextRun, updated_by: i64, now_ts: &str) -> Result<()> {
        self.update_one(
            id,
            "UPDATE jobs SET paused_ts = '', nextrun_ts = ?2, user_nextrun_ts = ?3,
                 last_updated_by = ?4, last_update_ts = ?5
             WHERE id = ?1 AND removed_ts = ''",
            rusqlite::params![id, next.canonical, next.user, updated_by, now_ts],
        )?;
        info!(job_id = %id, nextrun = %next.canonical, "job resumed");
        Ok(())
    }

    /// Soft delete; the row stays for audit and is never selected again.
    pub fn remove_job(&self, id: &str, updated_by: i64, now_ts: &str) -> Result<()> {
        self.update_one(
            id,
            "UPDATE jobs SET removed_ts = ?2, last_updated_by = ?3, last_update_ts = ?2
             WHERE id = ?1 AND removed_ts = ''",
            rusqlite::params![id, now_ts, updated_by],
        )?;
        info!(job_id = %id, "job removed");
        Ok(())
    }

    pub fn set_chat_timezone(&self, chat_id: i64, timezone: &str, now_ts: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chats (chat_id, timezone, updated_ts) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET timezone = excluded.timezone,
                                                updated_ts = excluded.updated_ts",
            rusqlite::params![chat_id, timezone, now_ts],
        )?;
        info!(chat_id, %timezone, "chat timezone set");
        Ok(())
    }

    /// The chat's stored IANA timezone, if one was ever set.
    pub fn chat_timezone(&self, chat_id: i64) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let tz = conn
            .query_row(
                "SELECT timezone FROM chats WHERE chat_id = ?1",
                [chat_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(tz)
    }

    fn update_one(&self, id: &str, sql: &str, params: impl rusqlite::Params) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(sql, params)?;
        if n == 0 {
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn find_due(&self, query: &DueQuery) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs j LEFT JOIN chats c ON c.chat_id = j.chat_id
             WHERE j.removed_ts = '' AND j.crontab != '' AND j.paused_ts = ''
               AND j.nextrun_ts != '' AND j.nextrun_ts <= ?1
               AND (j.pending_ts = '' OR j.pending_ts < ?2)
             ORDER BY j.created_ts, j.rowid"
        ))?;

        let mut jobs = Vec::new();
        for row in stmt.query_map(rusqlite::params![query.now, query.stale_before], job_from_row)? {
            match row {
                Ok(job) => jobs.push(job),
                // one corrupt row must not hide every other due job
                Err(e) => warn!(error = %e, "skipping unreadable job row"),
            }
        }
        debug!(count = jobs.len(), now = %query.now, "due jobs selected");
        Ok(jobs)
    }

    async fn claim_lease(&self, job_id: &str, query: &DueQuery) -> Result<Option<Lease>> {
        let conn = self.conn.lock().unwrap();
        // the selection may be stale by now; claim only what is still due
        let n = conn.execute(
            "UPDATE jobs SET pending_ts = ?1
             WHERE id = ?2 AND removed_ts = '' AND crontab != '' AND paused_ts = ''
               AND nextrun_ts != '' AND nextrun_ts <= ?1
               AND (pending_ts = '' OR pending_ts < ?3)",
            rusqlite::params![query.now, job_id, query.stale_before],
        )?;
        Ok((n == 1).then(|| Lease {
            job_id: job_id.to_string(),
            pending_ts: query.now.clone(),
        }))
    }

    async fn write_final(&self, lease: &Lease, update: &FinalUpdate) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT errors FROM jobs WHERE id = ?1 AND pending_ts = ?2",
                rusqlite::params![lease.job_id, lease.pending_ts],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            return Ok(false);
        };

        let mut errors: Vec<ErrorRecord> = serde_json::from_str(&current)?;
        errors.extend(update.append_errors.iter().cloned());
        let errors_json = serde_json::to_string(&errors)?;

        let (nextrun, user_nextrun) = match &update.schedule {
            Some(s) => (Some(s.nextrun_ts.as_str()), Some(s.user_nextrun_ts.as_str())),
            None => (None, None),
        };

        tx.execute(
            "UPDATE jobs SET
                 nextrun_ts = COALESCE(?1, nextrun_ts),
                 user_nextrun_ts = COALESCE(?2, user_nextrun_ts),
                 previous_message_id = COALESCE(?3, previous_message_id),
                 errors = ?4,
                 pending_ts = '',
                 last_update_ts = ?5
             WHERE id = ?6 AND pending_ts = ?7",
            rusqlite::params![
                nextrun,
                user_nextrun,
                update.previous_message_id,
                errors_json,
                update.last_update_ts,
                lease.job_id,
                lease.pending_ts,
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScheduleUpdate;

    const NOW: &str = "2026-10-19 09:00:00";
    const STALE_BEFORE: &str = "2026-10-19 08:55:00";

    fn store() -> SqliteJobStore {
        SqliteJobStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn query() -> DueQuery {
        DueQuery {
            now: NOW.to_string(),
            stale_before: STALE_BEFORE.to_string(),
        }
    }

    fn new_job(chat_id: i64, name: &str) -> NewJob {
        NewJob {
            chat_id,
            channel_id: None,
            jobname: name.to_string(),
            content: "<b>hello</b>".to_string(),
            content_type: ContentType::Text,
            photo_id: String::new(),
            photo_group_id: String::new(),
            option_delete_previous: false,
            user_bot_token: None,
            message_thread_id: None,
            created_by: 7,
        }
    }

    fn next(canonical: &str) -> NextRun {
        NextRun {
            instant: crate::crontab::parse_timestamp(canonical, chrono_tz::UTC).unwrap(),
            canonical: canonical.to_string(),
            user: canonical.to_string(),
        }
    }

    /// A job scheduled at `nextrun`, created at `created`.
    fn scheduled(store: &SqliteJobStore, name: &str, created: &str, nextrun: &str) -> Job {
        let job = store.add_job(&new_job(1, name), created).unwrap();
        store
            .set_schedule(&job.id, "0 9 * * *", &next(nextrun), 7, created)
            .unwrap();
        store.get_job(&job.id).unwrap()
    }

    fn set_pending(store: &SqliteJobStore, id: &str, pending_ts: &str) {
        let conn = store.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET pending_ts = ?1 WHERE id = ?2",
            rusqlite::params![pending_ts, id],
        )
        .unwrap();
    }

    async fn due_ids(store: &SqliteJobStore) -> Vec<String> {
        store.find_due(&query()).await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect()
    }

    #[tokio::test]
    async fn unscheduled_job_is_not_due() {
        let s = store();
        let job = s.add_job(&new_job(1, "draft"), "2026-10-01 00:00:00").unwrap();
        assert_eq!(job.crontab, "");
        assert!(due_ids(&s).await.is_empty());
    }

    #[tokio::test]
    async fn due_predicate_filters_each_condition() {
        let s = store();
        let due = scheduled(&s, "due", "2026-10-01 00:00:00", "2026-10-19 09:00:00");
        let _future = scheduled(&s, "future", "2026-10-01 00:00:01", "2026-10-19 09:01:00");
        let paused = scheduled(&s, "paused", "2026-10-01 00:00:02", "2026-10-19 08:00:00");
        let removed = scheduled(&s, "removed", "2026-10-01 00:00:03", "2026-10-19 08:00:00");
        let leased = scheduled(&s, "leased", "2026-10-01 00:00:04", "2026-10-19 08:00:00");
        let stale = scheduled(&s, "stale", "2026-10-01 00:00:05", "2026-10-19 08:00:00");

        s.pause_job(&paused.id, 7, "2026-10-18 00:00:00").unwrap();
        s.remove_job(&removed.id, 7, "2026-10-18 00:00:00").unwrap();
        set_pending(&s, &leased.id, "2026-10-19 08:58:00");
        set_pending(&s, &stale.id, "2026-10-19 08:50:00");

        assert_eq!(due_ids(&s).await, vec![due.id, stale.id]);
    }

    #[tokio::test]
    async fn due_jobs_come_back_oldest_first() {
        let s = store();
        let newer = scheduled(&s, "newer", "2026-10-02 00:00:00", "2026-10-19 08:00:00");
        let older = scheduled(&s, "older", "2026-10-01 00:00:00", "2026-10-19 08:30:00");
        assert_eq!(due_ids(&s).await, vec![older.id, newer.id]);
    }

    #[tokio::test]
    async fn due_job_carries_chat_timezone() {
        let s = store();
        let job = scheduled(&s, "tz", "2026-10-01 00:00:00", "2026-10-19 08:00:00");
        assert_eq!(s.get_job(&job.id).unwrap().timezone, "");
        s.set_chat_timezone(1, "Asia/Singapore", NOW).unwrap();
        let due = s.find_due(&query()).await.unwrap();
        assert_eq!(due[0].timezone, "Asia/Singapore");
        assert_eq!(s.chat_timezone(1).unwrap().as_deref(), Some("Asia/Singapore"));
        assert_eq!(s.chat_timezone(2).unwrap(), None);
    }

    #[tokio::test]
    async fn claim_succeeds_once() {
        let s = store();
        let job = scheduled(&s, "once", "2026-10-01 00:00:00", "2026-10-19 08:00:00");
        let first = s.claim_lease(&job.id, &query()).await.unwrap();
        let second = s.claim_lease(&job.id, &query()).await.unwrap();
        assert_eq!(
            first,
            Some(Lease {
                job_id: job.id.clone(),
                pending_ts: NOW.to_string()
            })
        );
        assert!(second.is_none());
        assert!(due_ids(&s).await.is_empty());
    }

    #[tokio::test]
    async fn fresh_lease_blocks_claim_and_stale_lease_does_not() {
        let s = store();
        let job = scheduled(&s, "lease", "2026-10-01 00:00:00", "2026-10-19 08:00:00");

        set_pending(&s, &job.id, "2026-10-19 08:57:00");
        assert!(s.claim_lease(&job.id, &query()).await
            .unwrap()
            .is_none());

        set_pending(&s, &job.id, "2026-10-19 08:54:59");
        assert!(s.claim_lease(&job.id, &query()).await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn lease_exactly_at_timeout_is_still_held() {
        let s = store();
        let job = scheduled(&s, "edge", "2026-10-01 00:00:00", "2026-10-19 08:00:00");
        set_pending(&s, &job.id, STALE_BEFORE);
        assert!(due_ids(&s).await.is_empty());
        assert!(s.claim_lease(&job.id, &query()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn job_finished_after_selection_cannot_be_claimed() {
        let s = store();
        let job = scheduled(&s, "raced", "2026-10-01 00:00:00", "2026-10-19 08:00:00");
        // another cycle claims, sends and reschedules it
        let lease = s.claim_lease(&job.id, &query()).await.unwrap().unwrap();
        let update = FinalUpdate {
            schedule: Some(ScheduleUpdate {
                nextrun_ts: "2026-10-20 08:00:00".to_string(),
                user_nextrun_ts: "2026-10-20 08:00:00".to_string(),
            }),
            previous_message_id: Some("1".to_string()),
            last_update_ts: NOW.to_string(),
            ..FinalUpdate::default()
        };
        assert!(s.write_final(&lease, &update).await.unwrap());

        assert_eq!(s.get_job(&job.id).unwrap().pending_ts, "");
        assert!(s.claim_lease(&job.id, &query()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn job_paused_after_selection_cannot_be_claimed() {
        let s = store();
        let job = scheduled(&s, "paused", "2026-10-01 00:00:00", "2026-10-19 08:00:00");
        assert_eq!(due_ids(&s).await, vec![job.id.clone()]);
        s.pause_job(&job.id, 7, "2026-10-19 08:59:00").unwrap();
        assert!(s.claim_lease(&job.id, &query()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unscheduled_job_cannot_be_claimed() {
        let s = store();
        let job = s.add_job(&new_job(1, "draft"), "2026-10-01 00:00:00").unwrap();
        assert!(s.claim_lease(&job.id, &query()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removed_job_cannot_be_claimed() {
        let s = store();
        let job = scheduled(&s, "gone", "2026-10-01 00:00:00", "2026-10-19 08:00:00");
        s.remove_job(&job.id, 7, "2026-10-18 00:00:00").unwrap();
        assert!(s.claim_lease(&job.id, &query()).await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn write_final_commits_and_releases() {
        let s = store();
        let job = scheduled(&s, "final", "2026-10-01 00:00:00", "2026-10-19 08:00:00");
        let lease = s.claim_lease(&job.id, &query()).await
            .unwrap()
            .unwrap();

        let update = FinalUpdate {
            schedule: Some(ScheduleUpdate {
                nextrun_ts: "2026-10-20 08:00:00".to_string(),
                user_nextrun_ts: "2026-10-20 16:00:00".to_string(),
            }),
            previous_message_id: Some("42".to_string()),
            append_errors: vec![ErrorRecord {
                error: "status 500: boom".to_string(),
                timestamp: NOW.to_string(),
            }],
            last_update_ts: NOW.to_string(),
        };
        assert!(s.write_final(&lease, &update).await.unwrap());

        let stored = s.get_job(&job.id).unwrap();
        assert_eq!(stored.pending_ts, "");
        assert_eq!(stored.nextrun_ts, "2026-10-20 08:00:00");
        assert_eq!(stored.user_nextrun_ts, "2026-10-20 16:00:00");
        assert_eq!(stored.previous_message_id, "42");
        assert_eq!(stored.errors.len(), 1);
        assert_eq!(stored.last_update_ts, NOW);

        // a second cycle appends rather than replaces
        set_pending(&s, &job.id, NOW);
        let keep_schedule = FinalUpdate {
            append_errors: vec![ErrorRecord {
                error: "again".to_string(),
                timestamp: NOW.to_string(),
            }],
            last_update_ts: NOW.to_string(),
            ..FinalUpdate::default()
        };
        assert!(s.write_final(&lease, &keep_schedule).await.unwrap());
        let stored = s.get_job(&job.id).unwrap();
        assert_eq!(stored.errors.len(), 2);
        assert_eq!(stored.errors[1].error, "again");
        assert_eq!(stored.nextrun_ts, "2026-10-20 08:00:00");
        assert_eq!(stored.previous_message_id, "42");
    }

    #[tokio::test]
    async fn write_final_rejects_a_lost_lease() {
        let s = store();
        let job = scheduled(&s, "stolen", "2026-10-01 00:00:00", "2026-10-19 08:00:00");
        let lease = s.claim_lease(&job.id, &query()).await
            .unwrap()
            .unwrap();
        // lease expired and another invocation took over
        set_pending(&s, &job.id, "2026-10-19 09:06:00");

        let update = FinalUpdate {
            previous_message_id: Some("99".to_string()),
            last_update_ts: NOW.to_string(),
            ..FinalUpdate::default()
        };
        assert!(!s.write_final(&lease, &update).await.unwrap());
        let stored = s.get_job(&job.id).unwrap();
        assert_eq!(stored.pending_ts, "2026-10-19 09:06:00");
        assert_eq!(stored.previous_message_id, "");
    }

    #[tokio::test]
    async fn jobname_is_unique_per_chat_until_removed() {
        let s = store();
        let job = s.add_job(&new_job(1, "daily"), NOW).unwrap();
        assert!(matches!(
            s.add_job(&new_job(1, "daily"), NOW),
            Err(SchedulerError::DuplicateJobName { .. })
        ));
        assert!(s.add_job(&new_job(2, "daily"), NOW).is_ok());
        assert!(s.add_job(&new_job(1, "Daily"), NOW).is_ok());

        s.remove_job(&job.id, 7, NOW).unwrap();
        assert!(s.add_job(&new_job(1, "daily"), NOW).is_ok());
        assert_eq!(s.list_jobs(Some(1)).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn resume_reschedules() {
        let s = store();
        let job = scheduled(&s, "nap", "2026-10-01 00:00:00", "2026-10-10 09:00:00");
        s.pause_job(&job.id, 7, "2026-10-09 00:00:00").unwrap();
        s.resume_job(&job.id, &next("2026-10-20 09:00:00"), 7, NOW).unwrap();
        let stored = s.get_job(&job.id).unwrap();
        assert_eq!(stored.paused_ts, "");
        assert_eq!(stored.nextrun_ts, "2026-10-20 09:00:00");
        assert!(due_ids(&s).await.is_empty());
    }

    #[tokio::test]
    async fn missing_job_is_reported() {
        let s = store();
        assert!(matches!(
            s.get_job("nope"),
            Err(SchedulerError::JobNotFound { .. })
        ));
        assert!(matches!(
            s.pause_job("nope", 7, NOW),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }
}
