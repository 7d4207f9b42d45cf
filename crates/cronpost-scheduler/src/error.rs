use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Store backends other than SQLite report their failures as text.
    #[error("Store error: {0}")]
    Store(String),

    /// The crontab cannot be parsed or has no future occurrence.
    #[error("Invalid crontab `{crontab}`: {reason}")]
    InvalidCrontab { crontab: String, reason: String },

    /// Not an IANA timezone name known to chrono-tz.
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// `jobname` must be unique within a chat.
    #[error("Job name already used in chat {chat_id}: {jobname}")]
    DuplicateJobName { chat_id: i64, jobname: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SchedulerError {
    pub(crate) fn invalid_crontab(crontab: &str, reason: impl Into<String>) -> Self {
        SchedulerError::InvalidCrontab {
            crontab: crontab.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
