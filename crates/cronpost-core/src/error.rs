use thiserror::Error;

#[derive(Debug, Error)]
pub enum CronpostError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl CronpostError {
    /// Short error code string returned to HTTP trigger callers.
    pub fn code(&self) -> &'static str {
        match self {
            CronpostError::Config(_) => "CONFIG_ERROR",
            CronpostError::Database(_) => "DATABASE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CronpostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_variants() {
        let err = CronpostError::Database("disk I/O error".to_string());
        assert_eq!(err.code(), "DATABASE_ERROR");
        assert_eq!(err.to_string(), "Database error: disk I/O error");
        assert_eq!(CronpostError::Config("bad".to_string()).code(), "CONFIG_ERROR");
    }
}
