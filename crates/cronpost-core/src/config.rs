use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 300; // a claimed job becomes reclaimable after 5 min
pub const DEFAULT_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
pub const DEFAULT_CANONICAL_TIMEZONE: &str = "UTC";
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Top-level config (cronpost.toml + CRONPOST_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronpostConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Knobs of the dispatch engine. Converted into the scheduler's `EngineConfig`
/// once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Seconds after which an unreleased `pending_ts` lease counts as stale.
    #[serde(default = "default_lease_timeout_secs")]
    pub lease_timeout_secs: u64,
    /// Maximum send attempts per job per cycle (transient failures only).
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Base back-off between attempts; attempt `n` waits `n * retry_backoff_ms`.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// IANA zone in which `nextrun_ts` / `pending_ts` are stored and compared.
    /// Should not observe DST so that string order equals time order.
    #[serde(default = "default_canonical_timezone")]
    pub canonical_timezone: String,
    /// Jobs processed in parallel within one cycle.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Upper bound on a single gateway call.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            lease_timeout_secs: DEFAULT_LEASE_TIMEOUT_SECS,
            retries: DEFAULT_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            canonical_timezone: DEFAULT_CANONICAL_TIMEZONE.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            send_timeout_secs: DEFAULT_SEND_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// How long SQLite waits on a locked database before failing the statement.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Default sender identity. Jobs may override it with `user_bot_token`.
    #[serde(default)]
    pub bot_token: String,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_telegram_api_base(),
        }
    }
}

/// HTTP trigger endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// When set, `POST /dispatch` requires `Authorization: Bearer <token>`.
    pub trigger_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            trigger_token: None,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_lease_timeout_secs() -> u64 {
    DEFAULT_LEASE_TIMEOUT_SECS
}
fn default_retries() -> u32 {
    DEFAULT_RETRIES
}
fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}
fn default_canonical_timezone() -> String {
    DEFAULT_CANONICAL_TIMEZONE.to_string()
}
fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}
fn default_send_timeout_secs() -> u64 {
    DEFAULT_SEND_TIMEOUT_SECS
}
fn default_telegram_api_base() -> String {
    DEFAULT_TELEGRAM_API_BASE.to_string()
}
fn default_busy_timeout_ms() -> u64 {
    5_000
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronpost/cronpost.db", home)
}

impl CronpostConfig {
    /// Load config from a TOML file with CRONPOST_* env var overrides.
    ///
    /// Nested keys use a double underscore: `CRONPOST_DISPATCH__RETRIES=3`.
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        let config: CronpostConfig = Figment::from(Serialized::defaults(CronpostConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CRONPOST_").split("__"))
            .extract()
            .map_err(|e| crate::error::CronpostError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::CronpostError;

        if self.dispatch.retries == 0 {
            return Err(CronpostError::Config(
                "dispatch.retries must be at least 1".to_string(),
            ));
        }
        if self.dispatch.concurrency == 0 {
            return Err(CronpostError::Config(
                "dispatch.concurrency must be at least 1".to_string(),
            ));
        }
        if self.dispatch.lease_timeout_secs == 0 {
            return Err(CronpostError::Config(
                "dispatch.lease_timeout_secs must be positive".to_string(),
            ));
        }
        // a lease that can expire mid-send lets a second invocation resend
        let worst_send = u64::from(self.dispatch.retries) * self.dispatch.send_timeout_secs;
        if self.dispatch.lease_timeout_secs <= worst_send {
            return Err(CronpostError::Config(format!(
                "dispatch.lease_timeout_secs ({}) must exceed retries * send_timeout_secs ({worst_send})",
                self.dispatch.lease_timeout_secs
            )));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronpost/cronpost.toml", home)
}
