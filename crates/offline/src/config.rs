//! Runtime configuration loaded from `TABLESIDE_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use tableside_observability::{LogConfig, LogFormat};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            reason: reason.into(),
        }
    }
}

pub const DEFAULT_API_URL: &str = "http://localhost:5000";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_url: String,
    pub auth_token: Option<String>,
    /// Upper bound on any single HTTP request, including health probes.
    pub request_timeout: Duration,
    pub probe_interval: Duration,
    /// Delay before a disagreeing connectivity sample is confirmed.
    pub debounce: Duration,
    /// Failed attempts before an operation is dead-lettered. `None` keeps
    /// failing operations queued forever.
    pub max_attempts: Option<u32>,
    /// SQLite file; `None` means the OS data directory default.
    pub db_path: Option<PathBuf>,
    pub log: LogConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            auth_token: None,
            request_timeout: Duration::from_millis(10_000),
            probe_interval: Duration::from_millis(15_000),
            debounce: Duration::from_millis(2_000),
            max_attempts: None,
            db_path: None,
            log: LogConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through `lookup`; unset and blank values use defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = get("TABLESIDE_API_URL") {
            let url = url.trim().trim_end_matches('/').to_string();
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::invalid("TABLESIDE_API_URL", "expected an http(s) URL"));
            }
            config.api_url = url;
        }
        config.auth_token = get("TABLESIDE_AUTH_TOKEN");

        if let Some(raw) = get("TABLESIDE_REQUEST_TIMEOUT_MS") {
            config.request_timeout = parse_millis("TABLESIDE_REQUEST_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = get("TABLESIDE_PROBE_INTERVAL_MS") {
            config.probe_interval = parse_millis("TABLESIDE_PROBE_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = get("TABLESIDE_DEBOUNCE_MS") {
            config.debounce = Duration::from_millis(parse_u64("TABLESIDE_DEBOUNCE_MS", &raw)?);
        }
        if let Some(raw) = get("TABLESIDE_MAX_ATTEMPTS") {
            let n = parse_u64("TABLESIDE_MAX_ATTEMPTS", &raw)?;
            let n = u32::try_from(n)
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::invalid("TABLESIDE_MAX_ATTEMPTS", "expected 1..=u32::MAX"))?;
            config.max_attempts = Some(n);
        }
        if let Some(path) = get("TABLESIDE_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = get("TABLESIDE_LOG_FORMAT") {
            let format: LogFormat = raw
                .parse()
                .map_err(|e| ConfigError::invalid("TABLESIDE_LOG_FORMAT", format!("{e}")))?;
            config.log = config.log.with_format(format);
        }

        Ok(config)
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }
}

fn parse_u64(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::invalid(var, format!("{raw:?}: {e}")))
}

fn parse_millis(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    match parse_u64(var, raw)? {
        0 => Err(ConfigError::invalid(var, "must be greater than zero")),
        ms => Ok(Duration::from_millis(ms)),
    }
}
