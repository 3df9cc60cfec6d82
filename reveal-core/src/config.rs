//! SDK configuration.
//!
//! Defaults match the production SDK; `REVEAL_*` environment variables and
//! TOML files override them. Remote config fetching lives outside the core.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::flags::DetectorFlags;
use crate::transport::retry::RetryPolicy;

pub const DEFAULT_API_BASE_URL: &str = "https://api.reveal.dev";
pub const INGEST_PATH: &str = "/ingest";
pub const DECIDE_PATH: &str = "/decide";

/// Version string sent with every request.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Base URL of the ingestion/decision backend, without trailing slash.
    pub api_base_url: String,
    /// Public client key sent as `X-Reveal-Client-Key`.
    pub client_key: String,
    pub project_id: Option<String>,

    /// Buffer length that triggers a flush.
    pub event_batch_size: usize,
    pub max_flush_interval_ms: u64,
    /// Cap applied when requeueing a failed batch.
    pub max_buffer_size: usize,

    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_ms: u64,
    /// Decisions are latency-critical; a late nudge is worse than none.
    pub decision_timeout_ms: u64,

    /// Timeout for the background `__global__` stall watch.
    pub stall_timeout_ms: u64,
    /// Spawn the stall poll and periodic flush timers on `init()`.
    pub background_tasks: bool,

    pub flags: DetectorFlags,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            client_key: String::new(),
            project_id: None,
            event_batch_size: 20,
            max_flush_interval_ms: 5_000,
            max_buffer_size: 1_000,
            max_retries: 2,
            retry_delay_ms: 1_000,
            request_timeout_ms: 10_000,
            decision_timeout_ms: 2_500,
            stall_timeout_ms: 20_000,
            background_tasks: true,
            flags: DetectorFlags::default(),
        }
    }
}

impl SdkConfig {
    /// Defaults overridden by `REVEAL_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            flags: DetectorFlags::from_env(),
            ..Self::default()
        };
        if let Ok(url) = std::env::var("REVEAL_API_URL") {
            config.api_base_url = url;
        }
        if let Ok(key) = std::env::var("REVEAL_CLIENT_KEY") {
            config.client_key = key;
        }
        if let Ok(project) = std::env::var("REVEAL_PROJECT_ID") {
            config.project_id = Some(project);
        }
        env_parse("REVEAL_EVENT_BATCH_SIZE", &mut config.event_batch_size);
        env_parse("REVEAL_MAX_FLUSH_INTERVAL_MS", &mut config.max_flush_interval_ms);
        env_parse("REVEAL_MAX_BUFFER_SIZE", &mut config.max_buffer_size);
        env_parse("REVEAL_MAX_RETRIES", &mut config.max_retries);
        env_parse("REVEAL_RETRY_DELAY_MS", &mut config.retry_delay_ms);
        env_parse("REVEAL_DECISION_TIMEOUT_MS", &mut config.decision_timeout_ms);
        config
    }

    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if reqwest::Url::parse(&self.api_base_url).is_err() {
            return Err(ConfigError::Invalid {
                field: "api_base_url",
                message: format!("not an absolute URL: {:?}", self.api_base_url),
            });
        }
        if self.event_batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "event_batch_size",
                message: "must be at least 1".into(),
            });
        }
        if self.max_buffer_size < self.event_batch_size {
            return Err(ConfigError::Invalid {
                field: "max_buffer_size",
                message: format!(
                    "{} is smaller than event_batch_size {}",
                    self.max_buffer_size, self.event_batch_size
                ),
            });
        }
        if self.decision_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "timeouts",
                message: "request and decision timeouts must be non-zero".into(),
            });
        }
        Ok(())
    }

    pub fn ingest_url(&self) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), INGEST_PATH)
    }

    pub fn decide_url(&self) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), DECIDE_PATH)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            ..RetryPolicy::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(var, value = %raw, "Ignoring unparseable config override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SdkConfig::default();
        assert_eq!(config.event_batch_size, 20);
        assert_eq!(config.max_flush_interval_ms, 5_000);
        assert_eq!(config.max_buffer_size, 1_000);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.stall_timeout_ms, 20_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_urls_join_without_double_slash() {
        let config = SdkConfig {
            api_base_url: "https://collector.test/".into(),
            ..Default::default()
        };
        assert_eq!(config.ingest_url(), "https://collector.test/ingest");
        assert_eq!(config.decide_url(), "https://collector.test/decide");
    }

    #[test]
    fn test_partial_toml() {
        let config = SdkConfig::from_toml_str(
            r#"
api_base_url = "http://localhost:8787"
client_key = "pk_test"
event_batch_size = 5

[flags]
stall_enabled = false
"#,
        )
        .unwrap();
        assert_eq!(config.client_key, "pk_test");
        assert_eq!(config.event_batch_size, 5);
        assert_eq!(config.max_buffer_size, 1_000);
        assert!(!config.flags.stall_enabled);
        assert!(config.flags.rageclick_enabled);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let err = SdkConfig::from_toml_str("event_batch_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "event_batch_size", .. }));

        let err = SdkConfig::from_toml_str("api_base_url = \"nope\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "api_base_url", .. }));

        let err = SdkConfig::from_toml_str("max_buffer_size = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_buffer_size", .. }));
    }

    #[test]
    fn test_from_toml_file_missing() {
        let err = SdkConfig::from_toml_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reveal.toml");
        std::fs::write(&path, "max_retries = 4\nretry_delay_ms = 250\n").unwrap();
        let config = SdkConfig::from_toml_file(&path).unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 4);
        assert_eq!(policy.retry_delay_ms, 250);
    }
}
