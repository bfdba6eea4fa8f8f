use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Environment(#[from] envy::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    /// Base URL of the analytics API, without a trailing slash.
    pub api_url: String,
    pub request_timeout_ms: u64,
    /// Cadence for the maintenance, anomaly and yield feeds.
    pub fast_poll_interval_ms: u64,
    /// Cadence for the overview and statistics feeds.
    pub slow_poll_interval_ms: u64,
    /// Cadence for the notification source feed; 0 polls on demand only.
    pub notification_poll_interval_ms: u64,
    pub log_dir: String,
    pub status_report_interval_secs: u64,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
pub(crate) struct PartialDashboardConfig {
    api_url: Option<String>,
    request_timeout_ms: Option<u64>,
    fast_poll_interval_ms: Option<u64>,
    slow_poll_interval_ms: Option<u64>,
    notification_poll_interval_ms: Option<u64>,
    log_dir: Option<String>,
    status_report_interval_secs: Option<u64>,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_FAST_POLL_INTERVAL_MS: u64 = 15_000;
const DEFAULT_SLOW_POLL_INTERVAL_MS: u64 = 30_000;
const DEFAULT_NOTIFICATION_POLL_INTERVAL_MS: u64 = 30_000;
const DEFAULT_STATUS_REPORT_INTERVAL_SECS: u64 = 30;

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            fast_poll_interval_ms: DEFAULT_FAST_POLL_INTERVAL_MS,
            slow_poll_interval_ms: DEFAULT_SLOW_POLL_INTERVAL_MS,
            notification_poll_interval_ms: DEFAULT_NOTIFICATION_POLL_INTERVAL_MS,
            log_dir: default_log_dir(),
            status_report_interval_secs: DEFAULT_STATUS_REPORT_INTERVAL_SECS,
        }
    }
}

impl DashboardConfig {
    /// Loads configuration from an optional TOML file and the environment.
    /// Environment variables override file values, which override defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path) => Self::read_file(Path::new(path))?,
            None => PartialDashboardConfig::default(),
        };
        let env_config: PartialDashboardConfig = envy::from_env()?;

        Self::from_layers(env_config, file_config)
    }

    fn read_file(path: &Path) -> Result<PartialDashboardConfig, ConfigError> {
        if !path.exists() {
            return Ok(PartialDashboardConfig::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub(crate) fn from_layers(
        env_config: PartialDashboardConfig,
        file_config: PartialDashboardConfig,
    ) -> Result<Self, ConfigError> {
        let api_url = env_config
            .api_url
            .or(file_config.api_url)
            .unwrap_or_else(default_api_url)
            .trim_end_matches('/')
            .to_string();
        if api_url.is_empty() {
            return Err(ConfigError::Invalid("API_URL must not be empty".to_string()));
        }

        let config = DashboardConfig {
            api_url,
            request_timeout_ms: env_config
                .request_timeout_ms
                .or(file_config.request_timeout_ms)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            fast_poll_interval_ms: env_config
                .fast_poll_interval_ms
                .or(file_config.fast_poll_interval_ms)
                .unwrap_or(DEFAULT_FAST_POLL_INTERVAL_MS),
            slow_poll_interval_ms: env_config
                .slow_poll_interval_ms
                .or(file_config.slow_poll_interval_ms)
                .unwrap_or(DEFAULT_SLOW_POLL_INTERVAL_MS),
            notification_poll_interval_ms: env_config
                .notification_poll_interval_ms
                .or(file_config.notification_poll_interval_ms)
                .unwrap_or(DEFAULT_NOTIFICATION_POLL_INTERVAL_MS),
            log_dir: env_config
                .log_dir
                .or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
            status_report_interval_secs: env_config
                .status_report_interval_secs
                .or(file_config.status_report_interval_secs)
                .unwrap_or(DEFAULT_STATUS_REPORT_INTERVAL_SECS),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "REQUEST_TIMEOUT_MS must be greater than zero".to_string(),
            ));
        }
        if self.fast_poll_interval_ms == 0 || self.slow_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "Polling intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn status_report_interval(&self) -> Duration {
        Duration::from_secs(self.status_report_interval_secs.max(1))
    }
}
