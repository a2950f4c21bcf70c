use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};

use crate::kernel::settings::Settings;

pub const DEFAULT_CDN_HOST: &str = "cdn-settings.segment.com/v1";
pub const DEFAULT_API_HOST: &str = "api.segment.io/v1";
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("write key must not be empty")]
    EmptyWriteKey,
    #[error("settings refresh interval must be non-zero")]
    ZeroRefreshInterval,
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tenant-level configuration supplied by the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub write_key: String,
    #[serde(default = "default_cdn_host")]
    pub cdn_host: String,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_true")]
    pub auto_add_segment_destination: bool,
    /// Seeded into the system slice before the first fetch.
    #[serde(default)]
    pub default_settings: Option<Settings>,
    /// Periodic refresh cadence (e.g. `"5m"`). `None` refreshes only at start.
    #[serde(default, with = "humantime_serde")]
    pub settings_refresh_interval: Option<Duration>,
    #[serde(default = "default_fetch_timeout", with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Configuration {
    pub fn new(write_key: impl Into<String>) -> Self {
        Self {
            write_key: write_key.into(),
            cdn_host: default_cdn_host(),
            api_host: default_api_host(),
            auto_add_segment_destination: true,
            default_settings: None,
            settings_refresh_interval: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let configuration: Self = serde_json::from_str(raw)?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_key.trim().is_empty() {
            return Err(ConfigError::EmptyWriteKey);
        }
        if self.settings_refresh_interval == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroRefreshInterval);
        }
        Ok(())
    }
}

/// The two logical contexts work is split across.
///
/// `io` runs network fetches and parsing; `dispatch` runs store commits and
/// plugin notification. They may be the same runtime.
#[derive(Debug, Clone)]
pub struct ExecutionContexts {
    pub io: Handle,
    pub dispatch: Handle,
}

impl ExecutionContexts {
    pub fn new(io: Handle, dispatch: Handle) -> Self {
        Self { io, dispatch }
    }

    /// Both contexts on the runtime the caller is running in.
    pub fn current() -> Result<Self, TryCurrentError> {
        let handle = Handle::try_current()?;
        Ok(Self {
            io: handle.clone(),
            dispatch: handle,
        })
    }
}

fn default_cdn_host() -> String {
    DEFAULT_CDN_HOST.to_string()
}

fn default_api_host() -> String {
    DEFAULT_API_HOST.to_string()
}

fn default_true() -> bool {
    true
}

fn default_fetch_timeout() -> Duration {
    DEFAULT_FETCH_TIMEOUT
}
