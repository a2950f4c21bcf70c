use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::config::Configuration;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("settings transport error: {0}")]
    Transport(String),
    #[error("settings endpoint returned status {0}")]
    Status(u16),
    #[error("failed to read settings body: {0}")]
    Body(String),
}

/// Raw outcome of one settings request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl SettingsResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fetches the settings document for a write key. One call, no retries.
#[async_trait]
pub trait SettingsClient: Send + Sync + 'static {
    async fn settings(&self, write_key: &str) -> Result<SettingsResponse, FetchError>;
}

/// `reqwest`-backed client hitting `{cdn_host}/projects/{write_key}/settings`.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    pub fn new(configuration: &Configuration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(configuration.fetch_timeout) // Fetch deadline lives here, not in the refresher
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url(&configuration.cdn_host),
        })
    }

    pub fn settings_url(&self, write_key: &str) -> String {
        format!("{}/projects/{}/settings", self.base_url, write_key)
    }
}

#[async_trait]
impl SettingsClient for HttpClient {
    async fn settings(&self, write_key: &str) -> Result<SettingsResponse, FetchError> {
        let url = self.settings_url(write_key);
        debug!(%url, "fetching settings");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        Ok(SettingsResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn base_url(cdn_host: &str) -> String {
    let host = cdn_host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}
