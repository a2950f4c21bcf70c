use std::sync::Arc;

use anyhow::anyhow;
use serde::Deserialize;
use tracing::debug;

use crate::config::Configuration;
use crate::kernel::event::Event;
use crate::kernel::plugin::{Plugin, PluginKind, UpdateType};
use crate::kernel::settings::{Settings, SEGMENT_DESTINATION_KEY};

/// Where the first-party destination hands events for upload.
/// Batching, persistence and retries live behind this boundary.
pub trait EventSink: Send + Sync + 'static {
    fn enqueue(&self, event: Event, api_key: &str, api_host: &str);
}

/// Sink that only logs. Used when the host does not wire an uploader.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn enqueue(&self, event: Event, _api_key: &str, api_host: &str) {
        debug!(message_id = %event.message_id, kind = ?event.kind, %api_host, "event enqueued");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSettings {
    pub api_key: String,
    #[serde(default)]
    pub api_host: Option<String>,
}

/// Default first-party destination.
///
/// Enabled only while the current settings carry a `Segment.io` entry; its
/// upload target is re-read on every update.
pub struct SegmentDestination {
    default_api_host: String,
    settings: Option<SegmentSettings>,
    enabled: bool,
    sink: Arc<dyn EventSink>,
}

impl SegmentDestination {
    pub fn new(configuration: &Configuration, sink: Arc<dyn EventSink>) -> Self {
        Self {
            default_api_host: configuration.api_host.clone(),
            settings: None,
            enabled: false,
            sink,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn api_host(&self) -> &str {
        self.settings
            .as_ref()
            .and_then(|s| s.api_host.as_deref())
            .unwrap_or(&self.default_api_host)
    }
}

impl Plugin for SegmentDestination {
    fn kind(&self) -> PluginKind {
        PluginKind::Destination
    }

    fn name(&self) -> &str {
        SEGMENT_DESTINATION_KEY
    }

    fn update(&mut self, settings: &Settings, _kind: UpdateType) -> anyhow::Result<()> {
        self.enabled = settings.has_integration_settings(SEGMENT_DESTINATION_KEY);
        if !self.enabled {
            self.settings = None;
            return Ok(());
        }

        match settings.destination_settings::<SegmentSettings>(SEGMENT_DESTINATION_KEY) {
            Some(parsed) => {
                self.settings = Some(parsed);
                Ok(())
            }
            None => {
                self.enabled = false;
                self.settings = None;
                Err(anyhow!("`{SEGMENT_DESTINATION_KEY}` settings are missing an apiKey"))
            }
        }
    }

    fn execute(&mut self, event: Event) -> Option<Event> {
        match (&self.settings, self.enabled) {
            (Some(settings), true) => {
                self.sink.enqueue(event.clone(), &settings.api_key, self.api_host());
            }
            _ => debug!(message_id = %event.message_id, "segment destination disabled, skipping"),
        }
        Some(event)
    }
}
