#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use analytics_kernel::plugins::EventSink;
use analytics_kernel::{
    Event, FetchError, JsonObject, Plugin, PluginKind, Settings, SettingsClient, SettingsResponse,
    UpdateType,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

pub const WRITE_KEY: &str = "123";
pub const API_KEY: &str = "1vNgUqwJeCHmqgI9S1sOm9UHCyfYqbaQ";
pub const SETTINGS_JSON: &str =
    r#"{"integrations":{"Segment.io":{"apiKey":"1vNgUqwJeCHmqgI9S1sOm9UHCyfYqbaQ"}},"plan":{},"edgeFunction":{}}"#;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

pub fn object(value: Value) -> JsonObject {
    value.as_object().cloned().expect("test value must be an object")
}

/// `SETTINGS_JSON` built by hand.
pub fn expected_settings() -> Settings {
    Settings::new(
        object(json!({ "Segment.io": { "apiKey": API_KEY } })),
        JsonObject::new(),
        JsonObject::new(),
    )
}

pub fn settings_with(destination: &str) -> Settings {
    Settings::new(
        object(json!({ destination: { "apiKey": "other" } })),
        JsonObject::new(),
        JsonObject::new(),
    )
}

// ── Recording plugin ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCall {
    pub plugin: String,
    pub settings: Settings,
    pub kind: UpdateType,
}

/// Shared journal the recording plugins write into.
#[derive(Clone, Default)]
pub struct Probe {
    pub updates: Arc<Mutex<Vec<UpdateCall>>>,
    pub executed: Arc<Mutex<Vec<String>>>,
    pub shutdowns: Arc<Mutex<Vec<String>>>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<UpdateCall> {
        self.updates.lock().clone()
    }

    pub fn update_order(&self) -> Vec<String> {
        self.updates.lock().iter().map(|c| c.plugin.clone()).collect()
    }

    pub fn updates_for(&self, plugin: &str) -> Vec<UpdateCall> {
        self.updates
            .lock()
            .iter()
            .filter(|c| c.plugin == plugin)
            .cloned()
            .collect()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn shutdowns(&self) -> Vec<String> {
        self.shutdowns.lock().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Normal,
    FailUpdate,
    PanicUpdate,
    PanicExecute,
    DropEvents,
}

pub struct Recorder {
    name: String,
    kind: PluginKind,
    probe: Probe,
    behaviour: Behaviour,
}

impl Recorder {
    pub fn new(name: &str, kind: PluginKind, probe: &Probe) -> Self {
        Self {
            name: name.to_string(),
            kind,
            probe: probe.clone(),
            behaviour: Behaviour::Normal,
        }
    }

    pub fn with(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }
}

impl Plugin for Recorder {
    fn kind(&self) -> PluginKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn update(&mut self, settings: &Settings, kind: UpdateType) -> anyhow::Result<()> {
        self.probe.updates.lock().push(UpdateCall {
            plugin: self.name.clone(),
            settings: settings.clone(),
            kind,
        });
        match self.behaviour {
            Behaviour::FailUpdate => anyhow::bail!("{} refuses settings", self.name),
            Behaviour::PanicUpdate => panic!("{} blew up", self.name),
            _ => Ok(()),
        }
    }

    fn execute(&mut self, mut event: Event) -> Option<Event> {
        self.probe.executed.lock().push(self.name.clone());
        match self.behaviour {
            Behaviour::DropEvents => return None,
            Behaviour::PanicExecute => panic!("{} choked on an event", self.name),
            _ => {}
        }
        let trail = event
            .properties
            .entry("trail")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = trail {
            items.push(Value::String(self.name.clone()));
        }
        Some(event)
    }

    fn shutdown(&mut self) {
        self.probe.shutdowns.lock().push(self.name.clone());
    }
}

pub fn trail(event: &Event) -> Vec<String> {
    event
        .properties
        .get("trail")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

// ── Settings clients ────────────────────────────────────────────

/// Replays scripted responses, then repeats `fallback`.
pub struct StubClient {
    script: Mutex<VecDeque<Result<SettingsResponse, FetchError>>>,
    fallback: Result<SettingsResponse, FetchError>,
    calls: AtomicUsize,
}

impl StubClient {
    pub fn ok(body: &str) -> Arc<Self> {
        Self::scripted(Vec::new(), Ok(SettingsResponse::ok(body)))
    }

    pub fn failing(error: FetchError) -> Arc<Self> {
        Self::scripted(Vec::new(), Err(error))
    }

    pub fn scripted(
        script: Vec<Result<SettingsResponse, FetchError>>,
        fallback: Result<SettingsResponse, FetchError>,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SettingsClient for StubClient {
    async fn settings(&self, _write_key: &str) -> Result<SettingsResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Blocks every fetch until `release` is notified.
pub struct GatedClient {
    pub gate: Notify,
    pub started: Notify,
    body: String,
}

impl GatedClient {
    pub fn new(body: &str) -> Arc<Self> {
        Arc::new(Self {
            gate: Notify::new(),
            started: Notify::new(),
            body: body.to_string(),
        })
    }
}

#[async_trait]
impl SettingsClient for GatedClient {
    async fn settings(&self, _write_key: &str) -> Result<SettingsResponse, FetchError> {
        self.started.notify_one();
        self.gate.notified().await;
        Ok(SettingsResponse::ok(self.body.clone()))
    }
}

// ── Event sink ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Enqueued {
    pub event: Event,
    pub api_key: String,
    pub api_host: String,
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<Enqueued>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Enqueued> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn enqueue(&self, event: Event, api_key: &str, api_host: &str) {
        self.events.lock().push(Enqueued {
            event,
            api_key: api_key.to_string(),
            api_host: api_host.to_string(),
        });
    }
}
