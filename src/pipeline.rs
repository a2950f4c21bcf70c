use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{Configuration, ExecutionContexts};
use crate::kernel::event::Event;
use crate::kernel::plugin::Plugin;
use crate::kernel::state::{System, SystemAction, UserInfo};
use crate::kernel::store::Store;
use crate::kernel::timeline::{PluginId, Timeline};
use crate::plugins::segment::{EventSink, SegmentDestination};
use crate::services::settings::client::{HttpClient, SettingsClient};
use crate::services::settings::refresher::{RefreshError, SettingsRefresher};

/// Composition root: one store, one timeline, one refresher.
pub struct Pipeline {
    configuration: Configuration,
    store: Store,
    timeline: Timeline,
    refresher: SettingsRefresher,
    token: CancellationToken,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    pub fn new(
        configuration: Configuration,
        contexts: ExecutionContexts,
        client: Arc<dyn SettingsClient>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        configuration.validate()?;

        let store = Store::new();
        store
            .provide(System::new(&configuration))
            .context("seeding system state")?;
        store
            .provide(UserInfo::default())
            .context("seeding user state")?;

        let timeline = Timeline::new(store.clone());
        if configuration.auto_add_segment_destination {
            timeline.add(SegmentDestination::new(&configuration, sink));
        }

        let token = CancellationToken::new();
        let refresher = SettingsRefresher::new(
            configuration.write_key.clone(),
            client,
            store.clone(),
            contexts,
            token.clone(),
        );

        Ok(Self {
            configuration,
            store,
            timeline,
            refresher,
            token,
            periodic: Mutex::new(None),
        })
    }

    /// Same as [`Pipeline::new`] with the `reqwest` settings client.
    pub fn with_http(
        configuration: Configuration,
        contexts: ExecutionContexts,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let client = HttpClient::new(&configuration)?;
        Self::new(configuration, contexts, Arc::new(client), sink)
    }

    /// Marks the pipeline running and performs the first refresh. Starts the
    /// periodic refresh when configured, whatever the first outcome was.
    pub async fn start(&self) -> Result<(), RefreshError> {
        self.store
            .dispatch::<System>(SystemAction::ToggleRunning(true))?;
        info!(write_key = %self.configuration.write_key, "pipeline started");

        let first = self.refresher.refresh().await.map(|_| ());

        if let Some(period) = self.configuration.settings_refresh_interval {
            let handle = self.refresher.spawn_periodic(period);
            if let Some(previous) = self.periodic.lock().replace(handle) {
                previous.abort();
            }
        }
        first
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn refresher(&self) -> &SettingsRefresher {
        &self.refresher
    }

    pub fn add<P: Plugin>(&self, plugin: P) -> PluginId {
        self.timeline.add(plugin)
    }

    pub fn remove(&self, id: PluginId) -> bool {
        self.timeline.remove(id)
    }

    /// Stamps identity and runs the event through the timeline.
    pub fn process(&self, event: Event) -> Option<Event> {
        let user = self.store.current_state::<UserInfo>();
        self.timeline.process(event.with_identity(&user))
    }

    /// Cancels in-flight refreshes, releases plugins and closes the store.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let periodic = self.periodic.lock().take();
        if let Some(handle) = periodic {
            let _ = handle.await;
        }
        self.timeline.shutdown();
        if let Err(err) = self
            .store
            .dispatch::<System>(SystemAction::ToggleRunning(false))
        {
            debug!(error = %err, "could not mark pipeline stopped");
        }
        self.store.shutdown();
        info!(write_key = %self.configuration.write_key, "pipeline shut down");
    }
}
