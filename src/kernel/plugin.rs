use super::event::Event;
use super::settings::Settings;
use super::store::Store;
use super::timeline::{PluginId, Timeline};

/// Pipeline category. Notification and execution follow [`PluginKind::ORDER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginKind {
    Before,
    Enrichment,
    Destination,
    After,
    /// Receives settings updates but never executes events.
    Utility,
}

impl PluginKind {
    pub const ORDER: [PluginKind; 5] = [
        PluginKind::Before,
        PluginKind::Enrichment,
        PluginKind::Destination,
        PluginKind::After,
        PluginKind::Utility,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            PluginKind::Before => 0,
            PluginKind::Enrichment => 1,
            PluginKind::Destination => 2,
            PluginKind::After => 3,
            PluginKind::Utility => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    /// Late join: the plugin was added after settings already existed.
    Initial,
    /// A new settings commit.
    Refresh,
}

/// Handed to [`Plugin::setup`]. Plugins may keep clones to add or remove
/// stages later.
#[derive(Clone)]
pub struct PluginContext {
    pub id: PluginId,
    pub store: Store,
    pub timeline: Timeline,
}

/// A processing stage.
///
/// Hooks get `&mut self` and never run concurrently on the same instance.
/// A hook may dispatch to the store or add and remove plugins. It must not
/// call [`Timeline::process`], which would wait for the hook to finish.
pub trait Plugin: Send + 'static {
    fn kind(&self) -> PluginKind;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn setup(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn update(&mut self, _settings: &Settings, _kind: UpdateType) -> anyhow::Result<()> {
        Ok(())
    }

    /// Returning `None` drops the event for every later stage. So does a panic.
    fn execute(&mut self, event: Event) -> Option<Event> {
        Some(event)
    }

    /// Called once the timeline no longer references the plugin.
    fn shutdown(&mut self) {}
}
