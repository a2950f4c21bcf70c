//! Ordered plugin chain.
//!
//! Membership is an arena of entries per [`PluginKind`]. Every traversal
//! (settings fan-out or event processing) copies the membership first, so
//! hooks may add or remove plugins mid-traversal; such changes apply from the
//! next traversal on.
//!
//! A plugin is checked out of its entry while one of its hooks runs, and no
//! lock is held across the hook. A settings commit that reaches a checked-out
//! plugin is queued on the entry and delivered by whoever checks it back in,
//! so a hook may dispatch to the store without waiting on itself.
//!
//! Each entry remembers the last store version it was updated with. That is
//! what keeps the late-join update and the subscription-driven update from
//! both firing for the same commit.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::event::Event;
use super::plugin::{Plugin, PluginContext, PluginKind, UpdateType};
use super::state::System;
use super::store::{Snapshot, Store, Subscription};

/// Arena identity of an added plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(u64);

impl fmt::Display for PluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin#{}", self.0)
    }
}

struct Slot {
    /// `None` while a hook is running.
    plugin: Option<Box<dyn Plugin>>,
    seen_version: Option<u64>,
    pending: VecDeque<Arc<Snapshot<System>>>,
}

impl Slot {
    fn has_seen(&self, version: u64) -> bool {
        self.seen_version.is_some_and(|seen| version <= seen)
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(plugin) = self.plugin.as_mut() {
            plugin.shutdown();
        }
    }
}

struct Entry {
    id: PluginId,
    kind: PluginKind,
    name: String,
    slot: Mutex<Slot>,
    returned: Condvar,
}

impl Entry {
    fn new(id: PluginId, kind: PluginKind, name: String, plugin: Box<dyn Plugin>) -> Self {
        Self {
            id,
            kind,
            name,
            slot: Mutex::new(Slot {
                plugin: Some(plugin),
                seen_version: None,
                pending: VecDeque::new(),
            }),
            returned: Condvar::new(),
        }
    }

    /// Updates the plugin with `snapshot` unless it already saw that version.
    /// If the plugin is checked out the snapshot is queued instead.
    fn deliver(&self, snapshot: &Arc<Snapshot<System>>, kind: UpdateType) {
        if snapshot.settings.is_none() {
            return;
        }

        let mut plugin = {
            let mut slot = self.slot.lock();
            if slot.has_seen(snapshot.version()) {
                return;
            }
            match slot.plugin.take() {
                Some(plugin) => {
                    slot.seen_version = Some(snapshot.version());
                    plugin
                }
                None => {
                    debug!(plugin = %self.name, id = %self.id, version = snapshot.version(), "plugin busy, update queued");
                    slot.pending.push_back(Arc::clone(snapshot));
                    return;
                }
            }
        };

        self.update(plugin.as_mut(), snapshot, kind);
        self.check_in(plugin);
    }

    fn update(&self, plugin: &mut dyn Plugin, snapshot: &Snapshot<System>, kind: UpdateType) {
        let Some(settings) = snapshot.settings.as_ref() else {
            return;
        };
        let version = snapshot.version();
        match catch_unwind(AssertUnwindSafe(|| plugin.update(settings, kind))) {
            Ok(Ok(())) => {
                debug!(plugin = %self.name, id = %self.id, version, ?kind, "plugin updated");
            }
            Ok(Err(err)) => {
                warn!(plugin = %self.name, id = %self.id, version, error = %err, "plugin update failed");
            }
            Err(_) => {
                warn!(plugin = %self.name, id = %self.id, version, "plugin update panicked");
            }
        }
    }

    /// Waits until no hook of this plugin is running, then takes it.
    fn check_out(&self) -> Box<dyn Plugin> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(plugin) = slot.plugin.take() {
                return plugin;
            }
            self.returned.wait(&mut slot);
        }
    }

    /// Hands the plugin back, first delivering commits queued while it was out.
    fn check_in(&self, mut plugin: Box<dyn Plugin>) {
        let mut slot = self.slot.lock();
        while let Some(snapshot) = slot.pending.pop_front() {
            if slot.has_seen(snapshot.version()) {
                continue;
            }
            slot.seen_version = Some(snapshot.version());
            MutexGuard::unlocked(&mut slot, || {
                self.update(plugin.as_mut(), &snapshot, UpdateType::Refresh)
            });
        }
        slot.plugin = Some(plugin);
        drop(slot);
        self.returned.notify_one();
    }

    /// A panicking hook drops the event.
    fn execute(&self, event: Event) -> Option<Event> {
        let mut plugin = self.check_out();
        let result = catch_unwind(AssertUnwindSafe(|| plugin.execute(event)));
        self.check_in(plugin);
        result.unwrap_or_else(|_| {
            warn!(plugin = %self.name, id = %self.id, "plugin execute panicked, event dropped");
            None
        })
    }
}

#[derive(Default)]
struct Members {
    by_kind: [Vec<Arc<Entry>>; 5],
}

impl Members {
    fn ordered(&self) -> Vec<Arc<Entry>> {
        PluginKind::ORDER
            .iter()
            .flat_map(|kind| self.by_kind[kind.index()].iter().cloned())
            .collect()
    }
}

struct TimelineInner {
    store: Store,
    members: Mutex<Members>,
    next_id: AtomicU64,
    subscription: Mutex<Option<Subscription>>,
}

impl TimelineInner {
    fn on_system(&self, snapshot: &Arc<Snapshot<System>>) {
        let Some(settings) = snapshot.settings.as_ref() else {
            return;
        };
        let entries = self.members.lock().ordered();
        debug!(
            version = snapshot.version(),
            plugins = entries.len(),
            integrations = settings.integrations.len(),
            "fanning out settings"
        );
        for entry in entries {
            entry.deliver(snapshot, UpdateType::Refresh);
        }
    }

    fn entries(&self, kind: PluginKind) -> Vec<Arc<Entry>> {
        self.members.lock().by_kind[kind.index()].clone()
    }
}

/// Shared handle to a plugin chain bound to one [`Store`].
#[derive(Clone)]
pub struct Timeline {
    inner: Arc<TimelineInner>,
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline").field("plugins", &self.len()).finish()
    }
}

impl Timeline {
    /// Creates the chain and subscribes it to the store's system slice.
    pub fn new(store: Store) -> Self {
        let inner = Arc::new(TimelineInner {
            store: store.clone(),
            members: Mutex::new(Members::default()),
            next_id: AtomicU64::new(1),
            subscription: Mutex::new(None),
        });

        let weak: Weak<TimelineInner> = Arc::downgrade(&inner);
        let subscription = store.subscribe::<System, _>(move |snapshot| {
            if let Some(inner) = weak.upgrade() {
                inner.on_system(snapshot);
            }
        });
        *inner.subscription.lock() = Some(subscription);

        Self { inner }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn add<P: Plugin>(&self, plugin: P) -> PluginId {
        self.add_boxed(Box::new(plugin))
    }

    /// Appends `plugin` to the end of its category.
    ///
    /// If settings already exist the plugin receives exactly one
    /// [`UpdateType::Initial`] update before this returns. Commits that land
    /// while the plugin is being added are delivered as regular refreshes.
    pub fn add_boxed(&self, mut plugin: Box<dyn Plugin>) -> PluginId {
        let id = PluginId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let kind = plugin.kind();
        let name = plugin.name().to_string();

        let ctx = PluginContext {
            id,
            store: self.inner.store.clone(),
            timeline: self.clone(),
        };
        if let Err(err) = plugin.setup(&ctx) {
            warn!(plugin = %name, %id, error = %err, "plugin setup failed");
        }

        // Not yet published, so nothing else can reach the entry here.
        let entry = Arc::new(Entry::new(id, kind, name, plugin));
        let joined = self.inner.store.current_state::<System>();
        entry.deliver(&joined, UpdateType::Initial);

        self.inner.members.lock().by_kind[kind.index()].push(Arc::clone(&entry));

        // A commit between the read above and the publish would miss the
        // fan-out copy; `seen_version` drops it if the fan-out got it anyway.
        let latest = self.inner.store.current_state::<System>();
        if latest.version() > joined.version() {
            entry.deliver(&latest, UpdateType::Refresh);
        }

        debug!(plugin = %entry.name, %id, ?kind, "plugin added");
        id
    }

    /// Removes the plugin wherever it lives. Unknown ids are a no-op.
    pub fn remove(&self, id: PluginId) -> bool {
        let removed = {
            let mut members = self.inner.members.lock();
            members.by_kind.iter_mut().find_map(|entries| {
                let position = entries.iter().position(|entry| entry.id == id)?;
                Some(entries.remove(position))
            })
        };

        match removed {
            Some(entry) => {
                debug!(plugin = %entry.name, %id, kind = ?entry.kind, "plugin removed");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: PluginId) -> bool {
        self.inner
            .members
            .lock()
            .by_kind
            .iter()
            .any(|entries| entries.iter().any(|entry| entry.id == id))
    }

    /// First plugin whose [`Plugin::name`] equals `name`.
    pub fn find(&self, name: &str) -> Option<PluginId> {
        self.inner
            .members
            .lock()
            .ordered()
            .into_iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.id)
    }

    /// Ids of `kind`, in registration order.
    pub fn plugin_ids(&self, kind: PluginKind) -> Vec<PluginId> {
        self.inner.entries(kind).iter().map(|entry| entry.id).collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .members
            .lock()
            .by_kind
            .iter()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs an event through the chain.
    ///
    /// Before and enrichment stages run in sequence and may drop the event.
    /// Every destination receives its own copy. After stages see the event as
    /// it left enrichment. Utility plugins are skipped.
    pub fn process(&self, event: Event) -> Option<Event> {
        let event = self.run_sequence(PluginKind::Before, event)?;
        let event = self.run_sequence(PluginKind::Enrichment, event)?;

        for destination in self.inner.entries(PluginKind::Destination) {
            destination.execute(event.clone());
        }

        self.run_sequence(PluginKind::After, event)
    }

    fn run_sequence(&self, kind: PluginKind, event: Event) -> Option<Event> {
        let mut current = event;
        for entry in self.inner.entries(kind) {
            match entry.execute(current) {
                Some(next) => current = next,
                None => {
                    debug!(plugin = %entry.name, id = %entry.id, ?kind, "event dropped");
                    return None;
                }
            }
        }
        Some(current)
    }

    /// Detaches from the store and releases every plugin.
    pub fn shutdown(&self) {
        if let Some(subscription) = self.inner.subscription.lock().take() {
            self.inner.store.unsubscribe(&subscription);
        }
        let released = std::mem::take(&mut *self.inner.members.lock());
        debug!(plugins = released.by_kind.iter().map(Vec::len).sum::<usize>(), "timeline shut down");
    }
}
