//! Versioned, slice-keyed state container.
//!
//! # Invariants
//! - Each slice type has exactly one committed [`Snapshot`] at any instant.
//!   Readers load it lock-free and never observe a half-applied transition.
//! - Commits to one slice are serialized; different slices commit independently.
//! - Subscribers of a slice are notified in subscription order, and every
//!   subscriber sees versions in strictly increasing order.
//!
//! Notification is synchronous on the committing thread unless a delivery for
//! the same slice is already running (a nested dispatch from inside a
//! subscriber, or a concurrent writer). In that case the snapshot is queued and
//! the thread already delivering drains it after finishing the current one.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::ops::Deref;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("action rejected by `{slice}`: {reason}")]
    ActionRejected { slice: &'static str, reason: String },
    #[error("store has been shut down")]
    ShutDown,
}

/// A named slice of the store. The reducer is the ONLY way a slice changes.
pub trait State: Default + Send + Sync + 'static {
    type Action: Send;

    const NAME: &'static str;

    /// Pure transition: current state + action -> next state.
    fn reduce(&self, action: Self::Action) -> Result<Self, StoreError>;
}

/// An immutable, committed value of a slice.
#[derive(Debug)]
pub struct Snapshot<S> {
    version: u64,
    state: S,
}

impl<S> Snapshot<S> {
    /// Commit counter of the slice. `0` means nothing was dispatched yet.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> &S {
        &self.state
    }
}

impl<S> Deref for Snapshot<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.state
    }
}

/// Handle returned by [`Store::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    slice: TypeId,
    slice_name: &'static str,
    id: u64,
}

impl Subscription {
    pub fn slice_name(&self) -> &'static str {
        self.slice_name
    }
}

type Callback<S> = Box<dyn Fn(&Arc<Snapshot<S>>) + Send + Sync>;

struct Subscriber<S> {
    id: u64,
    // Version current at subscription time; only later commits are delivered.
    since: u64,
    active: AtomicBool,
    callback: Callback<S>,
}

struct Delivery<S> {
    subscribers: Vec<Arc<Subscriber<S>>>,
    pending: VecDeque<Arc<Snapshot<S>>>,
    draining: bool,
}

struct Slice<S: State> {
    current: ArcSwap<Snapshot<S>>,
    writer: Mutex<()>,
    delivery: Mutex<Delivery<S>>,
}

impl<S: State> Slice<S> {
    fn new(initial: S) -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot {
                version: 0,
                state: initial,
            }),
            writer: Mutex::new(()),
            delivery: Mutex::new(Delivery {
                subscribers: Vec::new(),
                pending: VecDeque::new(),
                draining: false,
            }),
        }
    }

    fn load(&self) -> Arc<Snapshot<S>> {
        self.current.load_full()
    }

    fn commit_with<F>(&self, transition: F) -> Result<Arc<Snapshot<S>>, StoreError>
    where
        F: FnOnce(&S) -> Result<S, StoreError>,
    {
        let next = {
            let _writer = self.writer.lock();
            let current = self.current.load_full();

            let state = match catch_unwind(AssertUnwindSafe(|| transition(&current.state))) {
                Ok(result) => result?,
                Err(_) => {
                    return Err(StoreError::ActionRejected {
                        slice: S::NAME,
                        reason: "reducer panicked".to_string(),
                    })
                }
            };

            let next = Arc::new(Snapshot {
                version: current.version + 1,
                state,
            });
            self.current.store(Arc::clone(&next));
            // Queued under the writer lock so the queue is in version order.
            self.delivery.lock().pending.push_back(Arc::clone(&next));
            next
        };

        debug!(slice = S::NAME, version = next.version, "state committed");
        self.drain();
        Ok(next)
    }

    fn drain(&self) {
        {
            let mut delivery = self.delivery.lock();
            if delivery.draining {
                return;
            }
            delivery.draining = true;
        }

        loop {
            let (snapshot, subscribers) = {
                let mut delivery = self.delivery.lock();
                match delivery.pending.pop_front() {
                    Some(snapshot) => (snapshot, delivery.subscribers.clone()),
                    None => {
                        delivery.draining = false;
                        return;
                    }
                }
            };

            for subscriber in subscribers {
                if subscriber.since >= snapshot.version
                    || !subscriber.active.load(Ordering::Acquire)
                {
                    continue;
                }
                let delivered = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(&snapshot)));
                if delivered.is_err() {
                    warn!(
                        slice = S::NAME,
                        subscriber = subscriber.id,
                        version = snapshot.version,
                        "store subscriber panicked"
                    );
                }
            }
        }
    }

    fn subscribe(&self, id: u64, callback: Callback<S>) {
        let mut delivery = self.delivery.lock();
        let since = self.current.load().version;
        delivery.subscribers.push(Arc::new(Subscriber {
            id,
            since,
            active: AtomicBool::new(true),
            callback,
        }));
    }
}

/// Type-erased view used for operations that do not need `S`.
trait ErasedSlice: Send + Sync {
    fn unsubscribe(&self, id: u64) -> bool;
    fn clear(&self);
}

impl<S: State> ErasedSlice for Slice<S> {
    fn unsubscribe(&self, id: u64) -> bool {
        let mut delivery = self.delivery.lock();
        let before = delivery.subscribers.len();
        delivery.subscribers.retain(|subscriber| {
            if subscriber.id == id {
                subscriber.active.store(false, Ordering::Release);
                false
            } else {
                true
            }
        });
        delivery.subscribers.len() != before
    }

    fn clear(&self) {
        let mut delivery = self.delivery.lock();
        for subscriber in &delivery.subscribers {
            subscriber.active.store(false, Ordering::Release);
        }
        delivery.subscribers.clear();
        delivery.pending.clear();
    }
}

struct SliceEntry {
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedSlice>,
}

impl SliceEntry {
    fn new<S: State>(slice: &Arc<Slice<S>>) -> Self {
        Self {
            typed: Arc::clone(slice) as Arc<dyn Any + Send + Sync>,
            erased: Arc::clone(slice) as Arc<dyn ErasedSlice>,
        }
    }

    fn typed<S: State>(&self) -> Option<Arc<Slice<S>>> {
        Arc::clone(&self.typed).downcast::<Slice<S>>().ok()
    }
}

struct StoreInner {
    slices: RwLock<HashMap<TypeId, SliceEntry>>,
    next_subscriber: AtomicU64,
    shut_down: AtomicBool,
}

/// Explicit, cloneable handle to one state container.
///
/// Clones share the same slices. Each pipeline owns exactly one store; there is
/// no global instance.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("slices", &self.inner.slices.read().len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                slices: RwLock::new(HashMap::new()),
                next_subscriber: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Seeds a slice with an initial value.
    ///
    /// On a slice nobody touched yet this installs version 0 silently. If the
    /// slice already exists the value is committed like any dispatch.
    pub fn provide<S: State>(&self, initial: S) -> Result<Arc<Snapshot<S>>, StoreError> {
        self.ensure_running()?;
        let key = TypeId::of::<S>();
        let slice = {
            let mut slices = self.inner.slices.write();
            match slices.get(&key).and_then(SliceEntry::typed::<S>) {
                Some(slice) => slice,
                None => {
                    let slice = Arc::new(Slice::new(initial));
                    slices.insert(key, SliceEntry::new(&slice));
                    return Ok(slice.load());
                }
            }
        };

        slice.commit_with(move |_| Ok(initial))
    }

    /// Latest committed snapshot, or the slice default if never initialized.
    pub fn current_state<S: State>(&self) -> Arc<Snapshot<S>> {
        self.slice::<S>().load()
    }

    /// Applies `action` to its slice and notifies that slice's subscribers.
    ///
    /// A rejected action leaves the previous snapshot in place and nobody is
    /// notified.
    pub fn dispatch<S: State>(&self, action: S::Action) -> Result<Arc<Snapshot<S>>, StoreError> {
        self.ensure_running()?;
        let result = self
            .slice::<S>()
            .commit_with(move |current| current.reduce(action));
        if let Err(err) = &result {
            warn!(slice = S::NAME, error = %err, "dispatch rejected");
        }
        result
    }

    /// Registers `observer` for every future commit of slice `S`.
    ///
    /// After [`Store::shutdown`] nothing can commit, so the observer is
    /// dropped and the returned handle is inert.
    pub fn subscribe<S, F>(&self, observer: F) -> Subscription
    where
        S: State,
        F: Fn(&Arc<Snapshot<S>>) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        if self.is_shut_down() {
            debug!(slice = S::NAME, subscriber = id, "store shut down, subscription ignored");
        } else {
            self.slice::<S>().subscribe(id, Box::new(observer));
        }
        Subscription {
            slice: TypeId::of::<S>(),
            slice_name: S::NAME,
            id,
        }
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let slices = self.inner.slices.read();
        slices
            .get(&subscription.slice)
            .map(|entry| entry.erased.unsubscribe(subscription.id))
            .unwrap_or(false)
    }

    /// Drops every subscriber and rejects further dispatches and
    /// subscriptions. Reads keep returning the last committed snapshots.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        for entry in self.inner.slices.read().values() {
            entry.erased.clear();
        }
        debug!("store shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<(), StoreError> {
        if self.is_shut_down() {
            Err(StoreError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn slice<S: State>(&self) -> Arc<Slice<S>> {
        let key = TypeId::of::<S>();
        if let Some(slice) = self
            .inner
            .slices
            .read()
            .get(&key)
            .and_then(SliceEntry::typed::<S>)
        {
            return slice;
        }

        let mut slices = self.inner.slices.write();
        if let Some(slice) = slices.get(&key).and_then(SliceEntry::typed::<S>) {
            return slice;
        }
        let slice = Arc::new(Slice::new(S::default()));
        slices.insert(key, SliceEntry::new(&slice));
        slice
    }
}
