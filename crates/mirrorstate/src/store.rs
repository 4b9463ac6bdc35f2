//! Reactive in-memory state kept in sync with a [`PersistentStore`].
//!
//! ```text
//!              set / update                    on_change
//!   caller ─────────────────▶ SyncedStore ◀──────────────── PersistentStore
//!                                 │  ▲                             ▲
//!          listeners ◀────────────┘  │ init: get_all               │
//!                                    └─────────────────────────────┤
//!                      outbound worker: get, compare, set ─────────┘
//! ```
//!
//! Every applied change is tagged with its [`Origin`]. Only local changes
//! are written back, and even then only when they differ from what is
//! already persisted, so a remote change can never echo back to the
//! backend.

use crate::adapter::{BackendKind, ChangeSubscription, PersistentStore};
use crate::error::{Error, Result};
use crate::key::StateKey;
use crate::policy::SyncPolicy;
use crate::schema::Defaults;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Where an applied change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A caller of [`SyncedStore::set`] or [`SyncedStore::update`].
    Local,
    /// A change reported by the persistent backend.
    Remote,
    /// The initial load from the persistent backend.
    Seed,
}

/// A change applied to one key.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange<K> {
    /// Changed key.
    pub key: K,
    /// Value before the change.
    pub previous: Value,
    /// Value after the change.
    pub current: Value,
    /// Where the change came from.
    pub origin: Origin,
}

impl<K> StateChange<K> {
    /// Whether the value actually differs from the previous one.
    pub fn is_effective(&self) -> bool {
        self.previous != self.current
    }
}

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<K> = Arc<dyn Fn(&StateChange<K>) + Send + Sync>;

type OutboundWrite<K> = (K, Value);

/// In-memory key/value state mirrored to a persistent backend.
///
/// Construct with [`SyncedStore::new`], then call [`SyncedStore::init`] once
/// from within a tokio runtime to load persisted values and start syncing.
pub struct SyncedStore<K: StateKey> {
    state: RwLock<HashMap<K, Value>>,
    listeners: RwLock<Vec<(SubscriptionId, Listener<K>)>>,
    next_subscription: AtomicU64,
    policy: Arc<SyncPolicy<K>>,
    adapter: Arc<dyn PersistentStore<K>>,
    outbound: mpsc::UnboundedSender<OutboundWrite<K>>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<OutboundWrite<K>>>>,
    loaded: watch::Sender<bool>,
    inbound: Mutex<Option<ChangeSubscription>>,
}

impl<K: StateKey> SyncedStore<K> {
    /// Create a store holding `defaults`.
    ///
    /// Nothing is read from or written to the backend until [`init`](Self::init).
    pub fn new(
        defaults: Defaults<K>,
        policy: Arc<SyncPolicy<K>>,
        adapter: Arc<dyn PersistentStore<K>>,
    ) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (loaded, _) = watch::channel(false);

        Arc::new(Self {
            state: RwLock::new(defaults.into_map()),
            listeners: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            policy,
            adapter,
            outbound,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            loaded,
            inbound: Mutex::new(None),
        })
    }

    /// Load persisted values and start syncing in both directions.
    ///
    /// Persisted values are applied without being written back. Afterwards
    /// `loaded_key`, if given, is set to `true`, the store is marked loaded
    /// and it starts listening for backend changes. `loaded_key` must not be
    /// a synced key.
    pub async fn init(self: &Arc<Self>, loaded_key: Option<K>) -> Result<()> {
        if let Some(key) = loaded_key {
            if self.policy.is_sync_eligible(key) {
                return Err(Error::config(format!(
                    "loaded flag '{}' must not be a synced key",
                    key.as_str()
                )));
            }
        }

        let receiver = self
            .outbound_rx
            .lock()
            .take()
            .ok_or_else(|| Error::config("store is already initialized"))?;
        tokio::spawn(Self::run_outbound(Arc::clone(&self.adapter), receiver));

        let persisted = self.adapter.get_all().await?;
        let mut seeded = 0usize;
        for key in self.policy.sync_keys() {
            if let Some(value) = persisted.get(key) {
                self.apply(*key, value.clone(), Origin::Seed);
                seeded += 1;
            }
        }
        if let Some(key) = loaded_key {
            self.apply(key, Value::Bool(true), Origin::Seed);
        }
        self.loaded.send_replace(true);
        info!(backend = ?self.adapter.kind(), seeded, "Loaded persisted state");

        let store = Arc::downgrade(self);
        let subscription = self.adapter.on_change(Arc::new(move |key: K, value: Value| {
            if let Some(store) = store.upgrade() {
                store.receive_remote(key, value);
            }
        }));
        *self.inbound.lock() = Some(subscription);

        Ok(())
    }

    /// Current value of `key`.
    pub fn get(&self, key: K) -> Value {
        self.state.read().get(&key).cloned().unwrap_or(Value::Null)
    }

    /// Current value of `key`, deserialized.
    pub fn get_as<T: DeserializeOwned>(&self, key: K) -> Result<T> {
        Ok(serde_json::from_value(self.get(key))?)
    }

    /// Snapshot of every key.
    pub fn snapshot(&self) -> HashMap<K, Value> {
        self.state.read().clone()
    }

    /// Replace the value of `key`, persisting it if the key is synced.
    pub fn set(&self, key: K, value: Value) {
        self.apply(key, value, Origin::Local);
    }

    /// Serialize `value` and [`set`](Self::set) it.
    pub fn set_as<T: Serialize>(&self, key: K, value: &T) -> Result<()> {
        self.set(key, serde_json::to_value(value)?);
        Ok(())
    }

    /// Modify a deep copy of the current value and assign it back.
    ///
    /// With a no-op `modify` this re-persists the current value if the
    /// backend disagrees with it.
    pub fn update<F>(&self, key: K, modify: F)
    where
        F: FnOnce(&mut Value),
    {
        let mut value = self.get(key);
        modify(&mut value);
        self.set(key, value);
    }

    /// Call `callback` with the new value whenever `key` changes.
    ///
    /// Assignments that leave the value structurally equal are not reported.
    pub fn subscribe<F>(&self, key: K, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_all(move |change| {
            if change.key == key && change.is_effective() {
                callback(&change.current);
            }
        })
    }

    /// Call `listener` for every applied change, equal values included.
    pub fn subscribe_all<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&StateChange<K>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Whether persisted values have been loaded.
    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    /// Wait until persisted values have been loaded.
    pub async fn wait_loaded(&self) {
        let mut loaded = self.loaded.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = loaded.wait_for(|loaded| *loaded).await;
    }

    /// Sync policy in use.
    pub fn policy(&self) -> &SyncPolicy<K> {
        &self.policy
    }

    /// Backend the store persists into.
    pub fn backend_kind(&self) -> BackendKind {
        self.adapter.kind()
    }

    fn apply(&self, key: K, value: Value, origin: Origin) {
        let previous = {
            let mut state = self.state.write();
            let previous = state.insert(key, value.clone()).unwrap_or(Value::Null);
            // Enqueued under the lock so outbound order matches insert order.
            if origin == Origin::Local
                && self.policy.is_sync_eligible(key)
                && self.outbound.send((key, value.clone())).is_err()
            {
                warn!(key = key.as_str(), "Outbound sync stopped, write dropped");
            }
            previous
        };

        self.notify(&StateChange {
            key,
            previous,
            current: value,
            origin,
        });
    }

    fn notify(&self, change: &StateChange<K>) {
        // Listeners may call back into the store.
        let listeners: Vec<Listener<K>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(change);
        }
    }

    fn receive_remote(&self, key: K, value: Value) {
        if self.get(key) == value {
            trace!(key = key.as_str(), "Remote change matches current value");
            return;
        }
        debug!(key = key.as_str(), "Applying remote change");
        self.apply(key, value, Origin::Remote);
    }

    async fn run_outbound(
        adapter: Arc<dyn PersistentStore<K>>,
        mut receiver: mpsc::UnboundedReceiver<OutboundWrite<K>>,
    ) {
        while let Some((key, value)) = receiver.recv().await {
            persist_if_changed(adapter.as_ref(), key, value).await;
        }
        debug!("Outbound sync worker stopped");
    }
}

impl<K: StateKey> Drop for SyncedStore<K> {
    fn drop(&mut self) {
        if let Some(subscription) = self.inbound.lock().take() {
            subscription.cancel();
        }
    }
}

impl<K: StateKey> std::fmt::Debug for SyncedStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedStore")
            .field("backend", &self.adapter.kind())
            .field("keys", &self.state.read().len())
            .field("listeners", &self.listeners.read().len())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Write `value` unless the backend already holds a structurally equal one.
async fn persist_if_changed<K: StateKey>(adapter: &dyn PersistentStore<K>, key: K, value: Value) {
    match adapter.get(key).await {
        Ok(Some(persisted)) if persisted == value => {
            trace!(key = key.as_str(), "Persisted value already current");
            return;
        }
        Ok(_) => {}
        Err(e) => {
            warn!(key = key.as_str(), error = %e, "Could not read persisted value, overwriting");
        }
    }

    if let Err(e) = adapter.set(key, value).await {
        warn!(key = key.as_str(), error = %e, "Dropping failed write");
    }
}
