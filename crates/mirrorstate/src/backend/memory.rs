//! In-memory storage backends.
//!
//! Both types model several execution contexts sharing one physical store:
//! clones of [`MemoryNamespacedStorage`] share partitions and change events,
//! and [`MemoryLocalStorage::open_context`] opens another context onto the
//! same items.

use super::{LocalStorage, NamespaceChange, NamespacedStorage, StorageSignal, ValueChange};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
struct NamespacedInner {
    partitions: RwLock<HashMap<String, HashMap<String, Value>>>,
    changes: broadcast::Sender<NamespaceChange>,
    writes: AtomicUsize,
}

/// In-memory [`NamespacedStorage`].
///
/// Every write raises a [`NamespaceChange`] to all subscribers, the writer
/// included. Writes that leave a value unchanged are not reported.
#[derive(Debug, Clone)]
pub struct MemoryNamespacedStorage {
    inner: Arc<NamespacedInner>,
}

impl MemoryNamespacedStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(NamespacedInner {
                partitions: RwLock::new(HashMap::new()),
                changes,
                writes: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of `set` calls served so far.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Current value of `key` in `namespace`.
    pub fn peek(&self, namespace: &str, key: &str) -> Option<Value> {
        self.inner
            .partitions
            .read()
            .get(namespace)
            .and_then(|partition| partition.get(key))
            .cloned()
    }
}

impl Default for MemoryNamespacedStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NamespacedStorage for MemoryNamespacedStorage {
    async fn get(&self, namespace: &str, keys: Option<&[String]>) -> Result<HashMap<String, Value>> {
        let partitions = self.inner.partitions.read();
        let Some(partition) = partitions.get(namespace) else {
            return Ok(HashMap::new());
        };

        let items = match keys {
            Some(keys) => keys
                .iter()
                .filter_map(|key| partition.get(key).map(|value| (key.clone(), value.clone())))
                .collect(),
            None => partition.clone(),
        };
        Ok(items)
    }

    async fn set(&self, namespace: &str, items: HashMap<String, Value>) -> Result<()> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);

        let mut changes = HashMap::new();
        {
            let mut partitions = self.inner.partitions.write();
            let partition = partitions.entry(namespace.to_string()).or_default();
            for (key, value) in items {
                let old_value = partition.insert(key.clone(), value.clone());
                if old_value.as_ref() != Some(&value) {
                    changes.insert(
                        key,
                        ValueChange {
                            old_value,
                            new_value: Some(value),
                        },
                    );
                }
            }
        }

        if !changes.is_empty() {
            trace!(namespace, count = changes.len(), "Broadcasting namespace change");
            // No subscribers is fine.
            let _ = self.inner.changes.send(NamespaceChange {
                namespace: namespace.to_string(),
                changes,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<NamespaceChange> {
        self.inner.changes.subscribe()
    }
}

#[derive(Debug, Default)]
struct PhysicalStore {
    items: RwLock<BTreeMap<String, String>>,
    contexts: Mutex<Vec<(u64, broadcast::Sender<StorageSignal>)>>,
    next_context: AtomicU64,
    writes: AtomicUsize,
}

/// In-memory [`LocalStorage`] context.
///
/// A write in one context signals every other context opened onto the same
/// physical store, never the writer itself.
#[derive(Debug)]
pub struct MemoryLocalStorage {
    store: Arc<PhysicalStore>,
    context: u64,
    signals: broadcast::Sender<StorageSignal>,
}

impl MemoryLocalStorage {
    /// Create a new physical store and its first context.
    pub fn new() -> Self {
        Self::attach(Arc::new(PhysicalStore::default()))
    }

    /// Open another context onto the same physical store.
    pub fn open_context(&self) -> Self {
        Self::attach(Arc::clone(&self.store))
    }

    fn attach(store: Arc<PhysicalStore>) -> Self {
        let context = store.next_context.fetch_add(1, Ordering::Relaxed);
        let (signals, _) = broadcast::channel(CHANNEL_CAPACITY);
        store.contexts.lock().push((context, signals.clone()));
        Self {
            store,
            context,
            signals,
        }
    }

    /// Number of `set_item` calls served across all contexts.
    pub fn write_count(&self) -> usize {
        self.store.writes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryLocalStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryLocalStorage {
    fn drop(&mut self) {
        let context = self.context;
        self.store.contexts.lock().retain(|(id, _)| *id != context);
    }
}

impl LocalStorage for MemoryLocalStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.store.items.read().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: String) -> Result<()> {
        self.store.writes.fetch_add(1, Ordering::SeqCst);
        self.store.items.write().insert(key.to_string(), value);

        let contexts = self.store.contexts.lock();
        for (id, sender) in contexts.iter() {
            if *id == self.context {
                continue;
            }
            let _ = sender.send(StorageSignal {
                key: Some(key.to_string()),
            });
        }
        Ok(())
    }

    fn items(&self) -> Vec<(String, String)> {
        self.store
            .items
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageSignal> {
        self.signals.subscribe()
    }
}
