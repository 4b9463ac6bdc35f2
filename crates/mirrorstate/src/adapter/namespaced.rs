//! Adapter over an asynchronous namespaced backend.

use super::{BackendKind, ChangeCallback, ChangeSubscription, PersistentStore};
use crate::backend::NamespacedStorage;
use crate::debounce::DebounceRegistry;
use crate::error::Result;
use crate::key::StateKey;
use crate::policy::{SyncDelays, SyncPolicy};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// [`PersistentStore`] over a [`NamespacedStorage`] partition.
///
/// Writes are debounced per key; the window depends on whether the key is
/// in the fast-sync subset. Reads see a write still waiting out its window
/// as if it had already landed.
pub struct NamespacedStore<K: StateKey> {
    storage: Arc<dyn NamespacedStorage>,
    namespace: String,
    policy: Arc<SyncPolicy<K>>,
    delays: SyncDelays,
    debouncer: DebounceRegistry,
    queued: Arc<Mutex<HashMap<&'static str, Value>>>,
}

impl<K: StateKey> NamespacedStore<K> {
    /// Create an adapter writing into `namespace`.
    pub fn new(
        storage: Arc<dyn NamespacedStorage>,
        namespace: impl Into<String>,
        policy: Arc<SyncPolicy<K>>,
        delays: SyncDelays,
    ) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
            policy,
            delays,
            debouncer: DebounceRegistry::new(),
            queued: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Partition this adapter reads and writes.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Debounce window used for writes to `key`.
    pub fn flush_delay_for(&self, key: K) -> Duration {
        self.delays.duration(self.policy.sync_delay_for(key))
    }

    /// Number of keys with a write still waiting out its debounce window.
    pub fn pending_writes(&self) -> usize {
        self.debouncer.pending()
    }
}

#[async_trait]
impl<K: StateKey> PersistentStore<K> for NamespacedStore<K> {
    fn kind(&self) -> BackendKind {
        BackendKind::Namespaced
    }

    async fn get(&self, key: K) -> Result<Option<Value>> {
        let queued = self.queued.lock().get(key.as_str()).cloned();
        if queued.is_some() {
            return Ok(queued);
        }
        let name = key.as_str().to_string();
        let mut items = self
            .storage
            .get(&self.namespace, Some(std::slice::from_ref(&name)))
            .await?;
        Ok(items.remove(&name))
    }

    async fn get_all(&self) -> Result<HashMap<K, Value>> {
        let items = self.storage.get(&self.namespace, None).await?;
        Ok(self.policy.retain_synced(items))
    }

    async fn set(&self, key: K, value: Value) -> Result<()> {
        let delay = self.flush_delay_for(key);
        let storage = Arc::clone(&self.storage);
        let namespace = self.namespace.clone();
        let queued = Arc::clone(&self.queued);
        let name = key.as_str();

        debug!(key = name, delay_ms = delay.as_millis() as u64, "Scheduling namespaced write");
        self.queued.lock().insert(name, value);
        self.debouncer.schedule(name, delay, async move {
            // Always the latest queued value, even if a newer schedule raced this one.
            let Some(value) = queued.lock().get(name).cloned() else {
                return;
            };
            let items = HashMap::from([(name.to_string(), value.clone())]);
            if let Err(e) = storage.set(&namespace, items).await {
                warn!(key = name, error = %e, "Dropping failed namespaced write");
            }

            let mut queued = queued.lock();
            if queued.get(name) == Some(&value) {
                queued.remove(name);
            }
        });
        Ok(())
    }

    fn on_change(&self, callback: ChangeCallback<K>) -> ChangeSubscription {
        let mut receiver = self.storage.subscribe();
        let namespace = self.namespace.clone();
        let policy = Arc::clone(&self.policy);

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(change) => {
                        if change.namespace != namespace {
                            continue;
                        }
                        for (name, value_change) in change.changes {
                            let Some(key) = policy.resolve(&name) else {
                                continue;
                            };
                            debug!(key = name.as_str(), "Namespaced change received");
                            callback(key, value_change.new_value.unwrap_or(Value::Null));
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, namespace = namespace.as_str(), "Change listener lagged, changes lost");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(namespace = namespace.as_str(), "Namespaced change listener stopped");
        });

        ChangeSubscription::new(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryNamespacedStorage;
    use serde_json::json;

    crate::state_keys! {
        enum TestKey {
            Loaded => "loaded",
            Names => "test.test",
            Note => "test.test3",
        }
    }

    fn adapter(storage: &MemoryNamespacedStorage) -> NamespacedStore<TestKey> {
        let policy = SyncPolicy::new(vec![TestKey::Names, TestKey::Note], vec![TestKey::Names]).unwrap();
        NamespacedStore::new(
            Arc::new(storage.clone()),
            "local",
            Arc::new(policy),
            SyncDelays::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_key_flushes_on_short_window() {
        let storage = MemoryNamespacedStorage::new();
        let store = adapter(&storage);
        assert_eq!(store.namespace(), "local");

        store.set(TestKey::Names, json!(["a"])).await.unwrap();
        assert_eq!(storage.peek("local", "test.test"), None);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(storage.peek("local", "test.test"), Some(json!(["a"])));
        assert_eq!(store.pending_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_sees_queued_write() {
        let storage = MemoryNamespacedStorage::new();
        storage
            .set("local", HashMap::from([("test.test3".to_string(), json!("a"))]))
            .await
            .unwrap();
        let store = adapter(&storage);

        store.set(TestKey::Note, json!("b")).await.unwrap();
        assert_eq!(store.get(TestKey::Note).await.unwrap(), Some(json!("b")));
        assert_eq!(storage.peek("local", "test.test3"), Some(json!("a")));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(store.get(TestKey::Note).await.unwrap(), Some(json!("b")));
        assert_eq!(storage.peek("local", "test.test3"), Some(json!("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_back_to_persisted_value_within_window_wins() {
        let storage = MemoryNamespacedStorage::new();
        storage
            .set("local", HashMap::from([("test.test".to_string(), json!("a"))]))
            .await
            .unwrap();
        let store = adapter(&storage);

        store.set(TestKey::Names, json!("b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.set(TestKey::Names, json!("a")).await.unwrap();
        assert_eq!(store.get(TestKey::Names).await.unwrap(), Some(json!("a")));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(storage.peek("local", "test.test"), Some(json!("a")));
        assert_eq!(store.pending_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_key_waits_for_long_window() {
        let storage = MemoryNamespacedStorage::new();
        let store = adapter(&storage);
        assert!(store.flush_delay_for(TestKey::Names) < store.flush_delay_for(TestKey::Note));

        store.set(TestKey::Note, json!("n")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(storage.peek("local", "test.test3"), None);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(storage.peek("local", "test.test3"), Some(json!("n")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_writes_coalesce() {
        let storage = MemoryNamespacedStorage::new();
        let store = adapter(&storage);

        for i in 0..10 {
            store.set(TestKey::Names, json!(i)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(storage.write_count(), 1);
        assert_eq!(storage.peek("local", "test.test"), Some(json!(9)));
    }

    #[tokio::test]
    async fn test_get_all_ignores_foreign_keys() {
        let storage = MemoryNamespacedStorage::new();
        storage
            .set(
                "local",
                HashMap::from([
                    ("test.test".to_string(), json!([1])),
                    ("loaded".to_string(), json!(true)),
                    ("other".to_string(), json!(0)),
                ]),
            )
            .await
            .unwrap();
        storage
            .set("sync", HashMap::from([("test.test3".to_string(), json!("x"))]))
            .await
            .unwrap();

        let all = adapter(&storage).get_all().await.unwrap();
        assert_eq!(all, HashMap::from([(TestKey::Names, json!([1]))]));
    }

    #[tokio::test]
    async fn test_on_change_filters_namespace_and_keys() {
        let storage = MemoryNamespacedStorage::new();
        let store = adapter(&storage);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = store.on_change(Arc::new(move |key: TestKey, value: Value| {
            sink.lock().push((key, value))
        }));

        storage
            .set("sync", HashMap::from([("test.test".to_string(), json!(1))]))
            .await
            .unwrap();
        storage
            .set("local", HashMap::from([("loaded".to_string(), json!(true))]))
            .await
            .unwrap();
        storage
            .set("local", HashMap::from([("test.test".to_string(), json!(2))]))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*seen.lock(), vec![(TestKey::Names, json!(2))]);
    }

    #[tokio::test]
    async fn test_cancelled_subscription_stops_listening() {
        let storage = MemoryNamespacedStorage::new();
        let store = adapter(&storage);
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let subscription = store.on_change(Arc::new(move |_: TestKey, _: Value| *sink.lock() += 1));
        assert!(subscription.is_active());
        subscription.cancel();
        tokio::task::yield_now().await;

        storage
            .set("local", HashMap::from([("test.test".to_string(), json!(1))]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*seen.lock(), 0);
    }
}
