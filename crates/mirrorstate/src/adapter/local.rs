//! Adapter over a synchronous local text backend.

use super::{BackendKind, ChangeCallback, ChangeSubscription, PersistentStore};
use crate::backend::LocalStorage;
use crate::error::{Error, Result};
use crate::key::StateKey;
use crate::policy::SyncPolicy;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error};

/// [`PersistentStore`] over a [`LocalStorage`].
///
/// Values are stored as JSON text and written immediately. The backend only
/// signals that *something* changed, so every signal re-announces all synced
/// keys currently stored; consumers deduplicate by value.
pub struct LocalStore<K: StateKey> {
    storage: Arc<dyn LocalStorage>,
    policy: Arc<SyncPolicy<K>>,
}

impl<K: StateKey> LocalStore<K> {
    /// Create an adapter over `storage`.
    pub fn new(storage: Arc<dyn LocalStorage>, policy: Arc<SyncPolicy<K>>) -> Self {
        Self { storage, policy }
    }

    fn read_all(storage: &dyn LocalStorage, policy: &SyncPolicy<K>) -> Result<HashMap<K, Value>> {
        let mut out = HashMap::new();
        for (name, text) in storage.items() {
            if let Some(key) = policy.resolve(&name) {
                out.insert(key, decode(&name, &text)?);
            }
        }
        Ok(out)
    }
}

fn decode(name: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| Error::malformed(name, e))
}

#[async_trait]
impl<K: StateKey> PersistentStore<K> for LocalStore<K> {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get(&self, key: K) -> Result<Option<Value>> {
        let name = key.as_str();
        self.storage
            .get_item(name)
            .map(|text| decode(name, &text))
            .transpose()
    }

    async fn get_all(&self) -> Result<HashMap<K, Value>> {
        Self::read_all(self.storage.as_ref(), &self.policy)
    }

    async fn set(&self, key: K, value: Value) -> Result<()> {
        let text = serde_json::to_string(&value)?;
        debug!(key = key.as_str(), "Writing local value");
        self.storage.set_item(key.as_str(), text)
    }

    fn on_change(&self, callback: ChangeCallback<K>) -> ChangeSubscription {
        let mut receiver = self.storage.subscribe();
        let storage = Arc::clone(&self.storage);
        let policy = Arc::clone(&self.policy);

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    // A lagged receiver still knows something changed.
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }

                let items = match Self::read_all(storage.as_ref(), &policy) {
                    Ok(items) => items,
                    Err(e) => {
                        error!(error = %e, "Skipping storage signal with unreadable state");
                        continue;
                    }
                };

                for key in policy.sync_keys() {
                    match items.get(key) {
                        Some(Value::Null) | None => {}
                        Some(value) => callback(*key, value.clone()),
                    }
                }
            }
            debug!("Local change listener stopped");
        });

        ChangeSubscription::new(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryLocalStorage;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    crate::state_keys! {
        enum TestKey {
            Loaded => "loaded",
            Names => "test.test",
            Label => "test.test2",
        }
    }

    fn adapter(storage: MemoryLocalStorage) -> LocalStore<TestKey> {
        let policy = SyncPolicy::new(vec![TestKey::Names, TestKey::Label], vec![]).unwrap();
        LocalStore::new(Arc::new(storage), Arc::new(policy))
    }

    #[tokio::test]
    async fn test_set_writes_json_text_immediately() {
        let storage = MemoryLocalStorage::new();
        let reader = storage.open_context();
        let store = adapter(storage);

        store.set(TestKey::Names, json!(["a", "b"])).await.unwrap();
        assert_eq!(reader.get_item("test.test"), Some(r#"["a","b"]"#.to_string()));
        assert_eq!(store.get(TestKey::Names).await.unwrap(), Some(json!(["a", "b"])));
        assert_eq!(store.get(TestKey::Label).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_all_decodes_synced_keys_only() {
        let storage = MemoryLocalStorage::new();
        storage.set_item("test.test2", r#""hello""#.to_string()).unwrap();
        storage.set_item("loaded", "true".to_string()).unwrap();
        storage.set_item("unrelated", "not json".to_string()).unwrap();

        let all = adapter(storage).get_all().await.unwrap();
        assert_eq!(all, HashMap::from([(TestKey::Label, json!("hello"))]));
    }

    #[tokio::test]
    async fn test_malformed_value_is_reported() {
        let storage = MemoryLocalStorage::new();
        storage.set_item("test.test", "{broken".to_string()).unwrap();
        let store = adapter(storage);

        let err = store.get(TestKey::Names).await.unwrap_err();
        assert!(matches!(err, Error::MalformedValue { ref key, .. } if key == "test.test"));
        assert!(matches!(store.get_all().await, Err(Error::MalformedValue { .. })));
    }

    #[tokio::test]
    async fn test_signal_reannounces_every_stored_key() {
        let storage = MemoryLocalStorage::new();
        let other = storage.open_context();
        let store = adapter(storage);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = store.on_change(Arc::new(move |key: TestKey, value: Value| {
            sink.lock().push((key, value))
        }));

        other.set_item("test.test2", r#""x""#.to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        other.set_item("test.test", "[1]".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            *seen.lock(),
            vec![
                (TestKey::Label, json!("x")),
                (TestKey::Names, json!([1])),
                (TestKey::Label, json!("x")),
            ]
        );
    }

    #[tokio::test]
    async fn test_own_writes_do_not_signal() {
        let storage = MemoryLocalStorage::new();
        let store = adapter(storage);

        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let _subscription = store.on_change(Arc::new(move |_: TestKey, _: Value| *sink.lock() += 1));

        store.set(TestKey::Names, json!(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*seen.lock(), 0);
    }

    #[tokio::test]
    async fn test_null_values_are_not_announced() {
        let storage = MemoryLocalStorage::new();
        let other = storage.open_context();
        let store = adapter(storage);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _subscription = store.on_change(Arc::new(move |key: TestKey, value: Value| {
            sink.lock().push((key, value))
        }));

        other.set_item("test.test", "null".to_string()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(seen.lock().is_empty());
    }
}
