//! Persistent store adapter.
//!
//! [`PersistentStore`] is the uniform view of the persisted snapshot used by
//! [`SyncedStore`](crate::store::SyncedStore). Two implementations exist, one
//! per raw backend:
//!
//! ```text
//! ┌────────────────┐    ┌──────────────────┐    ┌────────────────────┐
//! │  SyncedStore   │───▶│  NamespacedStore │───▶│ NamespacedStorage  │
//! │                │    │  (debounced)     │    │ (async, per-key    │
//! │                │    └──────────────────┘    │  change events)    │
//! │                │    ┌──────────────────┐    ├────────────────────┤
//! │                │───▶│   LocalStore     │───▶│   LocalStorage     │
//! │                │    │  (immediate)     │    │ (JSON text, coarse │
//! └────────────────┘    └──────────────────┘    │  signals)          │
//!                                               └────────────────────┘
//! ```
//!
//! The implementation is picked once at startup by [`select_backend`].

mod local;
mod namespaced;

pub use local::LocalStore;
pub use namespaced::NamespacedStore;

use crate::backend::{LocalStorage, NamespacedStorage};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::key::StateKey;
use crate::policy::SyncPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Callback invoked with each changed key and its new value.
pub type ChangeCallback<K> = Arc<dyn Fn(K, Value) + Send + Sync>;

/// Which raw backend an adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Asynchronous namespaced storage.
    Namespaced,
    /// Synchronous local text storage.
    Local,
}

/// Backend requested by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Namespaced storage if provided, local storage otherwise.
    #[default]
    Auto,
    /// Namespaced storage only.
    Namespaced,
    /// Local storage only.
    Local,
}

/// Uniform interface over the persisted snapshot.
///
/// Implementations only ever surface keys of their [`SyncPolicy`]. Callers
/// never pass a key outside the sync set to [`set`](Self::set).
#[async_trait]
pub trait PersistentStore<K: StateKey>: Send + Sync {
    /// Backend this adapter writes to.
    fn kind(&self) -> BackendKind;

    /// Persisted value of `key`, or `None` if it was never persisted.
    async fn get(&self, key: K) -> Result<Option<Value>>;

    /// Every persisted sync-set key.
    async fn get_all(&self) -> Result<HashMap<K, Value>>;

    /// Persist `value` under `key`.
    async fn set(&self, key: K, value: Value) -> Result<()>;

    /// Invoke `callback` for changes made to the backend.
    ///
    /// Must be called from within a tokio runtime.
    fn on_change(&self, callback: ChangeCallback<K>) -> ChangeSubscription;
}

/// Handle to a running change listener.
///
/// Dropping the handle leaves the listener running.
#[derive(Debug)]
pub struct ChangeSubscription {
    task: JoinHandle<()>,
}

impl ChangeSubscription {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// Stop the listener.
    pub fn cancel(self) {
        self.task.abort();
    }

    /// Whether the listener is still running.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Raw backends available to the process.
#[derive(Clone, Default)]
pub struct Backends {
    namespaced: Option<Arc<dyn NamespacedStorage>>,
    local: Option<Arc<dyn LocalStorage>>,
}

impl Backends {
    /// No backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide a namespaced backend.
    pub fn with_namespaced(mut self, storage: Arc<dyn NamespacedStorage>) -> Self {
        self.namespaced = Some(storage);
        self
    }

    /// Provide a local backend.
    pub fn with_local(mut self, storage: Arc<dyn LocalStorage>) -> Self {
        self.local = Some(storage);
        self
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("namespaced", &self.namespaced.is_some())
            .field("local", &self.local.is_some())
            .finish()
    }
}

/// Build the adapter for the backend requested by `config`.
///
/// Fails with [`Error::BackendUnavailable`] when the requested backend was
/// not provided.
pub fn select_backend<K: StateKey>(
    config: &SyncConfig,
    policy: Arc<SyncPolicy<K>>,
    backends: Backends,
) -> Result<Arc<dyn PersistentStore<K>>> {
    config.validate()?;

    let namespaced = || {
        backends.namespaced.clone().map(|storage| {
            Arc::new(NamespacedStore::new(
                storage,
                config.namespace.clone(),
                Arc::clone(&policy),
                config.delays,
            )) as Arc<dyn PersistentStore<K>>
        })
    };
    let local = || {
        backends.local.clone().map(|storage| {
            Arc::new(LocalStore::new(storage, Arc::clone(&policy))) as Arc<dyn PersistentStore<K>>
        })
    };

    let selected = match config.backend {
        BackendPreference::Auto => namespaced().or_else(local),
        BackendPreference::Namespaced => namespaced(),
        BackendPreference::Local => local(),
    };

    let adapter = selected.ok_or_else(|| {
        Error::BackendUnavailable(format!("no storage backend for preference {:?}", config.backend))
    })?;
    info!(backend = ?adapter.kind(), "Using storage backend");
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryLocalStorage, MemoryNamespacedStorage};

    crate::state_keys! {
        enum TestKey {
            Label => "test.label",
        }
    }

    fn policy() -> Arc<SyncPolicy<TestKey>> {
        Arc::new(SyncPolicy::new(vec![TestKey::Label], vec![]).unwrap())
    }

    fn both() -> Backends {
        Backends::new()
            .with_namespaced(Arc::new(MemoryNamespacedStorage::new()))
            .with_local(Arc::new(MemoryLocalStorage::new()))
    }

    #[test]
    fn test_auto_prefers_namespaced() {
        let adapter = select_backend(&SyncConfig::default(), policy(), both()).unwrap();
        assert_eq!(adapter.kind(), BackendKind::Namespaced);
    }

    #[test]
    fn test_auto_falls_back_to_local() {
        let backends = Backends::new().with_local(Arc::new(MemoryLocalStorage::new()));
        let adapter = select_backend(&SyncConfig::default(), policy(), backends).unwrap();
        assert_eq!(adapter.kind(), BackendKind::Local);
    }

    #[test]
    fn test_explicit_preference_wins() {
        let config = SyncConfig::default().with_backend(BackendPreference::Local);
        let adapter = select_backend(&config, policy(), both()).unwrap();
        assert_eq!(adapter.kind(), BackendKind::Local);
    }

    #[test]
    fn test_no_backend_is_unavailable() {
        let err = select_backend(&SyncConfig::default(), policy(), Backends::new())
            .err()
            .unwrap();
        assert!(matches!(err, Error::BackendUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_requested_backend_missing_is_unavailable() {
        let config = SyncConfig::default().with_backend(BackendPreference::Namespaced);
        let backends = Backends::new().with_local(Arc::new(MemoryLocalStorage::new()));
        let err = select_backend(&config, policy(), backends).err().unwrap();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }
}
