//! Raw persistent storage backends.
//!
//! Two storage contracts are supported:
//!
//! - [`NamespacedStorage`]: an asynchronous, partitioned store that accepts
//!   structured values natively and reports per-key changes with the name of
//!   the partition they happened in.
//! - [`LocalStorage`]: a synchronous text store. It only raises a coarse
//!   signal, and only in contexts other than the one that wrote.
//!
//! The adapter layer ([`crate::adapter`]) turns either one into a
//! [`PersistentStore`](crate::adapter::PersistentStore).

mod memory;

pub use memory::{MemoryLocalStorage, MemoryNamespacedStorage};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Old and new value of one key in a [`NamespaceChange`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    /// Value before the change, if the key existed.
    pub old_value: Option<Value>,
    /// Value after the change, absent when the key was removed.
    pub new_value: Option<Value>,
}

/// A batch of changes raised by a [`NamespacedStorage`].
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceChange {
    /// Partition the changes happened in.
    pub namespace: String,
    /// Changed keys.
    pub changes: HashMap<String, ValueChange>,
}

/// Signal raised by a [`LocalStorage`] when another context wrote to it.
///
/// The key is informational only; consumers re-read the whole store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSignal {
    /// Key that was written, if known.
    pub key: Option<String>,
}

/// Asynchronous, namespaced key/value storage.
#[async_trait]
pub trait NamespacedStorage: Send + Sync {
    /// Read `keys` from `namespace`, or every key when `keys` is `None`.
    ///
    /// Missing keys are left out of the result.
    async fn get(&self, namespace: &str, keys: Option<&[String]>) -> Result<HashMap<String, Value>>;

    /// Write every entry of `items` into `namespace`.
    async fn set(&self, namespace: &str, items: HashMap<String, Value>) -> Result<()>;

    /// Subscribe to changes across all namespaces.
    fn subscribe(&self) -> broadcast::Receiver<NamespaceChange>;
}

/// Synchronous text key/value storage shared between execution contexts.
pub trait LocalStorage: Send + Sync {
    /// Stored text for `key`.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`.
    fn set_item(&self, key: &str, value: String) -> Result<()>;

    /// Every stored entry.
    fn items(&self) -> Vec<(String, String)>;

    /// Subscribe to writes made by other contexts.
    fn subscribe(&self) -> broadcast::Receiver<StorageSignal>;
}
