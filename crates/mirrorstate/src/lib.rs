//! # Mirrorstate
//!
//! Reactive key/value application state mirrored to a persistent storage
//! backend.
//!
//! ## Features
//!
//! - **Enumerated keys** declared with [`state_keys!`], flattened from a nested config document
//! - **Two backends**: asynchronous namespaced storage and synchronous local text storage
//! - **Per-key debouncing** of namespaced writes, with a fast window for selected keys
//! - **Sync policy** restricting which keys are ever read from or written to the backend
//! - **Echo-free sync**: remote changes are never written back, and writes that would not
//!   change the persisted value are skipped
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │   SyncedStore   │───▶│ PersistentStore  │───▶│  Raw backend    │
//! │ (get/set/       │    │ (Namespaced or   │    │ (Namespaced or  │
//! │  subscribe)     │◀───│  Local adapter)  │◀───│  LocalStorage)  │
//! └─────────────────┘    └──────────────────┘    └─────────────────┘
//!         │                       │
//!         ▼                       ▼
//! ┌─────────────────┐    ┌──────────────────┐
//! │   SyncPolicy    │    │ DebounceRegistry │
//! └─────────────────┘    └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mirrorstate::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! mirrorstate::state_keys! {
//!     pub enum Key {
//!         Loaded => "loaded",
//!         Theme => "editor.theme",
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> mirrorstate::Result<()> {
//!     let config = SyncConfig::default().with_sync_keys(&[Key::Theme]);
//!     let policy = Arc::new(config.policy::<Key>()?);
//!     let backends = Backends::new().with_local(Arc::new(MemoryLocalStorage::new()));
//!     let adapter = select_backend(&config, Arc::clone(&policy), backends)?;
//!
//!     let defaults = Defaults::from_nested(&json!({
//!         "loaded": false,
//!         "editor": { "theme": "light" }
//!     }))?;
//!     let store = SyncedStore::new(defaults, policy, adapter);
//!     store.init(Some(Key::Loaded)).await?;
//!
//!     store.subscribe(Key::Theme, |theme| println!("theme is now {theme}"));
//!     store.set(Key::Theme, json!("dark"));
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapter;
pub mod backend;
pub mod config;
mod debounce;
pub mod error;
mod key;
pub mod policy;
pub mod schema;
pub mod store;

pub use adapter::{
    select_backend, BackendKind, BackendPreference, Backends, ChangeCallback, ChangeSubscription,
    LocalStore, NamespacedStore, PersistentStore,
};
pub use backend::{
    LocalStorage, MemoryLocalStorage, MemoryNamespacedStorage, NamespaceChange, NamespacedStorage,
    StorageSignal, ValueChange,
};
pub use config::{SyncConfig, DEFAULT_NAMESPACE};
pub use debounce::DebounceRegistry;
pub use error::{Error, Result};
pub use key::{parse_key, StateKey};
pub use policy::{SyncDelay, SyncDelays, SyncPolicy};
pub use schema::{flatten, Defaults};
pub use store::{Origin, StateChange, SubscriptionId, SyncedStore};

/// Re-export common types for convenience
pub mod prelude {
    pub use crate::{
        select_backend, Backends, Defaults, Error, MemoryLocalStorage, MemoryNamespacedStorage,
        Origin, PersistentStore, Result, StateKey, SyncConfig, SyncPolicy, SyncedStore,
    };
}
