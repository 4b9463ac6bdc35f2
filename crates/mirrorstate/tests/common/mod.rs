//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use mirrorstate::{
    Backends, Defaults, LocalStore, MemoryLocalStorage, MemoryNamespacedStorage, NamespacedStore,
    SyncDelays, SyncPolicy, SyncedStore,
};
use serde_json::json;
use std::sync::Arc;

mirrorstate::state_keys! {
    /// Keys of the test application state.
    pub enum AppKey {
        Loaded => "loaded",
        Tags => "test.test",
        Title => "test.test2",
        Notes => "test.test3",
        Scratch => "scratch.buffer",
    }
}

pub const NAMESPACE: &str = "local";

/// Route test logs through the test harness writer.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn defaults() -> Defaults<AppKey> {
    Defaults::from_nested(&json!({
        "loaded": false,
        "test": {
            "test": ["test", "test2"],
            "test2": "test2",
            "test3": "test3"
        },
        "scratch": { "buffer": "" }
    }))
    .expect("fixture defaults cover every key")
}

/// Tags and Title sync fast, Notes on the default window, the rest never.
pub fn policy() -> Arc<SyncPolicy<AppKey>> {
    Arc::new(
        SyncPolicy::new(
            vec![AppKey::Tags, AppKey::Title, AppKey::Notes],
            vec![AppKey::Tags, AppKey::Title],
        )
        .expect("fast keys are synced"),
    )
}

pub fn namespaced_store(storage: &MemoryNamespacedStorage) -> Arc<SyncedStore<AppKey>> {
    let adapter = NamespacedStore::new(
        Arc::new(storage.clone()),
        NAMESPACE,
        policy(),
        SyncDelays::default(),
    );
    SyncedStore::new(defaults(), policy(), Arc::new(adapter))
}

pub fn local_store(storage: MemoryLocalStorage) -> Arc<SyncedStore<AppKey>> {
    let adapter = LocalStore::new(Arc::new(storage), policy());
    SyncedStore::new(defaults(), policy(), Arc::new(adapter))
}

pub fn backends(storage: &MemoryNamespacedStorage, local: MemoryLocalStorage) -> Backends {
    Backends::new()
        .with_namespaced(Arc::new(storage.clone()))
        .with_local(Arc::new(local))
}
