//! Configuration for the sync layer.
//!
//! ```toml
//! backend = "auto"
//! namespace = "local"
//! sync = ["editor.theme", "editor.font_size"]
//! fast = ["editor.theme"]
//!
//! [delays]
//! short_ms = 100
//! default_ms = 1000
//! ```

use crate::adapter::BackendPreference;
use crate::error::{Error, Result};
use crate::key::{parse_key, StateKey};
use crate::policy::{SyncDelays, SyncPolicy};
use serde::{Deserialize, Serialize};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "local";

/// Sync layer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Backend to persist into.
    pub backend: BackendPreference,
    /// Partition used by the namespaced backend.
    pub namespace: String,
    /// Persisted keys, in order.
    pub sync: Vec<String>,
    /// Persisted keys flushed on the short window.
    pub fast: Vec<String>,
    /// Debounce windows for namespaced writes.
    pub delays: SyncDelays,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            namespace: DEFAULT_NAMESPACE.to_string(),
            sync: Vec::new(),
            fast: Vec::new(),
            delays: SyncDelays::default(),
        }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        self.delays.validate()
    }

    /// Resolve the key lists into a [`SyncPolicy`].
    pub fn policy<K: StateKey>(&self) -> Result<SyncPolicy<K>> {
        let sync = self
            .sync
            .iter()
            .map(|name| parse_key(name))
            .collect::<Result<Vec<K>>>()?;
        let fast = self
            .fast
            .iter()
            .map(|name| parse_key(name))
            .collect::<Result<Vec<K>>>()?;
        SyncPolicy::new(sync, fast)
    }

    /// Set the backend preference.
    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the debounce windows.
    pub fn with_delays(mut self, delays: SyncDelays) -> Self {
        self.delays = delays;
        self
    }

    /// Set the persisted keys.
    pub fn with_sync_keys<K: StateKey>(mut self, keys: &[K]) -> Self {
        self.sync = keys.iter().map(|key| key.as_str().to_string()).collect();
        self
    }

    /// Set the fast-sync keys.
    pub fn with_fast_keys<K: StateKey>(mut self, keys: &[K]) -> Self {
        self.fast = keys.iter().map(|key| key.as_str().to_string()).collect();
        self
    }
}
