//! Sync policy: which keys are persisted and how quickly.

use crate::error::{Error, Result};
use crate::key::StateKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Debounce class of a synced key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncDelay {
    /// Fast-sync keys.
    Short,
    /// Every other synced key.
    Default,
}

/// Concrete debounce windows for each [`SyncDelay`] class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncDelays {
    /// Window for fast-sync keys, in milliseconds.
    pub short_ms: u64,
    /// Window for all other synced keys, in milliseconds.
    pub default_ms: u64,
}

impl SyncDelays {
    /// Create delays, rejecting a short window that is not strictly shorter.
    pub fn new(short_ms: u64, default_ms: u64) -> Result<Self> {
        let delays = Self {
            short_ms,
            default_ms,
        };
        delays.validate()?;
        Ok(delays)
    }

    /// Check that the short window is strictly shorter than the default one.
    pub fn validate(&self) -> Result<()> {
        if self.short_ms >= self.default_ms {
            return Err(Error::config(format!(
                "short sync delay ({}ms) must be shorter than default delay ({}ms)",
                self.short_ms, self.default_ms
            )));
        }
        Ok(())
    }

    /// Window for a delay class.
    pub fn duration(&self, delay: SyncDelay) -> Duration {
        match delay {
            SyncDelay::Short => Duration::from_millis(self.short_ms),
            SyncDelay::Default => Duration::from_millis(self.default_ms),
        }
    }
}

impl Default for SyncDelays {
    fn default() -> Self {
        Self {
            short_ms: 100,
            default_ms: 1000,
        }
    }
}

/// Allow-list of persisted keys plus the fast-sync subset.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPolicy<K: StateKey> {
    sync: Vec<K>,
    fast: Vec<K>,
}

impl<K: StateKey> SyncPolicy<K> {
    /// Create a policy. Every fast key must also be a sync key.
    pub fn new(sync: Vec<K>, fast: Vec<K>) -> Result<Self> {
        if let Some(stray) = fast.iter().find(|key| !sync.contains(key)) {
            return Err(Error::config(format!(
                "fast-sync key '{}' is not in the sync set",
                stray.as_str()
            )));
        }
        Ok(Self { sync, fast })
    }

    /// A policy that persists nothing.
    pub fn none() -> Self {
        Self {
            sync: Vec::new(),
            fast: Vec::new(),
        }
    }

    /// Whether `key` participates in persistence.
    pub fn is_sync_eligible(&self, key: K) -> bool {
        self.sync.contains(&key)
    }

    /// Whether the storage name `name` is a synced key.
    pub fn is_sync_name(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Resolve a storage name to a synced key.
    pub fn resolve(&self, name: &str) -> Option<K> {
        self.sync.iter().copied().find(|key| key.as_str() == name)
    }

    /// Debounce class for `key`.
    pub fn sync_delay_for(&self, key: K) -> SyncDelay {
        if self.fast.contains(&key) {
            SyncDelay::Short
        } else {
            SyncDelay::Default
        }
    }

    /// Synced keys in declaration order.
    pub fn sync_keys(&self) -> &[K] {
        &self.sync
    }

    /// Storage names of the synced keys.
    pub fn sync_names(&self) -> Vec<String> {
        self.sync.iter().map(|key| key.as_str().to_string()).collect()
    }

    /// Keep only entries whose name is a synced key, resolving the names.
    pub fn retain_synced<V, I>(&self, items: I) -> HashMap<K, V>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        items
            .into_iter()
            .filter_map(|(name, value)| self.resolve(&name).map(|key| (key, value)))
            .collect()
    }
}
