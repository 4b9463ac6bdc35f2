//! Per-key debouncing of delayed actions.
//!
//! Scheduling an action for a key cancels whatever is still pending for that
//! key, so at most one action per key is waiting at any instant.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::trace;

/// Pending action for one key.
#[derive(Debug)]
struct DebounceEntry {
    generation: u64,
    handle: AbortHandle,
}

/// Registry of pending debounced actions, keyed by string.
#[derive(Debug, Default)]
pub struct DebounceRegistry {
    entries: Arc<Mutex<HashMap<String, DebounceEntry>>>,
    next_generation: AtomicU64,
}

impl DebounceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` after `delay`, replacing any action still pending for `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, key: impl Into<String>, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let entries = Arc::clone(&self.entries);
        let task_key = key.clone();

        // Held across the spawn so the task cannot look up its entry before it exists.
        let mut pending = self.entries.lock();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut entries = entries.lock();
                match entries.get(&task_key) {
                    Some(entry) if entry.generation == generation => {
                        entries.remove(&task_key);
                    }
                    _ => return,
                }
            }
            trace!(key = %task_key, "Running debounced action");
            action.await;
        });

        let entry = DebounceEntry {
            generation,
            handle: task.abort_handle(),
        };
        if let Some(previous) = pending.insert(key, entry) {
            previous.handle.abort();
            trace!(generation = previous.generation, "Superseded pending debounced action");
        }
    }

    /// Number of keys with an action still waiting.
    pub fn pending(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether an action is waiting for `key`.
    pub fn is_pending(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}
