//! Flattened configuration surface.
//!
//! Application state is described as a nested JSON document. Every leaf path
//! becomes a dotted config key; arrays and scalars are leaves and are never
//! descended into.

use crate::error::{Error, Result};
use crate::key::StateKey;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Flatten a nested JSON object into `dotted.path -> leaf` pairs.
///
/// A non-object root has no paths and yields an empty map.
pub fn flatten(root: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    if let Value::Object(map) = root {
        flatten_into(map, "", &mut out);
    }
    out
}

fn flatten_into(map: &Map<String, Value>, prefix: &str, out: &mut BTreeMap<String, Value>) {
    for (name, value) in map {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match value {
            Value::Object(child) => flatten_into(child, &path, out),
            leaf => {
                out.insert(path, leaf.clone());
            }
        }
    }
}

static NULL: Value = Value::Null;

/// Initial value of every declared key.
#[derive(Debug, Clone, PartialEq)]
pub struct Defaults<K: StateKey> {
    values: HashMap<K, Value>,
}

impl<K: StateKey> Defaults<K> {
    /// Build defaults from a nested config document.
    ///
    /// Every declared key must be present as a leaf. Leaves that name no
    /// declared key are ignored.
    pub fn from_nested(root: &Value) -> Result<Self> {
        let mut flat = flatten(root);
        let mut values = HashMap::with_capacity(K::all().len());

        for key in K::all() {
            let value = flat.remove(key.as_str()).ok_or_else(|| {
                Error::config(format!("default value missing for key '{}'", key.as_str()))
            })?;
            values.insert(*key, value);
        }

        for extra in flat.keys() {
            debug!(path = %extra, "Ignoring config leaf with no declared key");
        }

        Ok(Self { values })
    }

    /// Build defaults from explicit pairs. Keys left out default to `null`.
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut values: HashMap<K, Value> =
            K::all().iter().map(|key| (*key, Value::Null)).collect();
        values.extend(pairs);
        Self { values }
    }

    /// Default value for `key`.
    pub fn get(&self, key: K) -> &Value {
        self.values.get(&key).unwrap_or(&NULL)
    }

    /// Consume into the full key/value snapshot.
    pub fn into_map(self) -> HashMap<K, Value> {
        self.values
    }
}
