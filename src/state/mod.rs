//! Persistent memory of what the engine did, keyed by `(guid, attribute)`.
//!
//! Records are kept as raw TOML values and only decoded on lookup, so a
//! single malformed record surfaces as [`StoreError::CorruptRecord`] for that
//! attribute instead of poisoning the whole store.
mod file;
mod memory;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

/// What was last applied for one attribute of one policy object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Content hash of the setting when it was last applied.
    #[serde(rename = "hash")]
    pub last_hash: String,
    /// Artifacts produced by the last apply; empty for run-once settings.
    #[serde(rename = "files", default)]
    pub artifact_paths: Vec<PathBuf>,
    /// Superseded artifacts whose removal failed; retried on every pass.
    #[serde(rename = "stale", default, skip_serializing_if = "Vec::is_empty")]
    pub pending_removal: Vec<PathBuf>,
}

impl StateRecord {
    /// Create a record.
    #[must_use]
    pub fn new(last_hash: impl Into<String>, artifact_paths: Vec<PathBuf>) -> Self {
        Self {
            last_hash: last_hash.into(),
            artifact_paths,
            pending_removal: Vec::new(),
        }
    }
}

/// Durable key-value mapping from `(guid, attribute)` to [`StateRecord`].
///
/// Mutations are staged in memory; [`commit`](Self::commit) makes them
/// durable. The engine commits after every record change.
pub trait StateStore: Send + std::fmt::Debug {
    /// Look up the record for `attribute` under `guid`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRecord`] if the stored value cannot be
    /// decoded.
    fn get(&self, guid: &str, attribute: &str) -> Result<Option<StateRecord>, StoreError>;

    /// Insert or replace the record for `attribute` under `guid`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialize`] if the record cannot be encoded.
    fn set(&mut self, guid: &str, attribute: &str, record: &StateRecord) -> Result<(), StoreError>;

    /// Remove the record for `attribute` under `guid`, if any.
    fn delete(&mut self, guid: &str, attribute: &str);

    /// Every attribute key recorded under `guid`, in sorted order.
    fn attributes(&self, guid: &str) -> Vec<String>;

    /// Make staged changes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn commit(&mut self) -> Result<(), StoreError>;
}

/// In-memory table shared by the store implementations.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StateTable {
    policies: BTreeMap<String, BTreeMap<String, toml::Value>>,
}

impl StateTable {
    pub(crate) fn get(&self, guid: &str, attribute: &str) -> Result<Option<StateRecord>, StoreError> {
        let Some(value) = self.policies.get(guid).and_then(|attrs| attrs.get(attribute)) else {
            return Ok(None);
        };
        value
            .clone()
            .try_into()
            .map(Some)
            .map_err(|e: toml::de::Error| StoreError::CorruptRecord {
                guid: guid.to_string(),
                attribute: attribute.to_string(),
                message: e.message().to_string(),
            })
    }

    pub(crate) fn set(
        &mut self,
        guid: &str,
        attribute: &str,
        record: &StateRecord,
    ) -> Result<(), StoreError> {
        let value =
            toml::Value::try_from(record).map_err(|e| StoreError::Serialize(e.to_string()))?;
        self.policies
            .entry(guid.to_string())
            .or_default()
            .insert(attribute.to_string(), value);
        Ok(())
    }

    pub(crate) fn delete(&mut self, guid: &str, attribute: &str) {
        if let Some(attrs) = self.policies.get_mut(guid) {
            attrs.remove(attribute);
            if attrs.is_empty() {
                self.policies.remove(guid);
            }
        }
    }

    pub(crate) fn attributes(&self, guid: &str) -> Vec<String> {
        self.policies
            .get(guid)
            .map(|attrs| attrs.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, guid: &str, attribute: &str, value: toml::Value) {
        self.policies
            .entry(guid.to_string())
            .or_default()
            .insert(attribute.to_string(), value);
    }
}
