//! Volatile state store for tests and dry runs.
use super::{StateRecord, StateStore, StateTable};
use crate::error::StoreError;

/// A [`StateStore`] that never touches disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    table: StateTable,
    commits: usize,
}

impl MemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times [`StateStore::commit`] has been called.
    #[must_use]
    pub const fn commits(&self) -> usize {
        self.commits
    }

    /// Store a raw value, bypassing record encoding.
    #[cfg(test)]
    pub(crate) fn insert_raw(&mut self, guid: &str, attribute: &str, value: toml::Value) {
        self.table.insert_raw(guid, attribute, value);
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, guid: &str, attribute: &str) -> Result<Option<StateRecord>, StoreError> {
        self.table.get(guid, attribute)
    }

    fn set(&mut self, guid: &str, attribute: &str, record: &StateRecord) -> Result<(), StoreError> {
        self.table.set(guid, attribute, record)
    }

    fn delete(&mut self, guid: &str, attribute: &str) {
        self.table.delete(guid, attribute);
    }

    fn attributes(&self, guid: &str) -> Vec<String> {
        self.table.attributes(guid)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.commits += 1;
        Ok(())
    }
}
