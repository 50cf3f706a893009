use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::persistence::{
    error::PersistenceError,
    traits::{KeyValueStore, StagedConfiguration},
};

/// How a staged configuration save ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagedOutcome {
    /// The save was committed.
    Committed,
    /// The save was aborted.
    Aborted,
}

/// A staged save that records whether it was committed or aborted.
pub struct RecordingStagedConfiguration {
    outcomes: Arc<Mutex<Vec<StagedOutcome>>>,
}

impl RecordingStagedConfiguration {
    /// Records into `outcomes`.
    pub fn new(outcomes: Arc<Mutex<Vec<StagedOutcome>>>) -> Self {
        Self { outcomes }
    }
}

#[async_trait]
impl StagedConfiguration for RecordingStagedConfiguration {
    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        self.outcomes.lock().unwrap().push(StagedOutcome::Committed);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), PersistenceError> {
        self.outcomes.lock().unwrap().push(StagedOutcome::Aborted);
        Ok(())
    }
}

/// A key-value store kept in memory.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: DashMap<(i64, String, String), String>,
}

impl MemoryKeyValueStore {
    /// Creates an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(
        &self,
        org_id: i64,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, PersistenceError> {
        Ok(self
            .entries
            .get(&(org_id, namespace.to_string(), key.to_string()))
            .map(|v| v.value().clone()))
    }

    async fn set(
        &self,
        org_id: i64,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), PersistenceError> {
        self.entries.insert((org_id, namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn delete(&self, org_id: i64, namespace: &str, key: &str) -> Result<(), PersistenceError> {
        self.entries.remove(&(org_id, namespace.to_string(), key.to_string()));
        Ok(())
    }

    async fn keys(&self, org_id: i64, namespace: &str) -> Result<Vec<String>, PersistenceError> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == org_id && e.key().1 == namespace)
            .map(|e| e.key().2.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
