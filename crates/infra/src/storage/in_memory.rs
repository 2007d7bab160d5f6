use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::r#trait::{LockToken, StoreError, Storer};

#[derive(Debug, Default)]
struct Entries {
    values: BTreeMap<String, (String, u64)>,
    /// Last revision handed out; revisions are never reused, even across a
    /// delete and re-create of the same key.
    revision: u64,
}

/// In-memory key/value store with revision-based compare-and-swap.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryStorer {
    entries: RwLock<Entries>,
}

impl InMemoryStorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.values.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StoreError {
    StoreError::Backend("lock poisoned".to_string())
}

#[async_trait]
impl Storer for InMemoryStorer {
    async fn get(&self, key: &str) -> Result<(String, LockToken), StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        entries
            .values
            .get(key)
            .map(|(value, rev)| (value.clone(), LockToken::Revision(*rev)))
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: String, lock: LockToken) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let current = entries.values.get(key).map(|(_, rev)| *rev);
        if !lock.matches(current) {
            return Err(StoreError::StaleData);
        }

        entries.revision += 1;
        let rev = entries.revision;
        entries.values.insert(key.to_string(), (value, rev));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries
            .values
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))
    }

    async fn keys(&self, suffix: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .values
            .keys()
            .filter(|k| k.ends_with(suffix))
            .cloned()
            .collect())
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
