use slatedb::WriteBatch;
use std::collections::BTreeMap;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::client::{KvRead, StateStore};

/// A buffered write transaction.
///
/// Reads see the transaction's own staged writes. Nothing reaches the store
/// until [`Transaction::commit`]; dropping or rolling back discards the
/// staged writes. Holds the store's writer lock for its whole lifetime.
pub struct Transaction {
    store: StateStore,
    /// `None` marks a staged delete.
    staged: BTreeMap<String, Option<Vec<u8>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Transaction {
    pub(crate) fn new(store: StateStore, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            store,
            staged: BTreeMap::new(),
            _guard: guard,
        }
    }

    /// Stage a value under the given key.
    pub fn put(&mut self, key: &str, value: Vec<u8>) {
        self.staged.insert(key.to_string(), Some(value));
    }

    /// Stage deletion of a key.
    pub fn delete(&mut self, key: &str) {
        self.staged.insert(key.to_string(), None);
    }

    /// Apply every staged write atomically.
    pub async fn commit(self) -> anyhow::Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        for (key, value) in &self.staged {
            match value {
                Some(v) => batch.put(key.as_bytes(), v),
                None => batch.delete(key.as_bytes()),
            }
        }
        self.store
            .db()
            .write(batch)
            .await
            .map_err(|e| anyhow::anyhow!("SlateDB write batch failed: {}", e))?;
        debug!("Committed transaction ({} writes)", self.staged.len());
        Ok(())
    }

    /// Discard every staged write.
    pub fn rollback(self) {
        debug!("Rolled back transaction ({} writes)", self.staged.len());
    }
}

impl KvRead for Transaction {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        match self.staged.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.store.get(key).await,
        }
    }

    async fn list_prefix(&self, prefix: &str) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
        let mut merged: BTreeMap<String, Vec<u8>> =
            self.store.list_prefix(prefix).await?.into_iter().collect();
        for (key, value) in self.staged.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            match value {
                Some(v) => merged.insert(key.clone(), v.clone()),
                None => merged.remove(key),
            };
        }
        Ok(merged.into_iter().collect())
    }
}
