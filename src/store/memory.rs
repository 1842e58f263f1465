//! In-memory entity store.
//!
//! Used by tests and for ephemeral deployments. All operations take a single
//! mutex, so every transaction is serializable.

use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use super::{Entities, EntityStore, Key, Page, Query, Result, StoreError, Transaction};

/// A volatile [`EntityStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: Mutex<Entities>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored (all kinds).
    pub fn len(&self) -> usize {
        self.lock().map(|e| e.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entities>> {
        self.entities.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl EntityStore for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.lock()?.records.get(key).cloned())
    }

    async fn upsert(&self, key: &Key, value: Value) -> Result<()> {
        self.lock()?.records.insert(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<bool> {
        Ok(self.lock()?.records.remove(key).is_some())
    }

    async fn transaction<T, F>(&self, root: &Key, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut Transaction<'_>) -> Result<T> + Send,
    {
        self.lock()?.run_transaction(root, f)
    }

    async fn query(&self, query: &Query) -> Result<Page> {
        self.lock()?.query(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_get_delete() {
        let store = MemoryStore::new();
        let key = Key::root("BuildJob", "b1");

        assert_eq!(store.get(&key).await.unwrap(), None);
        store.upsert(&key, json!({"status": "queued"})).await.unwrap();
        assert_eq!(
            store.get(&key).await.unwrap(),
            Some(json!({"status": "queued"}))
        );
        assert!(store.delete(&key).await.unwrap());
        assert!(!store.delete(&key).await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn transaction_commits_all_writes() {
        let store = MemoryStore::new();
        let root = Key::root("TestRun", "r1");

        store
            .transaction(&root, |tx| {
                tx.put(root.clone(), json!({"n": 1}))?;
                tx.put(root.child("ComponentTestResult", "a"), json!({}))?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
    }
}
