//! In-memory persistence gateway for tests and ephemeral runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::PersistenceGateway;

/// Keys map to byte vectors held behind an async lock.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryStore {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                key: key.to_string(),
            })
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
