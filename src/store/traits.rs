//! `PersistenceGateway` trait — the durable key/value surface the workflow
//! state machine snapshots documents through.

use async_trait::async_trait;

use crate::error::StoreError;

/// Backend-agnostic byte store keyed by string.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Write (or overwrite) the value stored under `key`.
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// Read the value stored under `key`. Missing keys yield `StoreError::NotFound`.
    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Delete the value stored under `key`. Missing keys yield `StoreError::NotFound`.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Check whether `key` holds a value.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// List stored keys beginning with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
