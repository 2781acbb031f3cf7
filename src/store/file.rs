//! File-backed persistence gateway — one JSON file per key under a base directory.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::PersistenceGateway;

const FILE_EXTENSION: &str = "json";

/// Stores each key as `<base>/<key>.json`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write never leaves a truncated document behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    /// Open (or create) a store rooted at `base_path`.
    pub async fn open(base_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        info!(path = %base_path.display(), "File store opened");
        Ok(Self { base_path })
    }

    /// Resolve a key to its file path, rejecting anything that could escape the base directory.
    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.base_path.join(format!("{key}.{FILE_EXTENSION}")))
    }
}

fn not_found_as(key: &str, err: std::io::Error) -> StoreError {
    if err.kind() == ErrorKind::NotFound {
        StoreError::NotFound {
            key: key.to_string(),
        }
    } else {
        StoreError::Io(err)
    }
}

#[async_trait]
impl PersistenceGateway for FileStore {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp_path = path.with_extension(format!("{FILE_EXTENSION}.tmp"));
        fs::write(&tmp_path, bytes).await?;
        fs::rename(&tmp_path, &path).await?;
        debug!(key, bytes = bytes.len(), "Stored document");
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(key)?;
        fs::read(&path).await.map_err(|e| not_found_as(key, e))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::remove_file(&path).await.map_err(|e| not_found_as(key, e))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut read_dir = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && stem.starts_with(prefix)
            {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
