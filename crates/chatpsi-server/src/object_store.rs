//! Filesystem-backed object storage for chat attachments.
//!
//! Objects are addressed by relative, `/`-separated keys such as
//! `<user_id>/1718000000000.ogg` and served publicly under `/storage/`.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use crate::error::ServerError;

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target.components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            _ => {
                return Err(ServerError::BadRequest(
                    "Path traversal detected".to_string(),
                ));
            }
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest(
            "Path traversal detected".to_string(),
        ));
    }
    Ok(resolved)
}

/// Reject keys that are empty, absolute, or contain empty/dot segments.
fn validate_key(key: &str) -> Result<(), ServerError> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(ServerError::BadRequest(format!("Invalid object key: {key}")));
    }
    if key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(ServerError::BadRequest(format!("Invalid object key: {key}")));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ObjectStore {
    base_path: PathBuf,
    public_base_url: String,
    max_size: usize,
}

impl ObjectStore {
    pub async fn new(
        base_path: PathBuf,
        public_base_url: String,
        max_size: usize,
    ) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::Internal(format!(
                "Failed to create storage directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "Object store initialized");

        Ok(Self {
            base_path,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            max_size,
        })
    }

    /// Public URL under which `key` is served.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/storage/{}", self.public_base_url, key)
    }

    /// Write an object, replacing any previous content, and return its URL.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<String, ServerError> {
        if data.len() > self.max_size {
            return Err(ServerError::FileTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty object".to_string()));
        }

        let path = self.safe_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ServerError::Internal(format!("Failed to create {key}: {e}")))?;
        }

        fs::write(&path, data)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to write object {key}: {e}")))?;

        debug!(key, size = data.len(), "Stored object");
        Ok(self.public_url(key))
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, ServerError> {
        let path = self.safe_path(key)?;

        if !path.is_file() {
            return Err(ServerError::NotFound(format!("object {key}")));
        }

        let data = fs::read(&path)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to read object {key}: {e}")))?;

        debug!(key, size = data.len(), "Retrieved object");
        Ok(data)
    }

    fn safe_path(&self, key: &str) -> Result<PathBuf, ServerError> {
        validate_key(key)?;
        ensure_within(&self.base_path, Path::new(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (ObjectStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ObjectStore::new(
            dir.path().to_path_buf(),
            "https://chat.example/".into(),
            1024,
        )
        .await
        .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _dir) = test_store().await;

        let url = store.put("user-1/1700000000000.ogg", b"OggS").await.unwrap();
        assert_eq!(url, "https://chat.example/storage/user-1/1700000000000.ogg");

        let data = store.get("user-1/1700000000000.ogg").await.unwrap();
        assert_eq!(data, b"OggS");
    }

    #[tokio::test]
    async fn test_too_large_is_rejected_before_write() {
        let (store, dir) = test_store().await;
        let err = store.put("user-1/big.bin", &[0u8; 2048]).await.unwrap_err();
        assert!(matches!(err, ServerError::FileTooLarge { size: 2048, max: 1024 }));
        assert!(!dir.path().join("user-1").exists());
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (store, _dir) = test_store().await;
        for key in ["../etc/passwd", "user-1/../../x", "/abs", "a//b", "a\\b", ""] {
            assert!(store.put(key, b"x").await.is_err(), "{key}");
        }
    }

    #[tokio::test]
    async fn test_not_found() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.get("user-1/missing.png").await,
            Err(ServerError::NotFound(_))
        ));
    }
}
