//! Blob storage for uploaded payloads
//!
//! Keys follow `{job_id}/{file_id}/{filename}` and are write-once: a
//! key is assigned at upload time and never reused, so a second put of
//! the same key is an error rather than an overwrite. Read access for
//! clients goes through expiring signed URLs generated per request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use ocrq_common::{time, Error, Result};

/// Build the canonical object key for an uploaded file.
pub fn object_key(job_id: Uuid, file_id: Uuid, filename: &str) -> String {
    format!("{}/{}/{}", job_id, file_id, filename)
}

/// Write-once blob store interface.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a payload under a fresh key. Fails if the key exists.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Fetch a payload.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Generate a fresh, expiring read-access URL for a stored payload.
    fn read_url(&self, key: &str) -> String;
}

/// Filesystem-backed object store rooted at a local directory.
pub struct FsObjectStore {
    root: PathBuf,
    signing_secret: String,
    url_ttl_seconds: u64,
}

impl FsObjectStore {
    pub fn new(root: PathBuf, signing_secret: String, url_ttl_seconds: u64) -> Self {
        Self {
            root,
            signing_secret,
            url_ttl_seconds,
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // Keys are server-generated, but refuse traversal outright
        if key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(Error::InvalidInput(format!("Invalid object key: {}", key)));
        }
        Ok(self.root.join(key))
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signing_secret.as_bytes());
        hasher.update(b"\0");
        hasher.update(key.as_bytes());
        hasher.update(b"\0");
        hasher.update(expires.to_string().as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if tokio::fs::try_exists(&path).await? {
            return Err(Error::InvalidInput(format!(
                "Object key already exists: {}",
                key
            )));
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Object not found: {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_url(&self, key: &str) -> String {
        let expires = time::now().timestamp() + self.url_ttl_seconds as i64;
        let token = self.sign(key, expires);
        format!(
            "file://{}/{}?expires={}&token={}",
            self.root.display(),
            key,
            expires,
            token
        )
    }
}

/// In-process object store for tests.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Err(Error::InvalidInput(format!(
                "Object key already exists: {}",
                key
            )));
        }
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))
    }

    fn read_url(&self, key: &str) -> String {
        format!("memory://{}", key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_object_key_layout() {
        let job = Uuid::new_v4();
        let file = Uuid::new_v4();
        let key = object_key(job, file, "scan.png");
        assert_eq!(key, format!("{}/{}/scan.png", job, file));
    }

    #[tokio::test]
    async fn test_fs_put_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf(), "secret".into(), 60);

        store.put("a/b/scan.png", b"payload").await.unwrap();
        assert_eq!(store.get("a/b/scan.png").await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_fs_put_is_write_once() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf(), "secret".into(), 60);

        store.put("a/b/scan.png", b"one").await.unwrap();
        let err = store.put("a/b/scan.png", b"two").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        // First payload untouched
        assert_eq!(store.get("a/b/scan.png").await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_fs_missing_object_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf(), "secret".into(), 60);
        assert!(matches!(
            store.get("a/b/none.png").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf(), "secret".into(), 60);
        assert!(store.put("../escape", b"x").await.is_err());
        assert!(store.get("a//b").await.is_err());
    }

    #[test]
    fn test_read_url_carries_signature() {
        let store = FsObjectStore::new(PathBuf::from("/data"), "secret".into(), 60);
        let url = store.read_url("a/b/scan.png");
        assert!(url.contains("expires="));
        assert!(url.contains("token="));

        // Different keys sign differently
        let other = store.read_url("a/b/other.png");
        let token = |u: &str| u.split("token=").nth(1).unwrap().to_string();
        assert_ne!(token(&url), token(&other));
    }
}
