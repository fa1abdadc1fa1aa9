use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::hash::Hash;

/// Errors that can occur in a store backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract hash-keyed persistent byte store
///
/// Content-addressed: callers must pass the correct hash on `put`. A
/// conforming backend may verify it but need not. Absence is an expected
/// outcome of distributed storage and is surfaced as `Ok(None)` from `get`,
/// never as an error.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Get the bytes stored under a hash, or `None` if absent
    async fn get(&self, hash: &Hash) -> Result<Option<Bytes>, StoreError>;

    /// Store bytes under a hash
    async fn put(&self, hash: Hash, data: Bytes) -> Result<(), StoreError>;

    /// Check whether a hash is present
    async fn has(&self, hash: &Hash) -> Result<bool, StoreError>;
}

/// In-memory store backend
///
/// Used for tests and ephemeral peers. Writes of identical content are
/// idempotent, so no further synchronization than a read/write lock is
/// needed.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blocks: Arc<RwLock<HashMap<Hash, Bytes>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks currently held
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, hash: &Hash) -> Result<Option<Bytes>, StoreError> {
        Ok(self.blocks.read().get(hash).cloned())
    }

    async fn put(&self, hash: Hash, data: Bytes) -> Result<(), StoreError> {
        self.blocks.write().insert(hash, data);
        Ok(())
    }

    async fn has(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.blocks.read().contains_key(hash))
    }
}

/// Filesystem store backend
///
/// One file per blob under the root directory, named by hex digest. Writes
/// go through a temporary file and an atomic rename so a crashed write never
/// leaves a partial blob under a valid name.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at the given directory
    pub async fn load(root: &Path) -> Result<Self, StoreError> {
        tracing::debug!("FsStore::load called with root: {:?}", root);
        tokio::fs::create_dir_all(root).await?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn blob_path(&self, hash: &Hash) -> PathBuf {
        self.root.join(hash.to_hex())
    }
}

#[async_trait]
impl Store for FsStore {
    async fn get(&self, hash: &Hash) -> Result<Option<Bytes>, StoreError> {
        match tokio::fs::read(self.blob_path(hash)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, hash: Hash, data: Bytes) -> Result<(), StoreError> {
        let path = self.blob_path(&hash);
        if tokio::fs::try_exists(&path).await? {
            // content-addressed: an existing blob is already this blob
            return Ok(());
        }
        let tmp = self.root.join(format!(".tmp-{}", hash.to_hex()));
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn has(&self, hash: &Hash) -> Result<bool, StoreError> {
        Ok(tokio::fs::try_exists(self.blob_path(hash)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_memory_put_and_get() {
        let store = MemoryStore::new();

        let data = Bytes::from_static(b"Hello, store!");
        let hash = Hash::of(&data);

        store.put(hash, data.clone()).await.unwrap();
        assert!(store.has(&hash).await.unwrap());

        let retrieved = store.get(&hash).await.unwrap().unwrap();
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_memory_get_nonexistent() {
        let store = MemoryStore::new();
        let fake_hash = Hash::from_bytes([99u8; 32]);

        assert!(store.get(&fake_hash).await.unwrap().is_none());
        assert!(!store.has(&fake_hash).await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_idempotent_put() {
        let store = MemoryStore::new();

        let data = Bytes::from_static(b"same content twice");
        let hash = Hash::of(&data);

        store.put(hash, data.clone()).await.unwrap();
        store.put(hash, data.clone()).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    async fn setup_fs_store() -> (FsStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::load(&temp_dir.path().join("blocks"))
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_fs_put_and_get() {
        let (store, _temp) = setup_fs_store().await;

        let data = Bytes::from_static(b"Hello, FsStore!");
        let hash = Hash::of(&data);

        store.put(hash, data.clone()).await.unwrap();
        assert!(store.has(&hash).await.unwrap());

        let retrieved = store.get(&hash).await.unwrap().unwrap();
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_fs_get_nonexistent() {
        let (store, _temp) = setup_fs_store().await;

        let fake_hash = Hash::from_bytes([0u8; 32]);
        assert!(store.get(&fake_hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fs_survives_reload() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("blocks");

        let data = Bytes::from_static(b"persistent bytes");
        let hash = Hash::of(&data);

        {
            let store = FsStore::load(&root).await.unwrap();
            store.put(hash, data.clone()).await.unwrap();
        }

        let store = FsStore::load(&root).await.unwrap();
        let retrieved = store.get(&hash).await.unwrap().unwrap();
        assert_eq!(retrieved, data);
    }

    #[tokio::test]
    async fn test_large_data() {
        let (store, _temp) = setup_fs_store().await;

        let data = Bytes::from(vec![42u8; 1024 * 1024]);
        let hash = Hash::of(&data);

        store.put(hash, data.clone()).await.unwrap();
        let retrieved = store.get(&hash).await.unwrap().unwrap();
        assert_eq!(retrieved.len(), data.len());
        assert_eq!(retrieved, data);
    }
}
