//! In-memory storage backend

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

use super::index::DirectoryIndex;
use super::limits::{StoreLimits, StoreUsage};
use super::traits::{EntryKind, StorageBackend, StorageItem};
use crate::error::{Error, Result};
use crate::path::{PathError, PathKey};

/// Ephemeral backend holding the whole tree in process memory.
///
/// Used for tests and throwaway deployments. Each mutation, including the
/// parent listing update, runs inside one write-lock critical section with no
/// await point, so readers never observe a half-applied operation and a
/// cancelled call either happened completely or not at all.
pub struct InMemoryBackend {
    nodes: RwLock<HashMap<PathKey, Node>>,
    limits: StoreLimits,
    payload_bytes: AtomicU64,
    file_count: AtomicU64,
    dir_count: AtomicU64,
}

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Directory(DirectoryIndex),
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Create an empty store with default limits.
    pub fn new() -> Self {
        Self::with_limits(StoreLimits::default())
    }

    /// Create an empty store with custom limits.
    pub fn with_limits(limits: StoreLimits) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(PathKey::root(), Node::Directory(DirectoryIndex::new()));

        Self {
            nodes: RwLock::new(nodes),
            limits,
            payload_bytes: AtomicU64::new(0),
            file_count: AtomicU64::new(0),
            dir_count: AtomicU64::new(1),
        }
    }

    /// Validate a new entry at `path` and register it in the parent listing.
    ///
    /// Must be called with the write lock held and before inserting the node.
    fn register_child(&self, nodes: &mut HashMap<PathKey, Node>, path: &PathKey) -> Result<()> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Err(Error::AlreadyExists(PathKey::root()));
        };

        if nodes.contains_key(path) {
            return Err(Error::AlreadyExists(path.clone()));
        }

        let index = match nodes.get_mut(&parent) {
            Some(Node::Directory(index)) => index,
            Some(Node::File(_)) => return Err(Error::type_mismatch(&parent, EntryKind::Directory)),
            None => return Err(Error::NotFound(parent)),
        };

        self.limits.check_entry_count(self.counters().entry_count())?;
        self.limits.check_children(index.len())?;
        index.insert(name);
        Ok(())
    }

    fn counters(&self) -> StoreUsage {
        StoreUsage {
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
            file_count: self.file_count.load(Ordering::Relaxed),
            dir_count: self.dir_count.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn create_file(&self, path: &PathKey, payload: &[u8]) -> Result<()> {
        self.limits.validate_path(path)?;
        self.limits.check_payload_size(payload.len() as u64)?;

        let mut nodes = self.nodes.write().await;
        self.register_child(&mut nodes, path)?;
        nodes.insert(path.clone(), Node::File(payload.to_vec()));

        self.payload_bytes
            .fetch_add(payload.len() as u64, Ordering::Relaxed);
        self.file_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(backend = "memory", path = %path, size = payload.len(), "created file");
        Ok(())
    }

    async fn get_file(&self, path: &PathKey) -> Result<StorageItem> {
        let nodes = self.nodes.read().await;

        match nodes.get(path) {
            Some(Node::File(payload)) => Ok(StorageItem::File(payload.clone())),
            Some(Node::Directory(index)) => Ok(StorageItem::Directory(index.names().to_vec())),
            None => Err(Error::NotFound(path.clone())),
        }
    }

    async fn update_file(&self, path: &PathKey, payload: &[u8]) -> Result<()> {
        self.limits.check_payload_size(payload.len() as u64)?;

        let mut nodes = self.nodes.write().await;

        match nodes.get_mut(path) {
            Some(Node::File(existing)) => {
                let old_len = existing.len() as u64;
                *existing = payload.to_vec();
                self.payload_bytes.fetch_sub(old_len, Ordering::Relaxed);
                self.payload_bytes
                    .fetch_add(payload.len() as u64, Ordering::Relaxed);
                tracing::debug!(backend = "memory", path = %path, size = payload.len(), "updated file");
                Ok(())
            }
            Some(Node::Directory(_)) => Err(Error::type_mismatch(path, EntryKind::File)),
            None => Err(Error::NotFound(path.clone())),
        }
    }

    async fn delete_file(&self, path: &PathKey) -> Result<()> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Err(PathError::Root.into());
        };

        let mut nodes = self.nodes.write().await;

        match nodes.get(path) {
            Some(Node::Directory(index)) if !index.is_empty() => {
                return Err(Error::DirectoryNotEmpty(path.clone()));
            }
            Some(_) => {}
            None => return Err(Error::NotFound(path.clone())),
        }

        match nodes.get_mut(&parent) {
            Some(Node::Directory(index)) => {
                index.remove(name);
            }
            _ => return Err(Error::corrupt(&parent, "parent of an existing entry is not a directory")),
        }

        match nodes.remove(path) {
            Some(Node::File(payload)) => {
                self.payload_bytes
                    .fetch_sub(payload.len() as u64, Ordering::Relaxed);
                self.file_count.fetch_sub(1, Ordering::Relaxed);
            }
            Some(Node::Directory(_)) => {
                self.dir_count.fetch_sub(1, Ordering::Relaxed);
            }
            None => {}
        }

        tracing::debug!(backend = "memory", path = %path, "deleted entry");
        Ok(())
    }

    async fn create_dir(&self, path: &PathKey) -> Result<()> {
        self.limits.validate_path(path)?;

        let mut nodes = self.nodes.write().await;
        self.register_child(&mut nodes, path)?;
        nodes.insert(path.clone(), Node::Directory(DirectoryIndex::new()));

        self.dir_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(backend = "memory", path = %path, "created directory");
        Ok(())
    }

    async fn exists(&self, path: &PathKey) -> Result<bool> {
        Ok(self.nodes.read().await.contains_key(path))
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    fn usage(&self) -> Option<StoreUsage> {
        Some(self.counters())
    }

    fn limits(&self) -> StoreLimits {
        self.limits.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn key(s: &str) -> PathKey {
        PathKey::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_file() {
        let store = InMemoryBackend::new();
        store.create_dir(&key("home")).await.unwrap();
        store.create_file(&key("home/x"), b"hello").await.unwrap();

        let item = store.get_file(&key("home/x")).await.unwrap();
        assert_eq!(item, StorageItem::File(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_root_always_exists() {
        let store = InMemoryBackend::new();
        assert_eq!(
            store.get_file(&PathKey::root()).await.unwrap(),
            StorageItem::Directory(vec![])
        );
        let err = store.create_dir(&PathKey::root()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let err = store.delete_file(&PathKey::root()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidPath(PathError::Root)));
    }

    #[tokio::test]
    async fn test_missing_parent() {
        let store = InMemoryBackend::new();
        let err = store.create_file(&key("home/x"), b"v").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(p) if p == key("home")));
    }

    #[tokio::test]
    async fn test_file_parent_is_type_mismatch() {
        let store = InMemoryBackend::new();
        store.create_file(&key("doc"), b"v").await.unwrap();
        let err = store.create_dir(&key("doc/child")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[tokio::test]
    async fn test_update_directory_is_type_mismatch() {
        let store = InMemoryBackend::new();
        store.create_dir(&key("home")).await.unwrap();
        let err = store.update_file(&key("home"), b"v").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[tokio::test]
    async fn test_delete_non_empty_directory() {
        let store = InMemoryBackend::new();
        store.create_dir(&key("home")).await.unwrap();
        store.create_file(&key("home/x"), b"v").await.unwrap();

        let err = store.delete_file(&key("home")).await.unwrap_err();
        assert!(matches!(err, Error::DirectoryNotEmpty(_)));

        store.delete_file(&key("home/x")).await.unwrap();
        store.delete_file(&key("home")).await.unwrap();
        assert!(!store.exists(&key("home")).await.unwrap());
    }

    #[tokio::test]
    async fn test_usage_tracking() {
        let store = InMemoryBackend::new();
        store.create_dir(&key("home")).await.unwrap();
        store.create_file(&key("home/a"), b"12345").await.unwrap();
        store.update_file(&key("home/a"), b"12").await.unwrap();
        store.create_file(&key("home/b"), b"abc").await.unwrap();

        let usage = store.usage().unwrap();
        assert_eq!(usage.payload_bytes, 5);
        assert_eq!(usage.file_count, 2);
        assert_eq!(usage.dir_count, 2);

        store.delete_file(&key("home/a")).await.unwrap();
        let usage = store.usage().unwrap();
        assert_eq!(usage.payload_bytes, 3);
        assert_eq!(usage.file_count, 1);
    }

    #[tokio::test]
    async fn test_limits_enforced() {
        let limits = StoreLimits::new().max_payload_size(4).max_children(1);
        let store = InMemoryBackend::with_limits(limits);

        let err = store.create_file(&key("big"), b"12345").await.unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)));

        store.create_file(&key("a"), b"1").await.unwrap();
        let err = store.create_file(&key("b"), b"1").await.unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)));
        assert_eq!(
            store.get_file(&PathKey::root()).await.unwrap(),
            StorageItem::Directory(vec!["a".into()])
        );
    }

    #[tokio::test]
    async fn test_entry_count_limit() {
        // root counts as one entry
        let store = InMemoryBackend::with_limits(StoreLimits::new().max_entry_count(2));
        store.create_dir(&key("home")).await.unwrap();
        let err = store.create_dir(&key("tmp")).await.unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)));
    }

    #[tokio::test]
    async fn test_full_store_reports_missing_parent_first() {
        let store = InMemoryBackend::with_limits(StoreLimits::new().max_entry_count(2));
        store.create_dir(&key("home")).await.unwrap();

        let err = store.create_file(&key("tmp/x"), b"v").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(p) if p == key("tmp")));
        let err = store.create_dir(&key("home/alice")).await.unwrap_err();
        assert!(matches!(err, Error::LimitExceeded(_)));
    }
}
