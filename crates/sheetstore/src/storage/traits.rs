//! Storage contract definitions

use async_trait::async_trait;
use std::fmt;

use super::limits::{StoreLimits, StoreUsage};
use crate::error::{Error, Result};
use crate::path::PathKey;

/// Async storage backend trait.
///
/// All backends implement this contract over [`PathKey`]s:
///
/// | Operation | Fails with |
/// |-----------|------------|
/// | `create_file` | `AlreadyExists` if anything is at the path, `NotFound` if the parent directory is missing |
/// | `get_file` | `NotFound` if nothing is at the path |
/// | `update_file` | `NotFound` if absent, `TypeMismatch` for a directory |
/// | `delete_file` | `NotFound` if absent, `DirectoryNotEmpty` for a directory with children |
/// | `create_dir` | `AlreadyExists` / `NotFound` as for `create_file` |
///
/// Creating or deleting an entity updates its parent's directory index in the
/// same atomic step. Delete does not cascade.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; concurrent operations on the same
/// path are mutually exclusive.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store a new file and register it in its parent's listing.
    async fn create_file(&self, path: &PathKey, payload: &[u8]) -> Result<()>;

    /// Read a file payload or a directory listing.
    async fn get_file(&self, path: &PathKey) -> Result<StorageItem>;

    /// Replace an existing file's payload. The listing is untouched.
    async fn update_file(&self, path: &PathKey, payload: &[u8]) -> Result<()>;

    /// Remove a file or an empty directory and unregister it from its parent.
    async fn delete_file(&self, path: &PathKey) -> Result<()>;

    /// Create an empty directory and register it in its parent's listing.
    async fn create_dir(&self, path: &PathKey) -> Result<()>;

    /// Check if anything exists at the path.
    async fn exists(&self, path: &PathKey) -> Result<bool> {
        match self.get_file(path).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Rebuild directory listings from a full scan of the medium.
    ///
    /// Backends that keep entities and listings in one atomic structure have
    /// nothing to repair and return an empty report.
    async fn reconcile(&self) -> Result<ReconcileReport> {
        Ok(ReconcileReport::default())
    }

    /// Short backend label (`"memory"`, `"disk"`).
    fn name(&self) -> &'static str;

    /// Current usage statistics, `None` when the backend does not track them.
    fn usage(&self) -> Option<StoreUsage> {
        None
    }

    /// Limits enforced by this backend.
    fn limits(&self) -> StoreLimits {
        StoreLimits::unlimited()
    }
}

/// What `get_file` found at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageItem {
    /// Opaque payload of a file.
    File(Vec<u8>),
    /// Child names of a directory, in insertion order.
    Directory(Vec<String>),
}

impl StorageItem {
    pub fn kind(&self) -> EntryKind {
        match self {
            StorageItem::File(_) => EntryKind::File,
            StorageItem::Directory(_) => EntryKind::Directory,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, StorageItem::File(_))
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, StorageItem::Directory(_))
    }

    /// Payload of a file, `None` for a directory.
    pub fn into_payload(self) -> Option<Vec<u8>> {
        match self {
            StorageItem::File(payload) => Some(payload),
            StorageItem::Directory(_) => None,
        }
    }

    /// Listing of a directory, `None` for a file.
    pub fn into_listing(self) -> Option<Vec<String>> {
        match self {
            StorageItem::Directory(names) => Some(names),
            StorageItem::File(_) => None,
        }
    }
}

/// Entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => f.write_str("file"),
            EntryKind::Directory => f.write_str("directory"),
        }
    }
}

/// Result of an administrative reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Directories whose listings were checked.
    pub directories_scanned: u64,
    /// Unlisted entities added to their parent's listing.
    pub entries_adopted: u64,
    /// Listed names removed because nothing backed them.
    pub entries_dropped: u64,
    /// Missing or unreadable index files rewritten.
    pub indexes_rebuilt: u64,
    /// Leftover temporary files from interrupted writes.
    pub temp_files_removed: u64,
}

impl ReconcileReport {
    /// True when the pass changed nothing.
    pub fn is_clean(&self) -> bool {
        self.entries_adopted == 0
            && self.entries_dropped == 0
            && self.indexes_rebuilt == 0
            && self.temp_files_removed == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Minimal backend that uses the defaults for exists/reconcile/usage/limits.
    struct StubBackend;

    #[async_trait]
    impl StorageBackend for StubBackend {
        async fn create_file(&self, _path: &PathKey, _payload: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn get_file(&self, path: &PathKey) -> Result<StorageItem> {
            if path.is_root() {
                Ok(StorageItem::Directory(vec![]))
            } else {
                Err(Error::NotFound(path.clone()))
            }
        }
        async fn update_file(&self, _path: &PathKey, _payload: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn delete_file(&self, _path: &PathKey) -> Result<()> {
            Ok(())
        }
        async fn create_dir(&self, _path: &PathKey) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &'static str {
            "stub"
        }
    }

    #[tokio::test]
    async fn default_exists_maps_not_found_to_false() {
        let backend = StubBackend;
        assert!(backend.exists(&PathKey::root()).await.unwrap());
        assert!(
            !backend
                .exists(&PathKey::parse("missing").unwrap())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn default_reconcile_is_clean() {
        let report = StubBackend.reconcile().await.unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn default_usage_and_limits() {
        assert_eq!(StubBackend.usage(), None);
        assert_eq!(StubBackend.limits(), StoreLimits::unlimited());
    }

    #[test]
    fn item_accessors() {
        let file = StorageItem::File(b"v".to_vec());
        assert!(file.is_file());
        assert_eq!(file.kind(), EntryKind::File);
        assert_eq!(file.clone().into_listing(), None);
        assert_eq!(file.into_payload(), Some(b"v".to_vec()));

        let dir = StorageItem::Directory(vec!["x".into()]);
        assert!(dir.is_dir());
        assert_eq!(dir.into_listing(), Some(vec!["x".to_string()]));
    }
}
