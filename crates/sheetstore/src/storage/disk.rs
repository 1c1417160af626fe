//! Persistent storage backend on the local filesystem.
//!
//! # Layout
//!
//! ```text
//! <root>/.index                      ["home"]
//! <root>/home/.index                 ["alice"]
//! <root>/home/alice/.index           ["budget", "%2Eprofile"]
//! <root>/home/alice/budget           <payload bytes>
//! ```
//!
//! Directories are real directories holding a `.index` file (the serialized
//! [`DirectoryIndex`]); files are regular files holding the raw payload.
//! Segment names are escaped (`%` -> `%25`, leading `.` -> `%2E`) so no entity
//! can collide with `.index` or with `.tmp-*` staging files.
//!
//! # Consistency
//!
//! Every write lands in a staging file that is fsynced and renamed into
//! place, so a payload or index is never observed half-written. Entity and
//! listing are two renames, not one transaction, so the ordering is fixed:
//!
//! | Operation | First | Then |
//! |-----------|-------|------|
//! | create | entity | parent listing |
//! | delete | parent listing | entity |
//!
//! A crash between the steps can only leave an *orphan* (an entity that is
//! not listed), never a listing entry without an entity. The listing is a
//! cache of the directory's contents that [`DiskBackend::reconcile`] rebuilds
//! from a full scan. A listing that references a missing entity is reported
//! as [`Error::Corrupt`] and left alone until that pass runs.

use async_trait::async_trait;
use rand::Rng;
use rand::distr::Alphanumeric;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::index::DirectoryIndex;
use super::limits::{LimitExceeded, StoreLimits};
use super::traits::{EntryKind, ReconcileReport, StorageBackend, StorageItem};
use crate::error::{Error, Result};
use crate::path::{PathError, PathKey};

/// Name of the listing file inside every directory.
pub const INDEX_FILE: &str = ".index";

/// Prefix of staging files and directories.
const TEMP_PREFIX: &str = ".tmp-";

/// Number of lock stripes guarding path keys.
const LOCK_STRIPES: usize = 64;

/// Longest file name, in bytes, the common local filesystems accept.
const MAX_NAME_BYTES: usize = 255;

/// Durable backend storing the tree under a root directory.
///
/// Filesystem work runs on tokio's blocking pool. Once an operation has
/// started it runs to completion even if the caller stops waiting, so a
/// timed-out call is applied entirely or not at all.
///
/// # Example
///
/// ```rust,no_run
/// use sheetstore::{DiskBackend, StoreLimits};
///
/// let backend = DiskBackend::open("/var/lib/sheetstore", StoreLimits::default()).unwrap();
/// ```
#[derive(Clone)]
pub struct DiskBackend {
    inner: Arc<DiskInner>,
}

struct DiskInner {
    root: PathBuf,
    limits: StoreLimits,
    locks: LockTable,
}

impl DiskBackend {
    /// Open (or initialize) a store rooted at `root`.
    ///
    /// The directory is created if missing, and an empty root listing is
    /// written if none exists yet.
    pub fn open(root: impl Into<PathBuf>, limits: StoreLimits) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::unavailable("create store root", e))?;
        let root = root
            .canonicalize()
            .map_err(|e| Error::unavailable("resolve store root", e))?;

        let inner = DiskInner {
            root,
            limits,
            locks: LockTable::new(LOCK_STRIPES),
        };

        if inner.try_read_index(&inner.root)?.is_none() {
            inner.write_index(&PathKey::root(), &inner.root, &DirectoryIndex::new())?;
        }

        tracing::debug!(root = %inner.root.display(), "opened disk store");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Directory holding the store.
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&DiskInner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| Error::unavailable(op, e))?
    }
}

#[async_trait]
impl StorageBackend for DiskBackend {
    async fn create_file(&self, path: &PathKey, payload: &[u8]) -> Result<()> {
        let path = path.clone();
        let payload = payload.to_vec();
        self.run("create_file", move |inner| inner.create_file(&path, &payload))
            .await
    }

    async fn get_file(&self, path: &PathKey) -> Result<StorageItem> {
        let path = path.clone();
        self.run("get_file", move |inner| inner.get_file(&path)).await
    }

    async fn update_file(&self, path: &PathKey, payload: &[u8]) -> Result<()> {
        let path = path.clone();
        let payload = payload.to_vec();
        self.run("update_file", move |inner| inner.update_file(&path, &payload))
            .await
    }

    async fn delete_file(&self, path: &PathKey) -> Result<()> {
        let path = path.clone();
        self.run("delete_file", move |inner| inner.delete_file(&path))
            .await
    }

    async fn create_dir(&self, path: &PathKey) -> Result<()> {
        let path = path.clone();
        self.run("create_dir", move |inner| inner.create_dir(&path)).await
    }

    async fn reconcile(&self) -> Result<ReconcileReport> {
        self.run("reconcile", |inner| inner.reconcile()).await
    }

    fn name(&self) -> &'static str {
        "disk"
    }

    fn limits(&self) -> StoreLimits {
        self.inner.limits.clone()
    }
}

/// What a disk path currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnDisk {
    File,
    Directory,
    Missing,
}

impl DiskInner {
    fn disk_path(&self, key: &PathKey) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.segments() {
            path.push(encode_segment(segment));
        }
        path
    }

    /// What `path` holds. A path running through a file, or through a name
    /// too long to store, cannot hold anything and reads as missing.
    fn probe(&self, key: &PathKey, path: &Path) -> Result<OnDisk> {
        if !names_fit(path) {
            return Ok(OnDisk::Missing);
        }
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => Ok(OnDisk::Directory),
            Ok(meta) if meta.is_file() => Ok(OnDisk::File),
            Ok(_) => Err(Error::corrupt(key, "unsupported entry type on disk")),
            Err(e) if is_absent(&e) => Ok(OnDisk::Missing),
            Err(e) => Err(io_error("stat", key, e)),
        }
    }

    /// Escaped file name for the last segment of a new entry.
    fn new_entry_name(&self, name: &str) -> Result<String> {
        let file_name = encode_segment(name);
        if file_name.len() > MAX_NAME_BYTES {
            return Err(LimitExceeded::SegmentTooLong {
                length: file_name.len(),
                limit: MAX_NAME_BYTES,
            }
            .into());
        }
        Ok(file_name)
    }

    /// True when `dir` holds an entity its listing does not name.
    fn has_unlisted_entries(
        &self,
        key: &PathKey,
        dir: &Path,
        index: &DirectoryIndex,
    ) -> Result<bool> {
        let entries = fs::read_dir(dir).map_err(|e| io_error("scan", key, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_error("scan", key, e))?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                return Ok(true);
            };
            if is_bookkeeping(file_name) {
                continue;
            }
            match decode_segment(file_name) {
                Some(name) if index.contains(&name) => {}
                _ => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Read a listing; `None` when the index file is missing or unreadable.
    fn try_read_index(&self, dir: &Path) -> Result<Option<DirectoryIndex>> {
        match fs::read(dir.join(INDEX_FILE)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::unavailable("read directory index", e)),
        }
    }

    fn read_index(&self, key: &PathKey, dir: &Path) -> Result<DirectoryIndex> {
        self.try_read_index(dir)?
            .ok_or_else(|| Error::corrupt(key, "directory index missing or unreadable"))
    }

    fn write_index(&self, key: &PathKey, dir: &Path, index: &DirectoryIndex) -> Result<()> {
        let bytes = serde_json::to_vec(index)?;
        write_atomic(dir, INDEX_FILE, &bytes).map_err(|e| io_error("write index", key, e))
    }

    /// Listing of the directory at `key`, checking that it is a directory.
    fn load_dir_index(&self, key: &PathKey, dir: &Path) -> Result<DirectoryIndex> {
        match self.probe(key, dir)? {
            OnDisk::Directory => self.read_index(key, dir),
            OnDisk::File => Err(Error::type_mismatch(key, EntryKind::Directory)),
            OnDisk::Missing => Err(Error::NotFound(key.clone())),
        }
    }

    /// Shared preconditions of create_file/create_dir. Returns the parent
    /// listing and the parent's disk directory.
    fn prepare_create(
        &self,
        path: &PathKey,
        parent: &PathKey,
        name: &str,
    ) -> Result<(DirectoryIndex, PathBuf)> {
        let parent_dir = self.disk_path(parent);
        let index = self.load_dir_index(parent, &parent_dir)?;

        if self.probe(path, &parent_dir.join(encode_segment(name)))? != OnDisk::Missing {
            return Err(Error::AlreadyExists(path.clone()));
        }
        if index.contains(name) {
            return Err(Error::corrupt(parent, format!("listing names missing entry {name:?}")));
        }
        self.limits.check_children(index.len())?;

        Ok((index, parent_dir))
    }

    fn create_file(&self, path: &PathKey, payload: &[u8]) -> Result<()> {
        self.limits.validate_path(path)?;
        self.limits.check_payload_size(payload.len() as u64)?;
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Err(Error::AlreadyExists(PathKey::root()));
        };

        let file_name = self.new_entry_name(name)?;

        let _guards = self.locks.lock_pair(&parent, path);
        let (mut index, parent_dir) = self.prepare_create(path, &parent, name)?;

        write_atomic(&parent_dir, &file_name, payload)
            .map_err(|e| io_error("write file", path, e))?;

        index.insert(name);
        if let Err(e) = self.write_index(&parent, &parent_dir, &index) {
            rollback(path, fs::remove_file(parent_dir.join(&file_name)));
            return Err(e);
        }

        tracing::debug!(backend = "disk", path = %path, size = payload.len(), "created file");
        Ok(())
    }

    fn create_dir(&self, path: &PathKey) -> Result<()> {
        self.limits.validate_path(path)?;
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Err(Error::AlreadyExists(PathKey::root()));
        };

        let file_name = self.new_entry_name(name)?;

        let _guards = self.locks.lock_pair(&parent, path);
        let (mut index, parent_dir) = self.prepare_create(path, &parent, name)?;

        // Stage the directory with its empty listing, then rename it into place.
        let staging = parent_dir.join(temp_name());
        let target = parent_dir.join(file_name);
        let staged = fs::create_dir(&staging)
            .and_then(|()| write_atomic(&staging, INDEX_FILE, b"[]"))
            .and_then(|()| fs::rename(&staging, &target));
        if let Err(e) = staged {
            rollback(path, fs::remove_dir_all(&staging));
            return Err(io_error("create directory", path, e));
        }

        index.insert(name);
        if let Err(e) = self.write_index(&parent, &parent_dir, &index) {
            rollback(path, fs::remove_dir_all(&target));
            return Err(e);
        }

        tracing::debug!(backend = "disk", path = %path, "created directory");
        Ok(())
    }

    fn get_file(&self, path: &PathKey) -> Result<StorageItem> {
        let _guard = self.locks.lock(path);
        let disk_path = self.disk_path(path);

        match self.probe(path, &disk_path)? {
            OnDisk::File => fs::read(&disk_path)
                .map(StorageItem::File)
                .map_err(|e| io_error("read file", path, e)),
            OnDisk::Directory => {
                let index = self.read_index(path, &disk_path)?;
                for name in index.names() {
                    let child = disk_path.join(encode_segment(name));
                    if self.probe(path, &child)? == OnDisk::Missing {
                        return Err(Error::corrupt(
                            path,
                            format!("listing references missing entry {name:?}"),
                        ));
                    }
                }
                Ok(StorageItem::Directory(index.into_names()))
            }
            OnDisk::Missing => Err(Error::NotFound(path.clone())),
        }
    }

    fn update_file(&self, path: &PathKey, payload: &[u8]) -> Result<()> {
        self.limits.check_payload_size(payload.len() as u64)?;
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Err(Error::type_mismatch(path, EntryKind::File));
        };

        let _guard = self.locks.lock(path);
        let parent_dir = self.disk_path(&parent);
        let file_name = encode_segment(name);

        match self.probe(path, &parent_dir.join(&file_name))? {
            OnDisk::File => {
                write_atomic(&parent_dir, &file_name, payload)
                    .map_err(|e| io_error("write file", path, e))?;
                tracing::debug!(backend = "disk", path = %path, size = payload.len(), "updated file");
                Ok(())
            }
            OnDisk::Directory => Err(Error::type_mismatch(path, EntryKind::File)),
            OnDisk::Missing => Err(Error::NotFound(path.clone())),
        }
    }

    fn delete_file(&self, path: &PathKey) -> Result<()> {
        let (Some(parent), Some(name)) = (path.parent(), path.name()) else {
            return Err(PathError::Root.into());
        };

        let _guards = self.locks.lock_pair(&parent, path);
        let parent_dir = self.disk_path(&parent);
        let target = parent_dir.join(encode_segment(name));

        let kind = self.probe(path, &target)?;
        match kind {
            OnDisk::Missing => return Err(Error::NotFound(path.clone())),
            OnDisk::Directory => {
                // Unlisted entries are orphans waiting for reconcile, not garbage.
                let listing = self.read_index(path, &target)?;
                if !listing.is_empty() || self.has_unlisted_entries(path, &target, &listing)? {
                    return Err(Error::DirectoryNotEmpty(path.clone()));
                }
            }
            OnDisk::File => {}
        }

        // Unlist first: an interrupted delete leaves an orphan, not a dangling name.
        let mut index = self.load_dir_index(&parent, &parent_dir)?;
        if index.remove(name) {
            self.write_index(&parent, &parent_dir, &index)?;
        }

        let removed = match kind {
            OnDisk::Directory => remove_empty_dir(&target),
            _ => fs::remove_file(&target),
        };
        removed.map_err(|e| io_error("remove entry", path, e))?;

        tracing::debug!(backend = "disk", path = %path, "deleted entry");
        Ok(())
    }

    fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut pending = vec![PathKey::root()];

        while let Some(key) = pending.pop() {
            let _guard = self.locks.lock(&key);
            let dir = self.disk_path(&key);
            report.directories_scanned += 1;

            let mut present = Vec::new();
            let entries = fs::read_dir(&dir).map_err(|e| io_error("scan", &key, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| io_error("scan", &key, e))?;
                let file_name = entry.file_name();
                let Some(file_name) = file_name.to_str() else {
                    tracing::warn!(dir = %key, "skipping non-UTF-8 entry");
                    continue;
                };
                if file_name == INDEX_FILE {
                    continue;
                }

                let file_type = entry.file_type().map_err(|e| io_error("scan", &key, e))?;
                if file_name.starts_with(TEMP_PREFIX) {
                    let removed = if file_type.is_dir() {
                        fs::remove_dir_all(entry.path())
                    } else {
                        fs::remove_file(entry.path())
                    };
                    removed.map_err(|e| io_error("remove staging file", &key, e))?;
                    report.temp_files_removed += 1;
                    continue;
                }

                let Some(child) = decode_segment(file_name).and_then(|s| key.join(s).ok()) else {
                    tracing::warn!(dir = %key, entry = file_name, "skipping foreign entry");
                    continue;
                };
                if file_type.is_dir() {
                    pending.push(child.clone());
                } else if !file_type.is_file() {
                    tracing::warn!(dir = %key, entry = file_name, "skipping unsupported entry type");
                    continue;
                }
                if let Some(name) = child.name() {
                    present.push(name.to_string());
                }
            }

            let (mut index, rebuilt) = match self.try_read_index(&dir)? {
                Some(index) => (index, false),
                None => (DirectoryIndex::new(), true),
            };
            let repair = index.reconcile(&present);
            if rebuilt || !repair.is_clean() {
                self.write_index(&key, &dir, &index)?;
                tracing::warn!(
                    dir = %key,
                    adopted = repair.adopted.len(),
                    dropped = repair.dropped.len(),
                    rebuilt,
                    "repaired directory index"
                );
            }

            report.entries_adopted += repair.adopted.len() as u64;
            report.entries_dropped += repair.dropped.len() as u64;
            report.indexes_rebuilt += u64::from(rebuilt);
        }

        Ok(report)
    }
}

/// Fixed table of mutexes; a path key maps to one stripe by hash.
///
/// Multi-key operations acquire stripes in ascending order.
struct LockTable {
    stripes: Vec<Mutex<()>>,
}

impl LockTable {
    fn new(count: usize) -> Self {
        Self {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, key: &PathKey) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    fn lock_stripe(&self, stripe: usize) -> MutexGuard<'_, ()> {
        // The guarded value is (), so a poisoned stripe carries no broken state.
        self.stripes[stripe]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self, key: &PathKey) -> MutexGuard<'_, ()> {
        self.lock_stripe(self.stripe(key))
    }

    fn lock_pair(&self, a: &PathKey, b: &PathKey) -> Vec<MutexGuard<'_, ()>> {
        let (i, j) = (self.stripe(a), self.stripe(b));
        if i == j {
            return vec![self.lock_stripe(i)];
        }
        let (first, second) = (i.min(j), i.max(j));
        vec![self.lock_stripe(first), self.lock_stripe(second)]
    }
}

/// The listing file and staging leftovers; never user entities.
fn is_bookkeeping(file_name: &str) -> bool {
    file_name == INDEX_FILE || file_name.starts_with(TEMP_PREFIX)
}

/// Remove a directory whose only contents are bookkeeping files.
///
/// The final `remove_dir` fails if anything else appeared meanwhile.
fn remove_empty_dir(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let bookkeeping = entry.file_name().to_str().is_some_and(is_bookkeeping);
        if !bookkeeping {
            continue;
        }
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    fs::remove_dir(dir)
}

/// False when a component of `path` is longer than a file name can be.
fn names_fit(path: &Path) -> bool {
    path.components().all(|c| c.as_os_str().len() <= MAX_NAME_BYTES)
}

/// Errors meaning nothing is stored at the path.
fn is_absent(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory)
}

/// Escape a segment for use as a file name.
fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for (i, ch) in segment.chars().enumerate() {
        match ch {
            '%' => out.push_str("%25"),
            '.' if i == 0 => out.push_str("%2E"),
            c => out.push(c),
        }
    }
    out
}

/// Invert [`encode_segment`]; `None` for names this backend never writes.
fn decode_segment(name: &str) -> Option<String> {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let escape = rest.get(pos..pos + 3)?;
        match escape {
            "%25" => out.push('%'),
            "%2E" => out.push('.'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);

    (encode_segment(&out) == name).then_some(out)
}

fn temp_name() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("{TEMP_PREFIX}{suffix}")
}

/// Write `bytes` to `dir/file_name` via a synced staging file and a rename.
fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> io::Result<()> {
    let staging = dir.join(temp_name());
    let written = fs::File::create(&staging).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    let renamed = written.and_then(|()| fs::rename(&staging, dir.join(file_name)));
    if let Err(e) = renamed {
        let _ = fs::remove_file(&staging);
        return Err(e);
    }
    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Undo a half-finished create. A failed undo leaves an orphan for reconcile.
fn rollback(path: &PathKey, result: io::Result<()>) {
    if let Err(e) = result {
        tracing::warn!(path = %path, error = %e, "rollback failed, entry left for reconcile");
    }
}

/// Map an I/O failure to the error taxonomy.
///
/// Only failures of the medium itself are retriable; a path the filesystem
/// refuses outright fails the same way on every attempt.
fn io_error(context: &str, key: &PathKey, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::InvalidFilename => LimitExceeded::PathTooLong {
            length: key.to_string().len(),
        }
        .into(),
        _ => Error::BackendUnavailable(format!("{context} {key}: {e}")),
    }
}
