//! Storage service handed to request handlers.
//!
//! [`Storage`] wraps any [`StorageBackend`] the way a request-scoped unit of
//! work needs it: bounded latency, retry of transient failures, and the
//! idempotent helpers the application layer builds on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::limits::{StoreLimits, StoreUsage};
use super::traits::{EntryKind, ReconcileReport, StorageBackend, StorageItem};
use crate::error::{Error, Result};
use crate::path::PathKey;

/// Retry schedule for [`Error::BackendUnavailable`].
///
/// Other errors are never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. 1 disables retries.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled after each attempt.
    pub initial_backoff: Duration,
    /// Upper bound for a single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// No retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// Retry up to `max_attempts` total attempts with default backoff.
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Outcome of a call, remembering whether an earlier attempt was cut short.
///
/// Retries only follow `BackendUnavailable`, so `interrupted` means an
/// earlier attempt may have completed out of sight.
struct Attempt<T> {
    result: Result<T>,
    interrupted: bool,
}

fn landed_earlier(op: &'static str, path: &PathKey) {
    tracing::debug!(op, path = %path, "retry found the interrupted attempt applied");
}

/// Whether [`Storage::put`] created or replaced the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Updated,
}

/// Explicitly constructed storage service.
///
/// Cheap to clone; all clones share one backend.
///
/// # Example
///
/// ```rust
/// use sheetstore::{InMemoryBackend, PathKey, Storage};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> sheetstore::Result<()> {
/// let storage = Storage::new(Arc::new(InMemoryBackend::new()))
///     .with_timeout(Duration::from_secs(5));
///
/// let path = PathKey::parse("home/alice/notes")?;
/// storage.ensure_dir_all(&path.parent().unwrap()).await?;
/// storage.put(&path, b"hello").await?;
/// assert_eq!(storage.read_file(&path).await?, b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl Storage {
    /// Wrap a backend with no timeout and no retries.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            timeout: None,
            retry: RetryPolicy::none(),
        }
    }

    /// Bound every backend call. An elapsed call fails with `BackendUnavailable`.
    ///
    /// The caller stops waiting, but a backend that already started the
    /// operation (the disk backend always does) may still finish it. When a
    /// retry of `create_file`, `create_dir`, or `delete_file` then meets
    /// `AlreadyExists` or `NotFound`, the service checks whether the earlier
    /// attempt landed: a file holding the same payload, a directory, or an
    /// absent path counts as success. Callers retrying a timed-out create or
    /// delete by hand need the same check.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retry `BackendUnavailable` failures per `policy`.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Label of the wrapped backend (`"memory"`, `"disk"`).
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Usage counters, `None` when the backend does not track them.
    pub fn usage(&self) -> Option<StoreUsage> {
        self.backend.usage()
    }

    pub fn limits(&self) -> StoreLimits {
        self.backend.limits()
    }

    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.attempt(op, f).await.result
    }

    /// Run `f` under the timeout and retry policy.
    async fn attempt<T, F, Fut>(&self, op: &'static str, mut f: F) -> Attempt<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, f()).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::BackendUnavailable(format!(
                        "{op} timed out after {}ms",
                        limit.as_millis()
                    ))),
                },
                None => f().await,
            };

            match result {
                Err(e) if e.is_retriable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(op, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying storage call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => {
                    return Attempt {
                        result,
                        interrupted: attempt > 1,
                    };
                }
            }
        }
    }

    pub async fn create_file(&self, path: &PathKey, payload: &[u8]) -> Result<()> {
        let attempt = self
            .attempt("create_file", || self.backend.create_file(path, payload))
            .await;
        match attempt.result {
            Err(Error::AlreadyExists(p)) if attempt.interrupted => {
                match self.get_file(path).await {
                    Ok(StorageItem::File(stored)) if stored == payload => {
                        landed_earlier("create_file", path);
                        Ok(())
                    }
                    _ => Err(Error::AlreadyExists(p)),
                }
            }
            result => result,
        }
    }

    pub async fn get_file(&self, path: &PathKey) -> Result<StorageItem> {
        self.call("get_file", || self.backend.get_file(path)).await
    }

    pub async fn update_file(&self, path: &PathKey, payload: &[u8]) -> Result<()> {
        self.call("update_file", || self.backend.update_file(path, payload))
            .await
    }

    pub async fn delete_file(&self, path: &PathKey) -> Result<()> {
        let attempt = self
            .attempt("delete_file", || self.backend.delete_file(path))
            .await;
        match attempt.result {
            Err(Error::NotFound(p)) if attempt.interrupted && p == *path => {
                landed_earlier("delete_file", path);
                Ok(())
            }
            result => result,
        }
    }

    pub async fn create_dir(&self, path: &PathKey) -> Result<()> {
        let attempt = self
            .attempt("create_dir", || self.backend.create_dir(path))
            .await;
        match attempt.result {
            Err(Error::AlreadyExists(p)) if attempt.interrupted => {
                match self.get_file(path).await {
                    Ok(StorageItem::Directory(_)) => {
                        landed_earlier("create_dir", path);
                        Ok(())
                    }
                    _ => Err(Error::AlreadyExists(p)),
                }
            }
            result => result,
        }
    }

    pub async fn exists(&self, path: &PathKey) -> Result<bool> {
        self.call("exists", || self.backend.exists(path)).await
    }

    /// Run the backend's full-scan listing repair.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        // A full scan is not bounded by the per-call timeout.
        let report = self.backend.reconcile().await?;
        tracing::info!(backend = self.backend.name(), ?report, "reconcile finished");
        Ok(report)
    }

    /// Read a file payload, failing `TypeMismatch` for a directory.
    pub async fn read_file(&self, path: &PathKey) -> Result<Vec<u8>> {
        match self.get_file(path).await? {
            StorageItem::File(payload) => Ok(payload),
            StorageItem::Directory(_) => Err(Error::type_mismatch(path, EntryKind::File)),
        }
    }

    /// Read a directory listing, failing `TypeMismatch` for a file.
    pub async fn list_dir(&self, path: &PathKey) -> Result<Vec<String>> {
        match self.get_file(path).await? {
            StorageItem::Directory(names) => Ok(names),
            StorageItem::File(_) => Err(Error::type_mismatch(path, EntryKind::Directory)),
        }
    }

    /// Make sure a directory exists at `path`.
    ///
    /// Losing a creation race to another caller counts as success; finding a
    /// file there is a `TypeMismatch`.
    pub async fn ensure_dir(&self, path: &PathKey) -> Result<()> {
        match self.create_dir(path).await {
            Ok(()) => Ok(()),
            Err(Error::AlreadyExists(_)) => match self.get_file(path).await? {
                StorageItem::Directory(_) => Ok(()),
                StorageItem::File(_) => Err(Error::type_mismatch(path, EntryKind::Directory)),
            },
            Err(e) => Err(e),
        }
    }

    /// Ensure `path` and every ancestor are directories.
    ///
    /// Not atomic as a whole; each level is ensured independently.
    pub async fn ensure_dir_all(&self, path: &PathKey) -> Result<()> {
        for ancestor in path.ancestors().skip(1) {
            self.ensure_dir(&ancestor).await?;
        }
        if !path.is_root() {
            self.ensure_dir(path).await?;
        }
        Ok(())
    }

    /// Create the file, or replace its payload if it already exists.
    pub async fn put(&self, path: &PathKey, payload: &[u8]) -> Result<PutOutcome> {
        match self.update_file(path, payload).await {
            Ok(()) => return Ok(PutOutcome::Updated),
            Err(Error::NotFound(p)) if p == *path => {}
            Err(e) => return Err(e),
        }

        match self.create_file(path, payload).await {
            Ok(()) => Ok(PutOutcome::Created),
            // Another writer created it between our update and create.
            Err(Error::AlreadyExists(_)) => {
                self.update_file(path, payload).await?;
                Ok(PutOutcome::Updated)
            }
            Err(e) => Err(e),
        }
    }
}
