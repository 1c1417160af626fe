//! Configuration
//!
//! Settings come from a TOML file, then environment overrides, then whatever
//! the embedding binary applies on top. Every field has a default, so an empty
//! file is a valid in-memory configuration.
//!
//! ```toml
//! [storage]
//! backend = "disk"
//! root = "/var/lib/sheetstore"
//! timeout_ms = 2000
//! retry_attempts = 3
//!
//! [storage.limits]
//! max_payload_size = 1048576
//!
//! [session]
//! ttl_secs = 3600
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::session::{MIN_ID_LENGTH, SessionConfig, SessionRegistry};
use crate::storage::{
    DiskBackend, InMemoryBackend, RetryPolicy, Storage, StorageBackend, StoreLimits,
};

/// Overrides [`StorageConfig::backend`].
pub const ENV_BACKEND: &str = "SHEETSTORE_BACKEND";
/// Overrides [`StorageConfig::root`].
pub const ENV_ROOT: &str = "SHEETSTORE_ROOT";
/// Overrides [`StorageConfig::timeout_ms`].
pub const ENV_TIMEOUT_MS: &str = "SHEETSTORE_TIMEOUT_MS";
/// Overrides [`SessionConfig::ttl_secs`].
pub const ENV_SESSION_TTL_SECS: &str = "SHEETSTORE_SESSION_TTL_SECS";

/// Which backend implementation to instantiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ephemeral, process-local tree.
    #[default]
    Memory,
    /// Durable tree on the local filesystem.
    Disk,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Memory => f.write_str("memory"),
            BackendKind::Disk => f.write_str("disk"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "disk" => Ok(BackendKind::Disk),
            other => Err(Error::Config(format!(
                "unknown backend '{other}' (expected memory or disk)"
            ))),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: BackendKind,
    /// Store directory. Required for the disk backend.
    pub root: Option<PathBuf>,
    /// Per-call timeout. `None` waits indefinitely.
    pub timeout_ms: Option<u64>,
    /// Total attempts for calls failing with `BackendUnavailable`.
    pub retry_attempts: u32,
    pub limits: StoreLimits,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            root: None,
            timeout_ms: None,
            retry_attempts: 1,
            limits: StoreLimits::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub storage: StorageConfig,
    pub session: SessionConfig,
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Apply environment overrides.
    ///
    /// `lookup` resolves a variable name, normally `|k| std::env::var(k).ok()`.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup(ENV_BACKEND) {
            self.storage.backend = backend.parse()?;
        }
        if let Some(root) = lookup(ENV_ROOT) {
            self.storage.root = Some(PathBuf::from(root));
        }
        if let Some(ms) = lookup(ENV_TIMEOUT_MS) {
            self.storage.timeout_ms = Some(parse_number(ENV_TIMEOUT_MS, &ms)?);
        }
        if let Some(secs) = lookup(ENV_SESSION_TTL_SECS) {
            self.session.ttl_secs = Some(parse_number(ENV_SESSION_TTL_SECS, &secs)?);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.backend == BackendKind::Disk && self.storage.root.is_none() {
            return Err(Error::Config("disk backend requires storage.root".into()));
        }
        if self.storage.retry_attempts == 0 {
            return Err(Error::Config("storage.retry_attempts must be at least 1".into()));
        }
        if self.session.id_length < MIN_ID_LENGTH {
            return Err(Error::Config(format!(
                "session.id_length must be at least {MIN_ID_LENGTH}"
            )));
        }
        Ok(())
    }

    /// Validate, then instantiate the configured backend wrapped in a [`Storage`].
    pub fn open_storage(&self) -> Result<Storage> {
        self.validate()?;
        let limits = self.storage.limits.clone();
        let backend: Arc<dyn StorageBackend> = match (&self.storage.backend, &self.storage.root) {
            (BackendKind::Memory, _) => Arc::new(InMemoryBackend::with_limits(limits)),
            (BackendKind::Disk, Some(root)) => Arc::new(DiskBackend::open(root.clone(), limits)?),
            (BackendKind::Disk, None) => {
                return Err(Error::Config("disk backend requires storage.root".into()));
            }
        };

        let mut storage =
            Storage::new(backend).with_retry(RetryPolicy::attempts(self.storage.retry_attempts));
        if let Some(ms) = self.storage.timeout_ms {
            storage = storage.with_timeout(Duration::from_millis(ms));
        }
        tracing::debug!(backend = %self.storage.backend, "storage opened");
        Ok(storage)
    }

    pub fn session_registry(&self) -> SessionRegistry {
        SessionRegistry::with_config(&self.session)
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be a non-negative integer, got '{value}'")))
}
