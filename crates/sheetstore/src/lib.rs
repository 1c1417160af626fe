//! Sheetstore - path-addressed document storage with a collaborative session registry
//!
//! Documents live in a virtual tree addressed by [`PathKey`]. Directories hold
//! an ordered listing of child names; files hold opaque payloads. The tree is
//! served by a pluggable [`StorageBackend`] (in memory or on disk) behind the
//! [`Storage`] service, which callers construct once and share.
//!
//! On top of the tree sit per-user spreadsheets ([`SheetStore`]) and
//! per-application files ([`AppStore`]).
//!
//! # Example
//!
//! ```rust
//! use sheetstore::{InMemoryBackend, PathKey, SessionRegistry, Storage, StorageItem};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> sheetstore::Result<()> {
//!     let storage = Storage::new(Arc::new(InMemoryBackend::new()));
//!     storage.ensure_dir_all(&PathKey::parse("home/alice")?).await?;
//!     storage.create_file(&PathKey::parse("home/alice/x")?, b"v").await?;
//!
//!     let listing = storage.get_file(&PathKey::parse("home/alice")?).await?;
//!     assert_eq!(listing, StorageItem::Directory(vec!["x".to_string()]));
//!
//!     let sessions = SessionRegistry::new();
//!     let id = sessions.create();
//!     sessions.set(id.as_str(), "user", "alice")?;
//!     assert_eq!(sessions.get_string(id.as_str(), "user").as_deref(), Some("alice"));
//!     Ok(())
//! }
//! ```

mod config;
mod documents;
mod error;
pub mod logging;
mod path;
mod session;
mod sheets;
mod storage;

pub use config::{
    BackendKind, Config, ENV_BACKEND, ENV_ROOT, ENV_SESSION_TTL_SECS, ENV_TIMEOUT_MS,
    StorageConfig,
};
pub use documents::{
    AppStore, FileRecord, HOME, SECURESTORE, SOCIALCALC_APP, SOCIALCALC_SUFFIX, SOCIALCALC_TYPE,
    authorize_session, is_backup_name,
};
pub use error::{Error, ErrorKind, Result};
pub use path::{PathError, PathKey};
pub use session::{
    DEFAULT_ID_LENGTH, MIN_ID_LENGTH, Session, SessionConfig, SessionId, SessionRegistry, USER_KEY,
};
pub use sheets::{DEFAULT_SHEET, SheetRecord, SheetStore, sheet_text};
pub use storage::{
    DirectoryIndex, DiskBackend, EntryKind, INDEX_FILE, IndexRepair, InMemoryBackend,
    LimitExceeded, PutOutcome, ReconcileReport, RetryPolicy, Storage, StorageBackend, StorageItem,
    StoreLimits, StoreUsage,
};

// Re-export async_trait for custom backend implementations
pub use async_trait::async_trait;
