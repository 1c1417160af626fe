//! Path-addressed storage for Sheetstore
//!
//! Provides an async storage contract and implementations:
//! - `InMemoryBackend`: Ephemeral tree in process memory
//! - `DiskBackend`: Durable tree on the local filesystem
//! - `Storage`: Service wrapper with timeouts, retries, and idempotent helpers
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │              request handlers                    │
//! └───────────────────────┬─────────────────────────┘
//!                         │ uses
//! ┌───────────────────────▼─────────────────────────┐
//! │                   Storage                        │
//! │      (timeout, retry, ensure_dir, put)           │
//! └───────────────────────┬─────────────────────────┘
//!                         │ Arc<dyn StorageBackend>
//!               ┌─────────┴─────────┐
//!        ┌──────▼──────┐     ┌──────▼──────┐
//!        │ InMemory    │     │ Disk        │
//!        │ Backend     │     │ Backend     │
//!        └─────────────┘     └─────────────┘
//! ```

mod disk;
mod index;
mod limits;
mod memory;
mod service;
mod traits;

pub use disk::{DiskBackend, INDEX_FILE};
pub use index::{DirectoryIndex, IndexRepair};
pub use limits::{LimitExceeded, StoreLimits, StoreUsage};
pub use memory::InMemoryBackend;
pub use service::{PutOutcome, RetryPolicy, Storage};
pub use traits::{EntryKind, ReconcileReport, StorageBackend, StorageItem};
