//! Storage resource limits.
//!
//! These limits keep a single tenant from exhausting memory or disk through
//! the storage contract.
//!
//! | Limit | Default | Purpose |
//! |-------|---------|---------|
//! | `max_payload_size` | 10MB | Single file payload |
//! | `max_entry_count` | 100,000 | Files plus directories (in-memory backend) |
//! | `max_path_depth` | 32 | Segments in a path key |
//! | `max_segment_length` | 255 | Bytes in one segment |
//! | `max_children` | 10,000 | Entries in one directory index |

use serde::Deserialize;
use std::fmt;

use crate::path::PathKey;

/// Default maximum payload size: 10MB
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 10_000_000;

/// Default maximum number of entries (files and directories): 100,000
pub const DEFAULT_MAX_ENTRY_COUNT: u64 = 100_000;

/// Default maximum path depth: 32
pub const DEFAULT_MAX_PATH_DEPTH: usize = 32;

/// Default maximum segment length: 255 bytes
pub const DEFAULT_MAX_SEGMENT_LENGTH: usize = 255;

/// Default maximum children per directory: 10,000
pub const DEFAULT_MAX_CHILDREN: usize = 10_000;

/// Storage resource limits.
///
/// # Example
///
/// ```rust
/// use sheetstore::{InMemoryBackend, StoreLimits};
///
/// let limits = StoreLimits::new()
///     .max_payload_size(1_000_000)
///     .max_children(500);
///
/// let backend = InMemoryBackend::with_limits(limits);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreLimits {
    /// Maximum size of a single file payload in bytes.
    pub max_payload_size: u64,

    /// Maximum number of files plus directories.
    pub max_entry_count: u64,

    /// Maximum number of segments in a path key.
    pub max_path_depth: usize,

    /// Maximum length of one segment in bytes.
    pub max_segment_length: usize,

    /// Maximum number of entries in one directory.
    pub max_children: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            max_entry_count: DEFAULT_MAX_ENTRY_COUNT,
            max_path_depth: DEFAULT_MAX_PATH_DEPTH,
            max_segment_length: DEFAULT_MAX_SEGMENT_LENGTH,
            max_children: DEFAULT_MAX_CHILDREN,
        }
    }
}

impl StoreLimits {
    /// Create new limits with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create unlimited limits (no restrictions).
    ///
    /// Only use in trusted environments.
    pub fn unlimited() -> Self {
        Self {
            max_payload_size: u64::MAX,
            max_entry_count: u64::MAX,
            max_path_depth: usize::MAX,
            max_segment_length: usize::MAX,
            max_children: usize::MAX,
        }
    }

    /// Set maximum payload size.
    pub fn max_payload_size(mut self, bytes: u64) -> Self {
        self.max_payload_size = bytes;
        self
    }

    /// Set maximum entry count.
    pub fn max_entry_count(mut self, count: u64) -> Self {
        self.max_entry_count = count;
        self
    }

    /// Set maximum path depth.
    pub fn max_path_depth(mut self, depth: usize) -> Self {
        self.max_path_depth = depth;
        self
    }

    /// Set maximum segment length.
    pub fn max_segment_length(mut self, len: usize) -> Self {
        self.max_segment_length = len;
        self
    }

    /// Set maximum children per directory.
    pub fn max_children(mut self, count: usize) -> Self {
        self.max_children = count;
        self
    }

    /// Validate a path key against depth, segment length, and character safety.
    pub fn validate_path(&self, path: &PathKey) -> Result<(), LimitExceeded> {
        if path.len() > self.max_path_depth {
            return Err(LimitExceeded::PathTooDeep {
                depth: path.len(),
                limit: self.max_path_depth,
            });
        }

        for segment in path.segments() {
            if segment.len() > self.max_segment_length {
                return Err(LimitExceeded::SegmentTooLong {
                    length: segment.len(),
                    limit: self.max_segment_length,
                });
            }
            if let Some(character) = find_unsafe_char(segment) {
                return Err(LimitExceeded::UnsafeChar {
                    character,
                    segment: segment.clone(),
                });
            }
        }

        Ok(())
    }

    /// Check a payload size against the limit.
    pub fn check_payload_size(&self, size: u64) -> Result<(), LimitExceeded> {
        if size > self.max_payload_size {
            return Err(LimitExceeded::PayloadSize {
                size,
                limit: self.max_payload_size,
            });
        }
        Ok(())
    }

    /// Check whether one more entry fits.
    pub fn check_entry_count(&self, current: u64) -> Result<(), LimitExceeded> {
        if current >= self.max_entry_count {
            return Err(LimitExceeded::EntryCount {
                current,
                limit: self.max_entry_count,
            });
        }
        Ok(())
    }

    /// Check whether a directory with `current` children can take one more.
    pub fn check_children(&self, current: usize) -> Result<(), LimitExceeded> {
        if current >= self.max_children {
            return Err(LimitExceeded::Children {
                current,
                limit: self.max_children,
            });
        }
        Ok(())
    }
}

/// First unsafe character in a segment, described for the error message.
///
/// Rejects C1 controls (0x80-0x9F) and bidi overrides (U+202A-U+202E,
/// U+2066-U+2069). ASCII controls never reach here; `PathKey` rejects them.
fn find_unsafe_char(segment: &str) -> Option<String> {
    for ch in segment.chars() {
        if ('\u{0080}'..='\u{009F}').contains(&ch) {
            return Some(format!("U+{:04X}", ch as u32));
        }
        if ('\u{202A}'..='\u{202E}').contains(&ch) || ('\u{2066}'..='\u{2069}').contains(&ch) {
            return Some(format!("U+{:04X} (bidi override)", ch as u32));
        }
    }
    None
}

/// Error returned when a storage limit is exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitExceeded {
    /// Payload exceeds the size limit.
    PayloadSize { size: u64, limit: u64 },
    /// Entry count at the limit.
    EntryCount { current: u64, limit: u64 },
    /// Path key has too many segments.
    PathTooDeep { depth: usize, limit: usize },
    /// A segment is too long.
    SegmentTooLong { length: usize, limit: usize },
    /// A directory is full.
    Children { current: usize, limit: usize },
    /// A segment contains an unsafe character.
    UnsafeChar { character: String, segment: String },
    /// The storage medium refused the path as too long.
    PathTooLong { length: usize },
}

impl fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitExceeded::PayloadSize { size, limit } => {
                write!(f, "payload too large: {size} bytes exceeds {limit} byte limit")
            }
            LimitExceeded::EntryCount { current, limit } => {
                write!(f, "too many entries: {current} entries at {limit} entry limit")
            }
            LimitExceeded::PathTooDeep { depth, limit } => {
                write!(f, "path too deep: {depth} segments exceeds {limit} segment limit")
            }
            LimitExceeded::SegmentTooLong { length, limit } => {
                write!(f, "segment too long: {length} bytes exceeds {limit} byte limit")
            }
            LimitExceeded::Children { current, limit } => {
                write!(f, "directory full: {current} children at {limit} child limit")
            }
            LimitExceeded::UnsafeChar { character, segment } => {
                write!(f, "unsafe character {character} in segment '{segment}'")
            }
            LimitExceeded::PathTooLong { length } => {
                write!(f, "path too long for the storage medium: {length} bytes")
            }
        }
    }
}

impl std::error::Error for LimitExceeded {}

/// Current storage usage.
///
/// Returned by [`StorageBackend::usage`](crate::StorageBackend::usage).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreUsage {
    /// Total payload bytes across all files.
    pub payload_bytes: u64,
    /// Number of files.
    pub file_count: u64,
    /// Number of directories, including the root.
    pub dir_count: u64,
}

impl StoreUsage {
    /// Files plus directories.
    pub fn entry_count(&self) -> u64 {
        self.file_count + self.dir_count
    }
}
