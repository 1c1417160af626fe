//! Hierarchical path keys.
//!
//! Every stored entity is addressed by a [`PathKey`]: an ordered sequence of
//! non-empty segments. The empty sequence is the root, which always exists.

use std::fmt;
use std::str::FromStr;

/// Separator used when parsing and displaying path keys.
pub const SEPARATOR: char = '/';

/// Normalized hierarchical key addressing a file or directory.
///
/// Equality, ordering, and hashing are segment-wise.
///
/// # Example
///
/// ```rust
/// use sheetstore::PathKey;
///
/// let key = PathKey::parse("home/alice/budget").unwrap();
/// assert_eq!(key.name(), Some("budget"));
/// assert_eq!(key.parent().unwrap().to_string(), "home/alice");
/// assert!(PathKey::root().is_ancestor_of(&key));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct PathKey {
    segments: Vec<String>,
}

impl PathKey {
    /// The root key (empty segment sequence).
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a key from segments, validating each one.
    pub fn new<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for (position, segment) in segments.iter().enumerate() {
            validate_segment(segment, position)?;
        }
        Ok(Self { segments })
    }

    /// Parse a `/`-separated key.
    ///
    /// Leading and trailing separators are ignored; `""` and `"/"` are the root.
    /// Empty interior segments (`a//b`) are rejected.
    pub fn parse(s: &str) -> Result<Self, PathError> {
        let trimmed = s.trim_matches(SEPARATOR);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        Self::new(trimmed.split(SEPARATOR))
    }

    /// Path segments from the root outward.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments (0 for the root).
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True for the root key.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Alias of [`is_root`](Self::is_root), kept for `len`/`is_empty` symmetry.
    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    /// Parent key, or `None` for the root.
    pub fn parent(&self) -> Option<PathKey> {
        let (_, init) = self.segments.split_last()?;
        Some(Self {
            segments: init.to_vec(),
        })
    }

    /// Final segment, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Append one segment.
    pub fn join(&self, segment: impl Into<String>) -> Result<PathKey, PathError> {
        let segment = segment.into();
        validate_segment(&segment, self.segments.len())?;
        let mut segments = self.segments.clone();
        segments.push(segment);
        Ok(Self { segments })
    }

    /// True if `self` is a strict prefix of `other`.
    pub fn is_ancestor_of(&self, other: &PathKey) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Every strict prefix of this key, root first.
    pub fn ancestors(&self) -> impl Iterator<Item = PathKey> + '_ {
        (0..self.segments.len()).map(move |n| Self {
            segments: self.segments[..n].to_vec(),
        })
    }
}

fn validate_segment(segment: &str, position: usize) -> Result<(), PathError> {
    let reason = if segment.is_empty() {
        "segment is empty"
    } else if segment.contains(SEPARATOR) {
        "segment contains a path separator"
    } else if segment == "." || segment == ".." {
        "relative segments are not allowed"
    } else if segment.chars().any(|c| c.is_ascii_control()) {
        "segment contains a control character"
    } else {
        return Ok(());
    };

    Err(PathError::InvalidSegment {
        segment: segment.to_string(),
        position,
        reason,
    })
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl FromStr for PathKey {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Rejected path key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// A segment failed validation.
    #[error("invalid segment {segment:?} at position {position}: {reason}")]
    InvalidSegment {
        segment: String,
        position: usize,
        reason: &'static str,
    },

    /// The operation is not defined on the root.
    #[error("operation not permitted on the root")]
    Root,
}
