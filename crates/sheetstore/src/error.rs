//! Error types for Sheetstore
//!
//! Storage and session failures are returned as typed results; nothing in the
//! library logs an error and carries on. Design goals:
//! - Clear categorization for programmatic handling ([`ErrorKind`])
//! - Exactly one retriable kind ([`Error::BackendUnavailable`])
//! - No payload bytes or full session identifiers in messages

use crate::path::{PathError, PathKey};
use crate::storage::{EntryKind, LimitExceeded};
use thiserror::Error;

/// Result type alias using Sheetstore's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Sheetstore error types.
#[derive(Error, Debug)]
pub enum Error {
    /// Nothing exists at the path, or a required parent directory is missing.
    #[error("not found: {0}")]
    NotFound(PathKey),

    /// A create targeted a path that already holds a file or directory.
    #[error("already exists: {0}")]
    AlreadyExists(PathKey),

    /// The entity at the path has the wrong shape for the operation.
    #[error("type mismatch at {path}: expected a {expected}")]
    TypeMismatch { path: PathKey, expected: EntryKind },

    /// Delete of a directory that still has children.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(PathKey),

    /// The persistent medium could not be reached or timed out.
    ///
    /// This is the only retriable error.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The directory index and stored entities disagree.
    ///
    /// Only an explicit reconciliation pass repairs this.
    #[error("corrupt store at {path}: {detail}")]
    Corrupt { path: PathKey, detail: String },

    /// The path key is malformed or not valid for the operation.
    #[error("invalid path: {0}")]
    InvalidPath(#[from] PathError),

    /// A storage limit was exceeded.
    #[error("limit exceeded: {0}")]
    LimitExceeded(#[from] LimitExceeded),

    /// No active session with the given identifier.
    #[error("unknown session")]
    UnknownSession,

    /// The session belongs to a different user than the request.
    #[error("session user mismatch")]
    SessionUserMismatch,

    /// A required request field was empty.
    #[error("missing {0}")]
    MissingField(&'static str),

    /// A stored record could not be encoded or decoded.
    #[error("record error: {0}")]
    Record(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

/// Coarse error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    TypeMismatch,
    BackendUnavailable,
    Corrupt,
    InvalidInput,
    Session,
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::TypeMismatch { .. } | Error::DirectoryNotEmpty(_) => ErrorKind::TypeMismatch,
            Error::BackendUnavailable(_) => ErrorKind::BackendUnavailable,
            Error::Corrupt { .. } => ErrorKind::Corrupt,
            Error::InvalidPath(_)
            | Error::LimitExceeded(_)
            | Error::MissingField(_)
            | Error::Record(_)
            | Error::Config(_) => ErrorKind::InvalidInput,
            Error::UnknownSession | Error::SessionUserMismatch => ErrorKind::Session,
        }
    }

    /// True only for errors a caller should retry with backoff.
    pub fn is_retriable(&self) -> bool {
        self.kind() == ErrorKind::BackendUnavailable
    }

    pub(crate) fn type_mismatch(path: &PathKey, expected: EntryKind) -> Self {
        Self::TypeMismatch {
            path: path.clone(),
            expected,
        }
    }

    pub(crate) fn corrupt(path: &PathKey, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        tracing::error!(path = %path, detail = %detail, "directory index inconsistent with stored entities");
        Self::Corrupt {
            path: path.clone(),
            detail,
        }
    }

    pub(crate) fn unavailable(context: &str, err: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable(format!("{context}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_backend_unavailable_is_retriable() {
        assert!(Error::BackendUnavailable("timeout".into()).is_retriable());
        assert!(!Error::NotFound(PathKey::root()).is_retriable());
        assert!(!Error::AlreadyExists(PathKey::root()).is_retriable());
        assert!(!Error::UnknownSession.is_retriable());
    }

    #[test]
    fn kinds() {
        let path = PathKey::root();
        assert_eq!(
            Error::type_mismatch(&path, EntryKind::File).kind(),
            ErrorKind::TypeMismatch
        );
        assert_eq!(Error::corrupt(&path, "dangling").kind(), ErrorKind::Corrupt);
        assert_eq!(Error::Config("x".into()).kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn display_names_path() {
        let path = PathKey::parse("home/alice").unwrap_or_default();
        let err = Error::type_mismatch(&path, EntryKind::Directory);
        assert_eq!(
            err.to_string(),
            "type mismatch at home/alice: expected a directory"
        );
    }
}
