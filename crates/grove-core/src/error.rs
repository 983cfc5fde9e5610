//! Error types for grove operations.

use std::io;

use serde::Serialize;
use thiserror::Error;

/// All possible grove errors.
#[derive(Debug, Error)]
pub enum GroveError {
    /// A project, branch, file or commit does not exist.
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    /// The target name or identity is already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation is not allowed in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The caller lacks the role required for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A hash prefix matched more than one commit.
    #[error("ambiguous commit prefix '{prefix}' matches {count} commits")]
    Ambiguous { prefix: String, count: usize },

    /// The persistence layer timed out or could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A caller-supplied name or path is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A persisted document could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// The file mutation was applied but its commit could not be written.
    #[error("file change applied but commit {hash} was not recorded: {source}")]
    CommitNotRecorded {
        hash: String,
        #[source]
        source: Box<GroveError>,
    },
}

/// Stable classification of a [`GroveError`], suitable for wire output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidOperation,
    PermissionDenied,
    Ambiguous,
    StoreUnavailable,
    InvalidInput,
    Corrupt,
    CommitNotRecorded,
}

impl GroveError {
    pub(crate) fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        GroveError::NotFound {
            what,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GroveError::NotFound { .. } => ErrorKind::NotFound,
            GroveError::Conflict(_) => ErrorKind::Conflict,
            GroveError::InvalidOperation(_) => ErrorKind::InvalidOperation,
            GroveError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            GroveError::Ambiguous { .. } => ErrorKind::Ambiguous,
            GroveError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            GroveError::InvalidInput(_) => ErrorKind::InvalidInput,
            GroveError::Corrupt(_) => ErrorKind::Corrupt,
            GroveError::CommitNotRecorded { .. } => ErrorKind::CommitNotRecorded,
        }
    }

    /// Only persistence faults may be retried by the caller. A retry after
    /// a timeout must re-read state first: the write may have landed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GroveError::StoreUnavailable(_))
    }
}

impl From<io::Error> for GroveError {
    fn from(e: io::Error) -> Self {
        GroveError::StoreUnavailable(e.to_string())
    }
}

/// Convenience alias for Results in grove.
pub type GroveResult<T> = Result<T, GroveError>;
