//! Error types for snapshot persistence.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Errors raised while reading or writing snapshots.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem access failed.
    #[error("snapshot io failed")]
    Io {
        /// Operation being attempted.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Encoding or decoding a document failed.
    #[error("snapshot document invalid")]
    Json {
        /// Operation being attempted.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) fn io(operation: &'static str, path: PathBuf, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        operation,
        path,
        source,
    }
}

pub(crate) fn json(
    operation: &'static str,
    path: PathBuf,
    source: serde_json::Error,
) -> SnapshotError {
    SnapshotError::Json {
        operation,
        path,
        source,
    }
}
