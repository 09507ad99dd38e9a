//! # Design
//!
//! - Constant-message errors for storage and peer socket failures.
//! - Context (operation, path, endpoint) lives in fields, never in the message.
//! - Session code absorbs these at its boundary and maps them to an outcome.

use std::io;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors produced by the file store and download sessions.
#[derive(Debug, Error)]
pub enum TransferError {
    /// IO failures while touching stored files.
    #[error("transfer storage io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The peer socket could not be opened.
    #[error("peer connection failed")]
    Connect {
        /// Endpoint that refused or reset the connection.
        endpoint: SocketAddrV4,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The peer did not accept the connection in time.
    #[error("peer connection timed out")]
    ConnectTimeout {
        /// Endpoint that did not answer.
        endpoint: SocketAddrV4,
    },
    /// Another session already holds the file.
    #[error("file is leased by another session")]
    LeaseHeld {
        /// Name of the contended file.
        name: String,
    },
    /// The session was stopped while waiting on the peer or storage.
    #[error("session cancelled")]
    Cancelled,
    /// A lease was used before its writer was opened.
    #[error("file writer not opened")]
    WriterClosed {
        /// Name of the leased file.
        name: String,
    },
}

impl TransferError {
    pub(crate) fn io(operation: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
