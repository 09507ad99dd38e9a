//! # Design
//!
//! - Centralize application-level errors for bootstrap and orchestration.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: xdcc_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: xdcc_telemetry::TelemetryError,
    },
    /// Protocol core operations failed.
    #[error("protocol core operation failed")]
    Core {
        /// Operation identifier.
        operation: &'static str,
        /// Source core error.
        source: xdcc_core::CoreError,
    },
    /// File storage operations failed.
    #[error("file storage operation failed")]
    Transfer {
        /// Operation identifier.
        operation: &'static str,
        /// Source transfer error.
        source: xdcc_transfer::TransferError,
    },
    /// Snapshot persistence failed.
    #[error("snapshot persistence failed")]
    Snapshot {
        /// Operation identifier.
        operation: &'static str,
        /// Source snapshot error.
        source: xdcc_runtime::SnapshotError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// A task the application depends on stopped.
    #[error("channel closed")]
    ChannelClosed {
        /// Name of the closed channel.
        name: &'static str,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: xdcc_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: xdcc_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn core(operation: &'static str, source: xdcc_core::CoreError) -> Self {
        Self::Core { operation, source }
    }

    pub(crate) const fn transfer(
        operation: &'static str,
        source: xdcc_transfer::TransferError,
    ) -> Self {
        Self::Transfer { operation, source }
    }

    pub(crate) const fn snapshot(
        operation: &'static str,
        source: xdcc_runtime::SnapshotError,
    ) -> Self {
        Self::Snapshot { operation, source }
    }

    pub(crate) const fn io(operation: &'static str, path: Option<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path,
            source,
        }
    }
}
