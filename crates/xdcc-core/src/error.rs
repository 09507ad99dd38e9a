//! # Design
//!
//! - Constant error messages; context travels in fields.
//! - Malformed chat never produces an error; only setup failures do.

use thiserror::Error;

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while constructing the classifier or touching the entity tree.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A built-in pattern failed to compile.
    #[error("classifier pattern failed to compile")]
    PatternCompile {
        /// Name of the pattern.
        pattern: &'static str,
        /// Underlying regex error.
        source: regex::Error,
    },
    /// An entity identifier did not resolve inside the network.
    #[error("unknown entity")]
    UnknownEntity {
        /// Entity kind (`channel`, `bot`, `packet`).
        kind: &'static str,
        /// Index that failed to resolve.
        index: usize,
    },
    /// A caller supplied an invalid name.
    #[error("invalid entity name")]
    InvalidName {
        /// Entity kind (`channel`, `bot`).
        kind: &'static str,
        /// Offending value.
        value: String,
    },
}

impl CoreError {
    pub(crate) const fn pattern(pattern: &'static str, source: regex::Error) -> Self {
        Self::PatternCompile { pattern, source }
    }
}
