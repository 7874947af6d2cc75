//! Error types for idstore

use thiserror::Error;

/// Result type alias for idstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for ledger operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Record not found
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind (identity, credential, ...)
        kind: &'static str,
        /// Requested id
        id: String,
    },

    /// Record failed validation before it was written
    #[error("invalid {kind}: {reason}")]
    Invalid {
        /// Record kind
        kind: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// Ledger is closed
    #[error("ledger is closed")]
    Closed,
}
