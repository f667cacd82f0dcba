//! Error types for the optimistic layer.

use thiserror::Error;

/// Main error type for optimistic operations.
///
/// Only one path fails. Everything else that cannot be acted on is a
/// defined no-op: control actions posted for recording pass through
/// unrecorded, and rolling back with no save point active does nothing.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rollback requires a transaction id")]
    MissingTransaction,
}

/// Result type for optimistic operations.
pub type Result<T> = std::result::Result<T, StoreError>;
