//! Errors of the configuration history, key-value and image stores.

use thiserror::Error;

/// Failure of a store operation.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The database rejected or failed a query or transaction.
    #[error("store operation failed: {0}")]
    OperationFailed(String),

    /// No configuration row, key-value entry or image matched the lookup.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored value could not be encoded or decoded.
    #[error("failed to encode or decode stored value: {0}")]
    SerializationError(String),

    /// The embedded schema migrations could not be applied.
    #[error("schema migration failed: {0}")]
    MigrationError(String),

    /// A key, namespace or command was rejected before reaching the database.
    #[error("invalid store input: {0}")]
    InvalidInput(String),
}
