//! Store error types

use thiserror::Error;

/// Errors from the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// No definition with the given id or code
    #[error("metric definition not found: {0}")]
    DefinitionNotFound(String),

    /// No configuration attached to the given metric
    #[error("configuration not found for metric {0}")]
    ConfigurationNotFound(i64),

    /// A definition with this code already exists
    #[error("metric code '{0}' is already in use")]
    DuplicateCode(String),

    /// Insert hit the snapshot uniqueness constraint; the caller should
    /// fetch and return the existing row
    #[error("snapshot already exists for definition {definition_id} ({dimension_hash}) over the requested period")]
    DuplicateSnapshot {
        definition_id: i64,
        dimension_hash: String,
    },

    /// A stored value could not be decoded into its domain type
    #[error("corrupt stored value in {table}.{column}: {reason}")]
    Corrupt {
        table: &'static str,
        column: &'static str,
        reason: String,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A connection lock was poisoned by a panicking writer
    #[error("store lock poisoned")]
    LockPoisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;
