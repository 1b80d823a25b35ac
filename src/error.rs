//! NordGuard error types

use thiserror::Error;

/// NordGuard error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Detection pattern error (invalid or misbehaving rule)
    #[error("Pattern error: {0}")]
    Pattern(String),

    /// Detection category unknown to the classification table
    #[error("Unclassified category: {0}")]
    UnclassifiedCategory(String),

    /// Transformation policy incompatible with a field's sensitivity tier
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Audit ledger append failure; fatal to the batch
    #[error("Ledger write failure: {0}")]
    LedgerWrite(String),

    /// Persistent store error
    #[error("Store error: {0}")]
    Store(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for NordGuard operations
pub type Result<T> = std::result::Result<T, Error>;
