//! Error types for the provenance ledger.

use crate::ledger::chain::BrokenInvariant;
use thiserror::Error;

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ledger operations.
#[derive(Error, Debug)]
pub enum Error {
    // Input errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Block errors
    #[error("Block must contain at least one transaction")]
    EmptyBlock,

    #[error("Sealing gave up after {attempts} attempts ({elapsed_ms} ms)")]
    SealExhausted { attempts: u64, elapsed_ms: u64 },

    #[error("Another seal is already in flight")]
    SealInProgress,

    #[error("Block rejected: {0}")]
    BlockRejected(String),

    #[error("Invalid parent hash")]
    InvalidParentHash,

    // Chain errors
    #[error("Chain integrity violated at block {index}: {invariant}")]
    ChainIntegrityViolated {
        index: u64,
        invariant: BrokenInvariant,
    },

    #[error("Ledger halted after integrity fault at block {index}: {invariant}")]
    LedgerHalted {
        index: u64,
        invariant: BrokenInvariant,
    },

    #[error("Genesis hash does not match configuration")]
    GenesisMismatch,

    // Persistence errors
    #[error("Block {index} committed but not persisted: {reason}")]
    NotPersisted { index: u64, reason: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Error::Validation(format!("invalid hex digest: {}", err))
    }
}
