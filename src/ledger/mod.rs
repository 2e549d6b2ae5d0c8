//! Ledger - hash-chained, proof-of-work sealed provenance records.
//!
//! Provides:
//! - Sanitized transaction records
//! - Merkle aggregation and inclusion proofs
//! - Block sealing and the verifiable chain

pub mod block;
pub mod chain;
pub mod merkle;
pub mod sanitizer;
pub mod transaction;

pub use block::{Block, BlockCheck, SealOutcome, SealPolicy, SealedBlock};
pub use chain::{
    BrokenInvariant, ChainFault, ChainInfo, ChainVerification, HistoryEntry, Ledger,
    LedgerSnapshot, PendingAck, SealJob,
};
pub use merkle::{MerkleProof, MerkleTree, ProofStep, Side};
pub use sanitizer::{Sanitizer, SanitizerPolicy};
pub use transaction::{Payload, RawEvent, TransactionRecord, TransactionStatus, TransactionType};
