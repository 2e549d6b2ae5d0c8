//! Ledger block structure.
//!
//! A block is a header plus an ordered batch of transactions. Its hash covers
//! the header only; the header commits to the batch through the Merkle root
//! and transaction count.

use crate::core::crypto::canonical_hash;
use crate::core::{canonical_timestamp, now, Error, Hash256, Result, Timestamp};
use crate::ledger::chain::BrokenInvariant;
use crate::ledger::merkle::{self, MerkleProof, MerkleTree};
use crate::ledger::transaction::TransactionRecord;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha3::{Digest, Sha3_256};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// A SHA3-256 hex digest has 64 characters.
pub const MAX_HEX_DIFFICULTY: u32 = 64;

/// How often the timeout is checked while mining.
const TIMEOUT_CHECK_INTERVAL: u64 = 1024;

/// Bounds on a proof-of-work search.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SealPolicy {
    /// Give up after this many hash attempts
    pub max_attempts: Option<u64>,
    /// Give up after this much wall-clock time
    pub timeout: Option<Duration>,
}

impl SealPolicy {
    /// No bounds at all.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Bounded by attempt count.
    pub fn bounded(max_attempts: u64) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            timeout: None,
        }
    }

    /// Add a wall-clock bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Statistics of a successful seal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealOutcome {
    /// Hashes computed, including the winning one
    pub attempts: u64,
    /// Time spent mining
    pub elapsed: Duration,
}

/// Result of independent block checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockCheck {
    /// Block carries at least one transaction
    pub has_transactions: bool,
    /// Stored hash has the required leading zeros
    pub meets_difficulty: bool,
    /// Stored hash equals the header recomputation
    pub hash_matches: bool,
    /// Stored Merkle root equals the recomputation over the transactions
    pub merkle_matches: bool,
}

impl BlockCheck {
    /// Whether every check passed.
    pub fn is_valid(&self) -> bool {
        self.has_transactions && self.meets_difficulty && self.hash_matches && self.merkle_matches
    }

    /// First failed check, if any.
    pub fn first_failure(&self) -> Option<BrokenInvariant> {
        if !self.has_transactions {
            Some(BrokenInvariant::EmptyBlock)
        } else if !self.meets_difficulty {
            Some(BrokenInvariant::Difficulty)
        } else if !self.hash_matches {
            Some(BrokenInvariant::HeaderHash)
        } else if !self.merkle_matches {
            Some(BrokenInvariant::MerkleRoot)
        } else {
            None
        }
    }
}

/// Summary handed back to collaborators after a seal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlock {
    pub index: u64,
    pub hash: Hash256,
    pub previous_hash: Hash256,
    pub merkle_root: Hash256,
    pub nonce: u64,
    pub difficulty: u32,
    pub transaction_count: usize,
    pub timestamp: Timestamp,
}

/// A batch of transactions sealed into the chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain (0 = genesis)
    pub index: u64,
    /// Block creation timestamp
    pub timestamp: Timestamp,
    /// Ordered transactions
    pub transactions: Vec<TransactionRecord>,
    /// Hash of the previous block, or the genesis seed
    pub previous_hash: Hash256,
    /// Merkle root over the transactions
    pub merkle_root: Hash256,
    /// Proof-of-work counter
    pub nonce: u64,
    /// Required leading hex zeros
    pub difficulty: u32,
    /// Header hash, only written by construction and sealing
    hash: Hash256,
}

/// Canonical header text split around the nonce, so mining only re-hashes
/// the counter instead of re-serializing the header.
struct HeaderTemplate {
    prefix: String,
    suffix: String,
}

impl HeaderTemplate {
    fn hash(&self, nonce: u64) -> Hash256 {
        let mut hasher = Sha3_256::new();
        hasher.update(self.prefix.as_bytes());
        hasher.update(nonce.to_string().as_bytes());
        hasher.update(self.suffix.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Hash256::new(bytes)
    }
}

impl Block {
    /// Create an unsealed block.
    pub fn new(
        index: u64,
        previous_hash: Hash256,
        transactions: Vec<TransactionRecord>,
        difficulty: u32,
    ) -> Result<Self> {
        if transactions.is_empty() {
            return Err(Error::EmptyBlock);
        }
        check_difficulty(difficulty)?;

        let mut block = Self {
            index,
            timestamp: now(),
            merkle_root: merkle::transactions_root(&transactions),
            transactions,
            previous_hash,
            nonce: 0,
            difficulty,
            hash: Hash256::zero(),
        };
        block.hash = block.compute_hash();
        Ok(block)
    }

    /// Create the unsealed genesis block anchored to `genesis_hash`.
    pub fn genesis(genesis_hash: Hash256, difficulty: u32) -> Result<Self> {
        let tx = TransactionRecord::genesis("Provider provenance chain initialized");
        Self::new(0, genesis_hash, vec![tx], difficulty)
    }

    /// Header hash as stored.
    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }

    /// Number of transactions in the block.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    fn header_value(&self) -> Value {
        json!({
            "index": self.index,
            "timestamp": canonical_timestamp(&self.timestamp),
            "previous_hash": self.previous_hash.to_hex(),
            "merkle_root": self.merkle_root.to_hex(),
            "nonce": self.nonce,
            "difficulty": self.difficulty,
            "transaction_count": self.transactions.len(),
        })
    }

    fn header_template(&self) -> HeaderTemplate {
        // Keys in canonical (sorted) order; must match `header_value`.
        let timestamp = Value::String(canonical_timestamp(&self.timestamp)).to_string();
        HeaderTemplate {
            prefix: format!(
                "{{\"difficulty\":{},\"index\":{},\"merkle_root\":\"{}\",\"nonce\":",
                self.difficulty,
                self.index,
                self.merkle_root.to_hex()
            ),
            suffix: format!(
                ",\"previous_hash\":\"{}\",\"timestamp\":{},\"transaction_count\":{}}}",
                self.previous_hash.to_hex(),
                timestamp,
                self.transactions.len()
            ),
        }
    }

    /// Recompute the header hash from current field values.
    pub fn compute_hash(&self) -> Hash256 {
        canonical_hash(&self.header_value())
    }

    /// Recompute the Merkle root from current transactions.
    pub fn compute_merkle_root(&self) -> Hash256 {
        merkle::transactions_root(&self.transactions)
    }

    /// Search nonces until the hash has `target_difficulty` leading zeros.
    ///
    /// Expected cost is about 16^difficulty hashes. `policy` bounds the
    /// search; when a bound is hit the block is left unsealed and
    /// `Error::SealExhausted` is returned.
    pub fn seal(&mut self, target_difficulty: u32, policy: &SealPolicy) -> Result<SealOutcome> {
        check_difficulty(target_difficulty)?;
        self.difficulty = target_difficulty;

        let template = self.header_template();
        let started = Instant::now();
        let mut attempts: u64 = 0;
        let mut nonce = self.nonce;

        loop {
            attempts += 1;
            let hash = template.hash(nonce);
            if hash.meets_difficulty(target_difficulty) {
                self.nonce = nonce;
                self.hash = hash;
                let outcome = SealOutcome {
                    attempts,
                    elapsed: started.elapsed(),
                };
                debug!(
                    index = self.index,
                    nonce,
                    attempts,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Block sealed"
                );
                return Ok(outcome);
            }

            let exhausted = policy.max_attempts.map_or(false, |max| attempts >= max);
            let timed_out = attempts % TIMEOUT_CHECK_INTERVAL == 0
                && policy.timeout.map_or(false, |t| started.elapsed() >= t);
            if exhausted || timed_out {
                self.nonce = nonce;
                self.hash = self.compute_hash();
                let elapsed_ms = started.elapsed().as_millis() as u64;
                trace!(index = self.index, attempts, elapsed_ms, "Seal bound reached");
                return Err(Error::SealExhausted {
                    attempts,
                    elapsed_ms,
                });
            }

            nonce = nonce.wrapping_add(1);
        }
    }

    /// Run every block-local check independently.
    pub fn check(&self) -> BlockCheck {
        BlockCheck {
            has_transactions: !self.transactions.is_empty(),
            meets_difficulty: self.hash.meets_difficulty(self.difficulty),
            hash_matches: self.hash == self.compute_hash(),
            merkle_matches: self.merkle_root == self.compute_merkle_root(),
        }
    }

    /// Whether every block-local invariant holds.
    pub fn is_valid(&self) -> bool {
        self.check().is_valid()
    }

    /// Position of the transaction with `content_hash`.
    pub fn position_of(&self, content_hash: &Hash256) -> Option<usize> {
        self.transactions
            .iter()
            .position(|tx| &tx.content_hash() == content_hash)
    }

    /// Whether the block carries the transaction with `content_hash`.
    pub fn contains(&self, content_hash: &Hash256) -> bool {
        self.position_of(content_hash).is_some()
    }

    /// Inclusion proof for a transaction against this block's Merkle root.
    pub fn inclusion_proof(&self, content_hash: &Hash256) -> Option<MerkleProof> {
        let position = self.position_of(content_hash)?;
        MerkleTree::from_transactions(&self.transactions).proof(position)
    }

    /// Descriptor for collaborators.
    pub fn summary(&self) -> SealedBlock {
        SealedBlock {
            index: self.index,
            hash: self.hash,
            previous_hash: self.previous_hash,
            merkle_root: self.merkle_root,
            nonce: self.nonce,
            difficulty: self.difficulty,
            transaction_count: self.transactions.len(),
            timestamp: self.timestamp,
        }
    }

    /// Serialize block to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize block from JSON. The result is not trusted until checked.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn check_difficulty(difficulty: u32) -> Result<()> {
    if difficulty > MAX_HEX_DIFFICULTY {
        return Err(Error::InvalidConfig(format!(
            "difficulty {} exceeds the {} hex characters of a digest",
            difficulty, MAX_HEX_DIFFICULTY
        )));
    }
    Ok(())
}
