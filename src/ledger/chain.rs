//! The provenance ledger.
//!
//! Owns the ordered chain of sealed blocks and the buffer of pending
//! transactions. Everything that appends, seals, imports or queries goes
//! through this type; block hashing is never re-derived elsewhere.

use crate::config::{validate_difficulty, LedgerConfig};
use crate::core::{Error, Hash256, Result, Timestamp};
use crate::ledger::block::{Block, SealOutcome, SealPolicy, SealedBlock};
use crate::ledger::merkle::{verify_inclusion, MerkleProof};
use crate::ledger::sanitizer::Sanitizer;
use crate::ledger::transaction::{
    Payload, RawEvent, TransactionRecord, TransactionStatus, TransactionType,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Which chain invariant a block broke.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokenInvariant {
    /// Genesis block does not link to the configured seed
    GenesisAnchor,
    /// Block index does not match its position
    IndexSequence,
    /// `previous_hash` differs from the prior block's hash
    PreviousHashLink,
    /// Block carries no transactions
    EmptyBlock,
    /// Hash lacks the required leading zeros
    Difficulty,
    /// Stored hash differs from the header recomputation
    HeaderHash,
    /// Stored Merkle root differs from the recomputation
    MerkleRoot,
}

impl std::fmt::Display for BrokenInvariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokenInvariant::GenesisAnchor => write!(f, "genesis anchor"),
            BrokenInvariant::IndexSequence => write!(f, "index sequence"),
            BrokenInvariant::PreviousHashLink => write!(f, "previous-hash link"),
            BrokenInvariant::EmptyBlock => write!(f, "empty block"),
            BrokenInvariant::Difficulty => write!(f, "difficulty"),
            BrokenInvariant::HeaderHash => write!(f, "header hash"),
            BrokenInvariant::MerkleRoot => write!(f, "merkle root"),
        }
    }
}

/// Location of the first broken invariant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFault {
    /// Index of the offending block
    pub index: u64,
    /// What broke
    pub invariant: BrokenInvariant,
}

/// Result of chain verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Whether the chain is valid
    pub valid: bool,
    /// Number of blocks verified before stopping
    pub blocks_verified: u64,
    /// First failure, if any
    pub fault: Option<ChainFault>,
}

/// Acknowledgment for a buffered transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAck {
    pub transaction_id: String,
    pub content_hash: Hash256,
    pub status: TransactionStatus,
    /// Pending buffer size after this append
    pub pending_count: usize,
}

/// Chain statistics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub length: usize,
    pub latest_hash: Hash256,
    pub latest_timestamp: Timestamp,
    pub total_transactions: usize,
    pub pending_count: usize,
    pub genesis_hash: Hash256,
    pub difficulty: u32,
    /// Computed fresh on every call
    pub is_valid: bool,
}

/// One step of a provider's history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub block_hash: Hash256,
    pub block_index: u64,
    pub transaction_id: String,
    pub timestamp: Timestamp,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub payload: Payload,
}

/// Persisted form of a ledger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub genesis_hash: Hash256,
    pub difficulty: u32,
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub pending: Vec<TransactionRecord>,
}

/// A block taken out of the ledger for mining.
///
/// Holds the pending snapshot; it must go back through either
/// [`Ledger::commit_seal`] or [`Ledger::abort_seal`].
#[derive(Clone, Debug)]
pub struct SealJob {
    block: Block,
    difficulty: u32,
}

impl SealJob {
    /// Run proof-of-work. Needs no access to the ledger.
    pub fn mine(&mut self, policy: &SealPolicy) -> Result<SealOutcome> {
        self.block.seal(self.difficulty, policy)
    }

    /// Index the block will take.
    pub fn index(&self) -> u64 {
        self.block.index
    }

    /// Transactions in the job.
    pub fn transaction_count(&self) -> usize {
        self.block.transaction_count()
    }
}

/// Append-only, hash-chained ledger.
#[derive(Debug)]
pub struct Ledger {
    /// Sealed blocks, index 0 = genesis
    chain: Vec<Block>,
    /// Buffered, unsealed transactions in insertion order
    pending: Vec<TransactionRecord>,
    genesis_hash: Hash256,
    difficulty: u32,
    seal_policy: SealPolicy,
    sanitizer: Sanitizer,
    /// Set once an integrity break has been detected
    fault: Option<ChainFault>,
    /// A `SealJob` is outstanding
    sealing: bool,
}

impl Ledger {
    /// Create a new ledger with a sealed genesis block.
    pub fn new(config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let genesis_hash = config.genesis_hash()?;
        let seal_policy = config.seal.policy();

        let mut genesis = Block::genesis(genesis_hash, config.difficulty)?;
        genesis.seal(config.difficulty, &seal_policy)?;
        info!(
            block_hash = %genesis.hash(),
            difficulty = config.difficulty,
            "Genesis block created"
        );

        Ok(Self {
            chain: vec![genesis],
            pending: Vec::new(),
            genesis_hash,
            difficulty: config.difficulty,
            seal_policy,
            sanitizer: Sanitizer::new(config.sanitizer),
            fault: None,
            sealing: false,
        })
    }

    /// Rebuild a ledger from persisted state, replaying full verification.
    pub fn from_snapshot(snapshot: LedgerSnapshot, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let genesis_hash = config.genesis_hash()?;
        if snapshot.genesis_hash != genesis_hash {
            return Err(Error::GenesisMismatch);
        }
        if snapshot.blocks.is_empty() {
            return Err(Error::ChainIntegrityViolated {
                index: 0,
                invariant: BrokenInvariant::GenesisAnchor,
            });
        }
        for tx in &snapshot.pending {
            tx.validate()?;
        }

        let ledger = Self {
            chain: snapshot.blocks,
            pending: snapshot.pending,
            genesis_hash,
            difficulty: config.difficulty,
            seal_policy: config.seal.policy(),
            sanitizer: Sanitizer::new(config.sanitizer),
            fault: None,
            sealing: false,
        };

        let verification = ledger.verify_chain();
        if let Some(fault) = verification.fault {
            error!(
                index = fault.index,
                invariant = %fault.invariant,
                "Rejected persisted chain"
            );
            return Err(Error::ChainIntegrityViolated {
                index: fault.index,
                invariant: fault.invariant,
            });
        }

        info!(
            length = ledger.chain.len(),
            pending = ledger.pending.len(),
            "Ledger restored"
        );
        Ok(ledger)
    }

    /// Current persisted form.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            genesis_hash: self.genesis_hash,
            difficulty: self.difficulty,
            blocks: self.chain.clone(),
            pending: self.pending.clone(),
        }
    }

    /// Export ledger to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Import ledger from JSON.
    pub fn from_json(json: &str, config: LedgerConfig) -> Result<Self> {
        let snapshot: LedgerSnapshot = serde_json::from_str(json)?;
        Self::from_snapshot(snapshot, config)
    }

    /// Number of sealed blocks, genesis included.
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Always false for a constructed ledger; genesis is always present.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Configured genesis seed.
    pub fn genesis_hash(&self) -> &Hash256 {
        &self.genesis_hash
    }

    /// Difficulty used for the next seal.
    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Change the difficulty for subsequent seals.
    pub fn set_difficulty(&mut self, difficulty: u32) -> Result<()> {
        validate_difficulty(difficulty)?;
        self.difficulty = difficulty;
        Ok(())
    }

    /// Proof-of-work bounds for seals.
    pub fn seal_policy(&self) -> &SealPolicy {
        &self.seal_policy
    }

    /// Replace the proof-of-work bounds.
    pub fn set_seal_policy(&mut self, policy: SealPolicy) {
        self.seal_policy = policy;
    }

    /// Integrity fault that halted the ledger, if any.
    pub fn fault(&self) -> Option<&ChainFault> {
        self.fault.as_ref()
    }

    /// Whether a seal job is outstanding.
    pub fn is_sealing(&self) -> bool {
        self.sealing
    }

    fn ensure_not_halted(&self) -> Result<()> {
        match self.fault {
            Some(fault) => Err(Error::LedgerHalted {
                index: fault.index,
                invariant: fault.invariant,
            }),
            None => Ok(()),
        }
    }

    /// Buffer a transaction for the next seal.
    pub fn append_transaction(&mut self, tx: TransactionRecord) -> Result<PendingAck> {
        self.ensure_not_halted()?;
        tx.validate()?;
        if self.pending.iter().any(|p| p.id == tx.id) {
            return Err(Error::Validation(format!(
                "transaction {} is already pending",
                tx.id
            )));
        }

        let ack = PendingAck {
            transaction_id: tx.id.clone(),
            content_hash: tx.content_hash(),
            status: TransactionStatus::Pending,
            pending_count: self.pending.len() + 1,
        };
        debug!(
            transaction_id = %tx.id,
            tx_type = %tx.tx_type,
            pending = ack.pending_count,
            "Transaction buffered"
        );
        self.pending.push(tx);
        Ok(ack)
    }

    /// Sanitize a raw event and buffer it.
    pub fn record_event(&mut self, event: RawEvent) -> Result<PendingAck> {
        let tx = TransactionRecord::from_event(event, &self.sanitizer)?;
        self.append_transaction(tx)
    }

    /// Buffered transactions.
    pub fn pending(&self) -> &[TransactionRecord] {
        &self.pending
    }

    /// Take the pending buffer and prepare a block for mining.
    ///
    /// Returns `None` when there is nothing to seal. Only one job may be
    /// outstanding at a time.
    pub fn begin_seal(&mut self) -> Result<Option<SealJob>> {
        self.ensure_not_halted()?;
        if self.sealing {
            return Err(Error::SealInProgress);
        }
        if self.pending.is_empty() {
            return Ok(None);
        }

        let previous_hash = *self.tip()?.hash();
        let transactions = std::mem::take(&mut self.pending);
        let block = match Block::new(
            self.chain.len() as u64,
            previous_hash,
            transactions.clone(),
            self.difficulty,
        ) {
            Ok(block) => block,
            Err(e) => {
                self.pending = transactions;
                return Err(e);
            }
        };

        self.sealing = true;
        debug!(
            index = block.index,
            transactions = block.transaction_count(),
            difficulty = self.difficulty,
            "Seal started"
        );
        Ok(Some(SealJob {
            block,
            difficulty: self.difficulty,
        }))
    }

    /// Append a mined job's block to the chain.
    ///
    /// If the block no longer extends the tip or fails validation its
    /// transactions go back to the front of the pending buffer.
    pub fn commit_seal(&mut self, job: SealJob) -> Result<SealedBlock> {
        let block = job.block;
        let checked = self
            .ensure_not_halted()
            .and_then(|_| self.check_extends_tip(&block));
        if let Err(e) = checked {
            warn!(index = block.index, error = %e, "Sealed block not committed");
            self.requeue(block.transactions);
            return Err(e);
        }

        self.sealing = false;
        let summary = block.summary();
        info!(
            index = summary.index,
            block_hash = %summary.hash,
            nonce = summary.nonce,
            transactions = summary.transaction_count,
            "Block appended"
        );
        self.chain.push(block);
        Ok(summary)
    }

    /// Give up on a job and restore its transactions, in order, ahead of
    /// anything appended while it was mining.
    pub fn abort_seal(&mut self, job: SealJob) {
        warn!(
            index = job.block.index,
            transactions = job.block.transaction_count(),
            "Seal aborted, transactions re-queued"
        );
        self.requeue(job.block.transactions);
    }

    fn requeue(&mut self, mut transactions: Vec<TransactionRecord>) {
        transactions.append(&mut self.pending);
        self.pending = transactions;
        self.sealing = false;
    }

    /// Seal all pending transactions into a new block.
    ///
    /// Returns `None` when there is nothing to seal.
    pub fn seal_pending_block(&mut self) -> Result<Option<SealedBlock>> {
        let Some(mut job) = self.begin_seal()? else {
            return Ok(None);
        };
        let policy = self.seal_policy.clone();
        match job.mine(&policy) {
            Ok(_) => self.commit_seal(job).map(Some),
            Err(e) => {
                self.abort_seal(job);
                Err(e)
            }
        }
    }

    /// Append a block sealed elsewhere (federation push).
    pub fn import_block(&mut self, block: Block) -> Result<SealedBlock> {
        self.ensure_not_halted()?;
        if self.sealing {
            return Err(Error::SealInProgress);
        }
        if block.difficulty < self.difficulty {
            return Err(Error::BlockRejected(format!(
                "difficulty {} is below the local minimum {}",
                block.difficulty, self.difficulty
            )));
        }
        self.check_extends_tip(&block)?;

        let summary = block.summary();
        info!(index = summary.index, block_hash = %summary.hash, "Block imported");
        self.chain.push(block);
        Ok(summary)
    }

    fn tip(&self) -> Result<&Block> {
        self.chain
            .last()
            .ok_or_else(|| Error::Internal("chain has no genesis block".into()))
    }

    fn check_extends_tip(&self, block: &Block) -> Result<()> {
        let tip = self.tip()?;
        if block.index != self.chain.len() as u64 {
            return Err(Error::BlockRejected(format!(
                "expected index {}, got {}",
                self.chain.len(),
                block.index
            )));
        }
        if &block.previous_hash != tip.hash() {
            return Err(Error::InvalidParentHash);
        }
        if let Some(invariant) = block.check().first_failure() {
            return Err(Error::BlockRejected(format!("{} check failed", invariant)));
        }
        Ok(())
    }

    /// Verify every block and link, stopping at the first failure.
    pub fn verify_chain(&self) -> ChainVerification {
        let mut verification = ChainVerification {
            valid: true,
            blocks_verified: 0,
            fault: None,
        };

        let length = self.chain.len();
        if length == 0 {
            verification.valid = false;
            verification.fault = Some(ChainFault {
                index: 0,
                invariant: BrokenInvariant::GenesisAnchor,
            });
            return verification;
        }

        for (i, block) in self.chain.iter().enumerate() {
            if let Some(invariant) = self.block_fault(i, block) {
                warn!(index = i, invariant = %invariant, "Chain verification failed");
                verification.valid = false;
                verification.fault = Some(ChainFault {
                    index: i as u64,
                    invariant,
                });
                break;
            }
            verification.blocks_verified += 1;
        }

        verification
    }

    fn block_fault(&self, position: usize, block: &Block) -> Option<BrokenInvariant> {
        if block.index != position as u64 {
            return Some(BrokenInvariant::IndexSequence);
        }
        if position == 0 {
            if block.previous_hash != self.genesis_hash {
                return Some(BrokenInvariant::GenesisAnchor);
            }
        } else if &block.previous_hash != self.chain[position - 1].hash() {
            return Some(BrokenInvariant::PreviousHashLink);
        }
        block.check().first_failure()
    }

    /// Verify and halt the ledger if the chain is broken.
    pub fn enforce_integrity(&mut self) -> Result<ChainVerification> {
        let verification = self.verify_chain();
        if let Some(fault) = verification.fault {
            error!(
                index = fault.index,
                invariant = %fault.invariant,
                "Chain integrity violated, ledger halted"
            );
            self.fault = Some(fault);
            return Err(Error::ChainIntegrityViolated {
                index: fault.index,
                invariant: fault.invariant,
            });
        }
        Ok(verification)
    }

    /// Lift a halt once the chain verifies again.
    pub fn clear_fault(&mut self) -> Result<()> {
        if let Some(fault) = self.verify_chain().fault {
            return Err(Error::ChainIntegrityViolated {
                index: fault.index,
                invariant: fault.invariant,
            });
        }
        if self.fault.take().is_some() {
            info!("Integrity fault cleared");
        }
        Ok(())
    }

    /// All sealed blocks.
    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    /// Blocks from `index` onward (federation pull).
    pub fn blocks_since(&self, index: u64) -> &[Block] {
        usize::try_from(index)
            .ok()
            .and_then(|start| self.chain.get(start..))
            .unwrap_or(&[])
    }

    /// Most recent block.
    pub fn latest_block(&self) -> Option<&Block> {
        self.chain.last()
    }

    /// Get block by index.
    pub fn block_by_index(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.chain.get(i))
    }

    /// Get block by hash.
    pub fn block_by_hash(&self, hash: &Hash256) -> Option<&Block> {
        self.chain.iter().find(|b| b.hash() == hash)
    }

    /// Sealed transactions concerning a provider, in chain order.
    pub fn transactions_by_provider(&self, provider_id: &str) -> Vec<&TransactionRecord> {
        self.chain
            .iter()
            .flat_map(|b| b.transactions.iter())
            .filter(|tx| tx.is_for_provider(provider_id))
            .collect()
    }

    /// Provider history with the block each change was sealed in.
    pub fn history(&self, provider_id: &str) -> Vec<HistoryEntry> {
        let mut history = Vec::new();
        for block in &self.chain {
            for tx in block.transactions.iter().filter(|tx| tx.is_for_provider(provider_id)) {
                history.push(HistoryEntry {
                    block_hash: *block.hash(),
                    block_index: block.index,
                    transaction_id: tx.id.clone(),
                    timestamp: tx.timestamp,
                    tx_type: tx.tx_type.clone(),
                    payload: tx.payload.clone(),
                });
            }
        }
        history
    }

    /// Merkle proof that a transaction is sealed in a block.
    pub fn inclusion_proof(
        &self,
        block_hash: &Hash256,
        content_hash: &Hash256,
    ) -> Option<MerkleProof> {
        self.block_by_hash(block_hash)?.inclusion_proof(content_hash)
    }

    /// Whether a transaction is provably sealed in a valid block.
    pub fn verify_record(&self, block_hash: &Hash256, content_hash: &Hash256) -> bool {
        let Some(block) = self.block_by_hash(block_hash) else {
            return false;
        };
        if !block.is_valid() {
            return false;
        }
        block
            .inclusion_proof(content_hash)
            .map(|proof| verify_inclusion(content_hash, &block.merkle_root, &proof))
            .unwrap_or(false)
    }

    /// Chain statistics, including a freshly computed validity flag.
    ///
    /// Cost is linear in chain length; frequent pollers should cache it.
    pub fn chain_info(&self) -> Result<ChainInfo> {
        let tip = self.tip()?;
        Ok(ChainInfo {
            length: self.chain.len(),
            latest_hash: *tip.hash(),
            latest_timestamp: tip.timestamp,
            total_transactions: self.chain.iter().map(Block::transaction_count).sum(),
            pending_count: self.pending.len(),
            genesis_hash: self.genesis_hash,
            difficulty: self.difficulty,
            is_valid: self.verify_chain().valid,
        })
    }
}
