//! Shared async handle to the ledger.
//!
//! Appends and reads take the ledger lock briefly. Sealing snapshots the
//! pending buffer under the lock, mines on the blocking pool with no lock
//! held, then commits under the lock again, so appends never wait on
//! proof-of-work.

use crate::config::LedgerConfig;
use crate::core::{Error, Hash256, Result};
use crate::ledger::{
    Block, ChainInfo, ChainVerification, HistoryEntry, Ledger, MerkleProof, PendingAck, RawEvent,
    SealPolicy, SealedBlock, TransactionRecord,
};
use crate::store::{ChainStore, JsonFileStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock, RwLockReadGuard};
use tracing::{debug, error, info};

struct Inner {
    ledger: RwLock<Ledger>,
    /// Serializes sealers; held across mining
    seal_lock: Mutex<()>,
    /// Wakes the seal worker
    seal_wanted: Notify,
    seal_threshold: usize,
    store: Option<Arc<dyn ChainStore>>,
    /// Set while the store lags the chain
    unsaved: AtomicBool,
}

/// Cloneable handle shared by every collaborator.
#[derive(Clone)]
pub struct ProvenanceService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ProvenanceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvenanceService")
            .field("seal_threshold", &self.inner.seal_threshold)
            .field("store", &self.inner.store.as_ref().map(|s| s.store_type()))
            .finish()
    }
}

impl ProvenanceService {
    /// Create a service over a fresh, unpersisted ledger.
    pub fn new(config: LedgerConfig) -> Result<Self> {
        let threshold = config.worker.seal_threshold;
        let ledger = Ledger::new(config)?;
        Ok(Self::from_parts(ledger, threshold, None))
    }

    /// Load and verify the stored ledger, or start a fresh one if the store
    /// is empty.
    pub async fn open(config: LedgerConfig, store: Arc<dyn ChainStore>) -> Result<Self> {
        let threshold = config.worker.seal_threshold;
        let ledger = match store.load().await? {
            Some(snapshot) => {
                let ledger = Ledger::from_snapshot(snapshot, config)?;
                info!(
                    store = %store.store_type(),
                    length = ledger.len(),
                    "Ledger loaded from store"
                );
                ledger
            }
            None => {
                let ledger = Ledger::new(config)?;
                store.save(&ledger.snapshot()).await?;
                info!(store = %store.store_type(), "New ledger created");
                ledger
            }
        };
        Ok(Self::from_parts(ledger, threshold, Some(store)))
    }

    /// Open the ledger described by `config`: backed by a JSON file when
    /// `store_path` is set, unpersisted otherwise.
    pub async fn open_configured(config: LedgerConfig) -> Result<Self> {
        match config.store_path.clone() {
            Some(path) => Self::open(config, Arc::new(JsonFileStore::new(path))).await,
            None => Self::new(config),
        }
    }

    fn from_parts(ledger: Ledger, seal_threshold: usize, store: Option<Arc<dyn ChainStore>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                ledger: RwLock::new(ledger),
                seal_lock: Mutex::new(()),
                seal_wanted: Notify::new(),
                seal_threshold: seal_threshold.max(1),
                store,
                unsaved: AtomicBool::new(false),
            }),
        }
    }

    /// Read access to the underlying ledger.
    pub async fn ledger(&self) -> RwLockReadGuard<'_, Ledger> {
        self.inner.ledger.read().await
    }

    /// Sanitize and buffer a raw event.
    pub async fn append(&self, event: RawEvent) -> Result<PendingAck> {
        let ack = self.inner.ledger.write().await.record_event(event)?;
        self.maybe_wake_sealer(&ack);
        Ok(ack)
    }

    /// Buffer an already-sanitized transaction.
    pub async fn append_transaction(&self, tx: TransactionRecord) -> Result<PendingAck> {
        let ack = self.inner.ledger.write().await.append_transaction(tx)?;
        self.maybe_wake_sealer(&ack);
        Ok(ack)
    }

    fn maybe_wake_sealer(&self, ack: &PendingAck) {
        if ack.pending_count >= self.inner.seal_threshold {
            self.inner.seal_wanted.notify_one();
        }
    }

    /// Resolves when enough transactions are pending to seal.
    pub(crate) async fn seal_wanted(&self) {
        self.inner.seal_wanted.notified().await
    }

    /// Seal all pending transactions into a block.
    ///
    /// Returns `None` when nothing is pending. On `SealExhausted` the
    /// transactions stay pending and the caller may retry.
    ///
    /// The seal runs on its own task, so dropping this future does not
    /// abandon the job: it still commits, or re-queues its transactions.
    /// `Error::NotPersisted` means the block is on the chain but the store
    /// rejected the snapshot; retry with [`persist`](Self::persist).
    pub async fn request_seal(&self) -> Result<Option<SealedBlock>> {
        let service = self.clone();
        tokio::spawn(async move { service.run_seal().await })
            .await
            .map_err(|e| Error::Internal(format!("seal task failed: {}", e)))?
    }

    async fn run_seal(&self) -> Result<Option<SealedBlock>> {
        let _sealer = self.inner.seal_lock.lock().await;

        let (job, policy) = {
            let mut ledger = self.inner.ledger.write().await;
            match ledger.begin_seal()? {
                Some(job) => (job, ledger.seal_policy().clone()),
                None => return Ok(None),
            }
        };
        // Restored if the mining task dies before handing the job back.
        let fallback = job.clone();

        let mined = tokio::task::spawn_blocking(move || {
            let mut job = job;
            let result = job.mine(&policy);
            (job, result)
        })
        .await;

        let sealed = {
            let mut ledger = self.inner.ledger.write().await;
            match mined {
                Ok((job, Ok(outcome))) => {
                    let sealed = ledger.commit_seal(job)?;
                    debug!(
                        index = sealed.index,
                        attempts = outcome.attempts,
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        "Seal committed"
                    );
                    sealed
                }
                Ok((job, Err(e))) => {
                    ledger.abort_seal(job);
                    return Err(e);
                }
                Err(e) => {
                    error!(index = fallback.index(), error = %e, "Mining task failed");
                    ledger.abort_seal(fallback);
                    return Err(Error::Internal(format!("mining task failed: {}", e)));
                }
            }
        };

        self.persist_committed(sealed.index).await?;
        Ok(Some(sealed))
    }

    /// Save a snapshot to the configured store. No-op without a store.
    pub async fn persist(&self) -> Result<()> {
        let Some(store) = &self.inner.store else {
            return Ok(());
        };
        let snapshot = self.inner.ledger.read().await.snapshot();
        store.save(&snapshot).await?;
        self.inner.unsaved.store(false, Ordering::Release);
        Ok(())
    }

    async fn persist_committed(&self, index: u64) -> Result<()> {
        if let Err(e) = self.persist().await {
            self.inner.unsaved.store(true, Ordering::Release);
            error!(index, error = %e, "Committed block not persisted");
            return Err(Error::NotPersisted {
                index,
                reason: e.to_string(),
            });
        }
        Ok(())
    }

    /// Whether committed blocks are missing from the store.
    pub fn has_unsaved_changes(&self) -> bool {
        self.inner.unsaved.load(Ordering::Acquire)
    }

    /// Append a block sealed by another node.
    pub async fn import_block(&self, block: Block) -> Result<SealedBlock> {
        let sealed = self.inner.ledger.write().await.import_block(block)?;
        self.persist_committed(sealed.index).await?;
        Ok(sealed)
    }

    /// Blocks from `index` onward.
    pub async fn blocks_since(&self, index: u64) -> Vec<Block> {
        self.inner.ledger.read().await.blocks_since(index).to_vec()
    }

    /// Change the difficulty for subsequent seals.
    pub async fn set_difficulty(&self, difficulty: u32) -> Result<()> {
        self.inner.ledger.write().await.set_difficulty(difficulty)
    }

    /// Replace the proof-of-work bounds for subsequent seals.
    pub async fn set_seal_policy(&self, policy: SealPolicy) {
        self.inner.ledger.write().await.set_seal_policy(policy)
    }

    pub async fn chain_info(&self) -> Result<ChainInfo> {
        self.inner.ledger.read().await.chain_info()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.ledger.read().await.pending().len()
    }

    pub async fn verify_chain(&self) -> ChainVerification {
        self.inner.ledger.read().await.verify_chain()
    }

    /// Verify and halt the ledger on failure.
    pub async fn enforce_integrity(&self) -> Result<ChainVerification> {
        self.inner.ledger.write().await.enforce_integrity()
    }

    /// Lift a halt once the chain verifies again.
    pub async fn clear_fault(&self) -> Result<()> {
        self.inner.ledger.write().await.clear_fault()
    }

    pub async fn history(&self, provider_id: &str) -> Vec<HistoryEntry> {
        self.inner.ledger.read().await.history(provider_id)
    }

    pub async fn transactions_by_provider(&self, provider_id: &str) -> Vec<TransactionRecord> {
        self.inner
            .ledger
            .read()
            .await
            .transactions_by_provider(provider_id)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn block_by_hash(&self, hash: &Hash256) -> Option<Block> {
        self.inner.ledger.read().await.block_by_hash(hash).cloned()
    }

    pub async fn block_by_index(&self, index: u64) -> Option<Block> {
        self.inner.ledger.read().await.block_by_index(index).cloned()
    }

    pub async fn latest_block(&self) -> Option<Block> {
        self.inner.ledger.read().await.latest_block().cloned()
    }

    pub async fn verify_record(&self, block_hash: &Hash256, content_hash: &Hash256) -> bool {
        self.inner.ledger.read().await.verify_record(block_hash, content_hash)
    }

    pub async fn inclusion_proof(
        &self,
        block_hash: &Hash256,
        content_hash: &Hash256,
    ) -> Option<MerkleProof> {
        self.inner
            .ledger
            .read()
            .await
            .inclusion_proof(block_hash, content_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerSnapshot, TransactionType};
    use crate::store::{MemoryStore, StoreType};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    /// Memory store whose saves can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl ChainStore for FlakyStore {
        async fn load(&self) -> Result<Option<LedgerSnapshot>> {
            self.inner.load().await
        }

        async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.inner.save(snapshot).await
        }

        fn store_type(&self) -> StoreType {
            StoreType::Memory
        }
    }

    fn event(provider: &str, city: &str) -> RawEvent {
        RawEvent::new("data_update", Some(provider), "agentA").with_field("city", city)
    }

    #[tokio::test]
    async fn test_append_and_seal() {
        let service = ProvenanceService::new(LedgerConfig::for_testing(2)).unwrap();

        let ack = service.append(event("P1", "Mumbai")).await.unwrap();
        assert_eq!(ack.pending_count, 1);
        assert_eq!(service.pending_count().await, 1);

        let sealed = service.request_seal().await.unwrap().unwrap();
        assert_eq!(sealed.index, 1);
        assert!(sealed.hash.to_hex().starts_with("00"));
        assert_eq!(service.pending_count().await, 0);

        assert!(service.verify_record(&sealed.hash, &ack.content_hash).await);
        let history = service.history("P1").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tx_type, TransactionType::DataUpdate);
        assert_eq!(history[0].payload.get("city"), Some(&json!("Mumbai")));

        assert!(service.request_seal().await.unwrap().is_none());
        assert!(service.chain_info().await.unwrap().is_valid);
    }

    #[tokio::test]
    async fn test_appends_proceed_while_mining() {
        let service = ProvenanceService::new(LedgerConfig::for_testing(3)).unwrap();
        service.append(event("P1", "A")).await.unwrap();

        let sealer = service.clone();
        let seal = tokio::spawn(async move { sealer.request_seal().await });
        service.append(event("P2", "B")).await.unwrap();

        let sealed = seal.await.unwrap().unwrap().unwrap();
        let info = service.chain_info().await.unwrap();
        assert_eq!(sealed.transaction_count + info.pending_count, 2);
        assert_eq!(info.length, 2);
    }

    #[tokio::test]
    async fn test_exhausted_seal_keeps_transactions() {
        let service = ProvenanceService::new(LedgerConfig::for_testing(0)).unwrap();
        service.set_difficulty(16).await.unwrap();
        service.set_seal_policy(SealPolicy::bounded(8)).await;
        let ack = service.append(event("P1", "A")).await.unwrap();

        let err = service.request_seal().await.unwrap_err();
        assert!(matches!(err, Error::SealExhausted { .. }));

        let ledger = service.ledger().await;
        assert_eq!(ledger.pending()[0].id, ack.transaction_id);
        assert!(!ledger.is_sealing());
    }

    #[tokio::test]
    async fn test_open_creates_then_reloads() {
        let store = Arc::new(MemoryStore::new());

        let service = ProvenanceService::open(LedgerConfig::for_testing(1), store.clone())
            .await
            .unwrap();
        service.append(event("P1", "Mumbai")).await.unwrap();
        let sealed = service.request_seal().await.unwrap().unwrap();

        let reopened = ProvenanceService::open(LedgerConfig::for_testing(1), store.clone())
            .await
            .unwrap();
        let info = reopened.chain_info().await.unwrap();
        assert_eq!(info.length, 2);
        assert_eq!(info.latest_hash, sealed.hash);
        assert!(reopened.block_by_hash(&sealed.hash).await.is_some());
    }

    #[tokio::test]
    async fn test_open_rejects_tampered_store() {
        let mut ledger = Ledger::new(LedgerConfig::for_testing(1)).unwrap();
        ledger.record_event(event("P1", "A")).unwrap();
        ledger.seal_pending_block().unwrap();

        let mut snapshot: LedgerSnapshot = ledger.snapshot();
        snapshot.blocks[1].previous_hash = Hash256::new([4u8; 32]);
        let store = Arc::new(MemoryStore::with_snapshot(snapshot));

        let err = ProvenanceService::open(LedgerConfig::for_testing(1), store)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ChainIntegrityViolated { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_seal_requeues_and_unblocks() {
        let service = ProvenanceService::new(LedgerConfig::for_testing(0)).unwrap();
        service.set_difficulty(16).await.unwrap();
        service.set_seal_policy(SealPolicy::bounded(200_000)).await;
        let ack = service.append(event("P1", "A")).await.unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(5), service.request_seal()).await;
        assert!(cancelled.is_err());

        let mut settled = false;
        for _ in 0..1000 {
            if !service.ledger().await.is_sealing() {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled);
        assert_eq!(service.ledger().await.pending()[0].id, ack.transaction_id);

        service.set_difficulty(0).await.unwrap();
        let sealed = service.request_seal().await.unwrap().unwrap();
        assert_eq!(sealed.transaction_count, 1);
        assert!(service.verify_record(&sealed.hash, &ack.content_hash).await);
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported() {
        let store = Arc::new(FlakyStore::default());
        let service = ProvenanceService::open(LedgerConfig::for_testing(0), store.clone())
            .await
            .unwrap();
        assert!(!service.has_unsaved_changes());

        store.failing.store(true, Ordering::SeqCst);
        service.append(event("P1", "A")).await.unwrap();
        let err = service.request_seal().await.unwrap_err();
        assert!(matches!(err, Error::NotPersisted { index: 1, .. }));
        assert!(service.has_unsaved_changes());
        // The block itself is committed.
        assert_eq!(service.chain_info().await.unwrap().length, 2);

        store.failing.store(false, Ordering::SeqCst);
        service.persist().await.unwrap();
        assert!(!service.has_unsaved_changes());
        assert_eq!(store.load().await.unwrap().unwrap().blocks.len(), 2);
    }

    #[tokio::test]
    async fn test_open_configured_uses_store_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let config = LedgerConfig {
            store_path: Some(path.clone()),
            ..LedgerConfig::for_testing(1)
        };

        let service = ProvenanceService::open_configured(config.clone()).await.unwrap();
        service.append(event("P1", "Mumbai")).await.unwrap();
        service.request_seal().await.unwrap();
        assert!(path.exists());

        let reopened = ProvenanceService::open_configured(config).await.unwrap();
        assert_eq!(reopened.chain_info().await.unwrap().length, 2);
        assert_eq!(reopened.history("P1").await.len(), 1);

        let unpersisted = ProvenanceService::open_configured(LedgerConfig::for_testing(0))
            .await
            .unwrap();
        assert_eq!(unpersisted.chain_info().await.unwrap().length, 1);
    }

    #[tokio::test]
    async fn test_import_between_services() {
        let source = ProvenanceService::new(LedgerConfig::for_testing(1)).unwrap();
        source.append(event("P1", "A")).await.unwrap();
        source.request_seal().await.unwrap();

        let genesis = source.block_by_index(0).await.unwrap();
        let replica_ledger = Ledger::from_snapshot(
            LedgerSnapshot {
                genesis_hash: Hash256::zero(),
                difficulty: 1,
                blocks: vec![genesis],
                pending: Vec::new(),
            },
            LedgerConfig::for_testing(1),
        )
        .unwrap();
        let replica = ProvenanceService::from_parts(replica_ledger, 1, None);

        for block in source.blocks_since(1).await {
            replica.import_block(block).await.unwrap();
        }
        assert_eq!(replica.history("P1").await.len(), 1);
        assert!(replica.verify_chain().await.valid);
    }
}
