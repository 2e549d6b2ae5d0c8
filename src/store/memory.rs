//! In-memory store, for tests and ephemeral nodes.

use crate::core::Result;
use crate::ledger::LedgerSnapshot;
use crate::store::backend::{ChainStore, StoreType};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Keeps the latest snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: RwLock<Option<LedgerSnapshot>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with a snapshot.
    pub fn with_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(Some(snapshot)),
        }
    }
}

#[async_trait]
impl ChainStore for MemoryStore {
    async fn load(&self) -> Result<Option<LedgerSnapshot>> {
        Ok(self.snapshot.read().await.clone())
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        *self.snapshot.write().await = Some(snapshot.clone());
        Ok(())
    }

    fn store_type(&self) -> StoreType {
        StoreType::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::Ledger;

    #[tokio::test]
    async fn test_empty_store_loads_none() {
        let store = MemoryStore::new();
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(store.store_type(), StoreType::Memory);
    }

    #[tokio::test]
    async fn test_save_replaces_snapshot() {
        let ledger = Ledger::new(LedgerConfig::for_testing(0)).unwrap();
        let store = MemoryStore::new();

        store.save(&ledger.snapshot()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, ledger.snapshot());
    }
}
