//! ChainStore trait definition.

use crate::core::Result;
use crate::ledger::LedgerSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Store type identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreType {
    /// Snapshot kept in process memory
    Memory,
    /// Snapshot written as a JSON file
    JsonFile,
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreType::Memory => write!(f, "memory"),
            StoreType::JsonFile => write!(f, "json_file"),
        }
    }
}

/// Durable home for a ledger snapshot.
///
/// A snapshot returned by `load` is untrusted input; callers rebuild it
/// through `Ledger::from_snapshot`, which replays verification.
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Load the last saved snapshot, `None` if nothing was saved yet.
    async fn load(&self) -> Result<Option<LedgerSnapshot>>;

    /// Replace the stored snapshot.
    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()>;

    /// Get the store type.
    fn store_type(&self) -> StoreType;
}
