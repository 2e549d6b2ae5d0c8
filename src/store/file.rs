//! JSON file store.
//!
//! Writes go to a sibling temp file which is then renamed over the target,
//! so a crash mid-write leaves the previous snapshot intact.

use crate::core::Result;
use crate::ledger::LedgerSnapshot;
use crate::store::backend::{ChainStore, StoreType};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Snapshot persisted as a single JSON document.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ChainStore for JsonFileStore {
    async fn load(&self) -> Result<Option<LedgerSnapshot>> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: LedgerSnapshot = serde_json::from_str(&text)?;
        debug!(path = %self.path.display(), blocks = snapshot.blocks.len(), "Snapshot loaded");
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &LedgerSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();
        fs::write(&temp, json).await?;
        fs::rename(&temp, &self.path).await?;
        debug!(path = %self.path.display(), blocks = snapshot.blocks.len(), "Snapshot saved");
        Ok(())
    }

    fn store_type(&self) -> StoreType {
        StoreType::JsonFile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::core::Error;
    use crate::ledger::{Ledger, RawEvent};

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("ledger.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("ledger.json"));

        let mut ledger = Ledger::new(LedgerConfig::for_testing(1)).unwrap();
        ledger
            .record_event(RawEvent::new("data_update", Some("P1"), "agentA").with_field("city", "Mumbai"))
            .unwrap();
        ledger.seal_pending_block().unwrap();

        store.save(&ledger.snapshot()).await.unwrap();
        assert!(!store.temp_path().exists());

        let snapshot = store.load().await.unwrap().unwrap();
        let restored = Ledger::from_snapshot(snapshot, LedgerConfig::for_testing(1)).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.history("P1").len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = JsonFileStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, Error::SerializationError(_)));
    }
}
