//! Ledger configuration.
//!
//! Loaded once at process start (JSON file and/or environment) and handed to
//! the ledger and service constructors. Validation failures here are
//! setup-time fatal errors.

use crate::core::{Error, Hash256, Result};
use crate::ledger::block::SealPolicy;
use crate::ledger::sanitizer::SanitizerPolicy;
use crate::monitoring::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Highest difficulty accepted from configuration.
pub const MAX_DIFFICULTY: u32 = 16;

/// Genesis seed used when none is configured.
pub const DEFAULT_GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Top-level ledger configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Hex seed the genesis block links to
    pub genesis_hash: String,
    /// Leading hex zeros required of new blocks
    pub difficulty: u32,
    /// Proof-of-work bounds
    pub seal: SealConfig,
    /// PII policy for incoming events
    pub sanitizer: SanitizerPolicy,
    /// Background sealing
    pub worker: WorkerConfig,
    /// Snapshot file for the JSON store
    pub store_path: Option<PathBuf>,
    /// Subscriber settings
    pub log: LogConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            genesis_hash: DEFAULT_GENESIS_HASH.to_string(),
            difficulty: 2,
            seal: SealConfig::default(),
            sanitizer: SanitizerPolicy::default(),
            worker: WorkerConfig::default(),
            store_path: None,
            log: LogConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Config with cheap proof-of-work for tests and demos.
    pub fn for_testing(difficulty: u32) -> Self {
        Self {
            difficulty,
            seal: SealConfig {
                max_attempts: Some(10_000_000),
                timeout_ms: None,
            },
            worker: WorkerConfig {
                seal_interval_ms: 50,
                retry_delay_ms: 10,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Parse from a JSON document; missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Apply `LEDGER_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(hash) = lookup("LEDGER_GENESIS_HASH") {
            self.genesis_hash = hash;
        }
        if let Some(d) = lookup("LEDGER_DIFFICULTY") {
            self.difficulty = parse_env("LEDGER_DIFFICULTY", &d)?;
        }
        if let Some(n) = lookup("LEDGER_SEAL_MAX_ATTEMPTS") {
            self.seal.max_attempts = Some(parse_env("LEDGER_SEAL_MAX_ATTEMPTS", &n)?);
        }
        if let Some(ms) = lookup("LEDGER_SEAL_TIMEOUT_MS") {
            self.seal.timeout_ms = Some(parse_env("LEDGER_SEAL_TIMEOUT_MS", &ms)?);
        }
        if let Some(path) = lookup("LEDGER_STORE_PATH") {
            self.store_path = Some(PathBuf::from(path));
        }
        if let Some(level) = lookup("LEDGER_LOG_LEVEL") {
            self.log.level = level.parse()?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check the values a ledger cannot start without.
    pub fn validate(&self) -> Result<()> {
        self.genesis_hash()?;
        validate_difficulty(self.difficulty)?;
        if self.seal.max_attempts == Some(0) {
            return Err(Error::InvalidConfig("seal.max_attempts must be positive".into()));
        }
        if self.worker.seal_threshold == 0 {
            return Err(Error::InvalidConfig("worker.seal_threshold must be positive".into()));
        }
        Ok(())
    }

    /// Parsed genesis seed.
    pub fn genesis_hash(&self) -> Result<Hash256> {
        Hash256::from_hex(&self.genesis_hash).map_err(|e| {
            Error::InvalidConfig(format!(
                "genesis_hash must be 64 hex characters: {}",
                e
            ))
        })
    }
}

/// Reject difficulties that would stall sealing indefinitely.
pub fn validate_difficulty(difficulty: u32) -> Result<()> {
    if difficulty > MAX_DIFFICULTY {
        return Err(Error::InvalidConfig(format!(
            "difficulty {} exceeds maximum {}",
            difficulty, MAX_DIFFICULTY
        )));
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} has invalid value {:?}", key, value)))
}

/// Proof-of-work bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    /// Hash attempts before a seal gives up
    pub max_attempts: Option<u64>,
    /// Milliseconds before a seal gives up
    pub timeout_ms: Option<u64>,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(50_000_000),
            timeout_ms: Some(60_000),
        }
    }
}

impl SealConfig {
    /// Policy handed to `Block::seal`.
    pub fn policy(&self) -> SealPolicy {
        SealPolicy {
            max_attempts: self.max_attempts,
            timeout: self.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Background sealing worker settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Periodic seal tick
    pub seal_interval_ms: u64,
    /// Pending count that triggers an immediate seal
    pub seal_threshold: usize,
    /// Retries after an exhausted seal before escalating
    pub max_retries: u32,
    /// Delay between retries
    pub retry_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            seal_interval_ms: 5_000,
            seal_threshold: 1,
            max_retries: 3,
            retry_delay_ms: 250,
        }
    }
}

impl WorkerConfig {
    pub fn seal_interval(&self) -> Duration {
        Duration::from_millis(self.seal_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert_eq!(config.genesis_hash.len(), 64);
        assert_eq!(config.difficulty, 2);
        assert!(config.validate().is_ok());
        assert_eq!(config.genesis_hash().unwrap(), Hash256::zero());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = LedgerConfig::from_json_str(r#"{"difficulty": 3, "seal": {"timeout_ms": 10}}"#)
            .unwrap();
        assert_eq!(config.difficulty, 3);
        assert_eq!(config.seal.timeout_ms, Some(10));
        assert_eq!(config.seal.max_attempts, Some(50_000_000));
        assert_eq!(config.worker, WorkerConfig::default());
    }

    #[test]
    fn test_invalid_genesis_hash() {
        let config = LedgerConfig {
            genesis_hash: "abc".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_difficulty() {
        let config = LedgerConfig {
            difficulty: MAX_DIFFICULTY + 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("LEDGER_DIFFICULTY", "1"),
            ("LEDGER_SEAL_MAX_ATTEMPTS", "1000"),
            ("LEDGER_STORE_PATH", "/tmp/ledger.json"),
            ("LEDGER_LOG_LEVEL", "debug"),
        ]);
        let config = LedgerConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.difficulty, 1);
        assert_eq!(config.seal.max_attempts, Some(1000));
        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/ledger.json")));
        assert_eq!(config.log.level, crate::monitoring::LogLevel::Debug);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let result = LedgerConfig::default()
            .with_overrides(|k| (k == "LEDGER_DIFFICULTY").then(|| "two".to_string()));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_seal_policy_from_config() {
        let policy = SealConfig {
            max_attempts: Some(5),
            timeout_ms: Some(20),
        }
        .policy();
        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(policy.timeout, Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, r#"{"difficulty": 1}"#).unwrap();
        assert_eq!(LedgerConfig::from_file(&path).unwrap().difficulty, 1);
    }
}
