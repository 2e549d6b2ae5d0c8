//! Audited transaction records.
//!
//! A transaction is one change to a provider's verified data. Its content
//! hash is a pure function of its fields, so Merkle roots are reproducible
//! whenever a block is rebuilt from storage.

use crate::core::crypto::canonical_hash;
use crate::core::{canonical_timestamp, now, Error, Hash256, Result, Timestamp};
use crate::ledger::sanitizer::Sanitizer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Sanitized, key-ordered transaction payload.
pub type Payload = BTreeMap<String, Value>;

/// Kind of audited event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransactionType {
    /// Chain initialization (system event)
    Genesis,
    /// Provider attributes changed
    DataUpdate,
    /// Verification outcome recorded
    Verification,
    /// Fraud signal raised against a provider
    FraudFlag,
    /// Compliance exception granted or recorded
    ComplianceException,
    /// Provider first registered
    ProviderCreated,
    /// Duplicate provider records merged
    EntityMerge,
    /// Record received from a federated node
    FederationImport,
    /// Custom type
    Custom(String),
}

impl TransactionType {
    /// Stable wire name.
    pub fn as_str(&self) -> &str {
        match self {
            TransactionType::Genesis => "genesis",
            TransactionType::DataUpdate => "data_update",
            TransactionType::Verification => "verification",
            TransactionType::FraudFlag => "fraud_flag",
            TransactionType::ComplianceException => "compliance_exception",
            TransactionType::ProviderCreated => "provider_created",
            TransactionType::EntityMerge => "entity_merge",
            TransactionType::FederationImport => "federation_import",
            TransactionType::Custom(name) => name,
        }
    }

    /// System events are the only ones allowed without a provider.
    pub fn is_system(&self) -> bool {
        matches!(self, TransactionType::Genesis)
    }
}

impl From<String> for TransactionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "genesis" => TransactionType::Genesis,
            "data_update" => TransactionType::DataUpdate,
            "verification" => TransactionType::Verification,
            "fraud_flag" => TransactionType::FraudFlag,
            "compliance_exception" => TransactionType::ComplianceException,
            "provider_created" => TransactionType::ProviderCreated,
            "entity_merge" => TransactionType::EntityMerge,
            "federation_import" => TransactionType::FederationImport,
            _ => TransactionType::Custom(s),
        }
    }
}

impl From<&str> for TransactionType {
    fn from(s: &str) -> Self {
        TransactionType::from(s.to_string())
    }
}

impl From<TransactionType> for String {
    fn from(t: TransactionType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Buffered, not yet in a block
    Pending,
    /// Part of a block on the chain (terminal)
    Sealed,
}

/// Raw event as produced by a collaborator, before sanitization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawEvent {
    /// Event type
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Affected provider
    pub provider_id: Option<String>,
    /// Unsanitized fields
    #[serde(default)]
    pub fields: Payload,
    /// Actor that produced the event
    pub actor: String,
}

impl RawEvent {
    /// Create a new raw event.
    pub fn new(tx_type: impl Into<TransactionType>, provider_id: Option<&str>, actor: &str) -> Self {
        Self {
            tx_type: tx_type.into(),
            provider_id: provider_id.map(str::to_string),
            fields: Payload::new(),
            actor: actor.to_string(),
        }
    }

    /// Add a raw field.
    pub fn with_field(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.to_string(), v);
        }
        self
    }
}

/// One audited event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Globally unique ID
    pub id: String,
    /// Event type
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    /// Affected provider (None only for system events)
    pub provider_id: Option<String>,
    /// Sanitized payload
    pub payload: Payload,
    /// Actor identifier
    pub created_by: String,
    /// Creation time
    pub timestamp: Timestamp,
}

impl TransactionRecord {
    /// Create a validated record from an already-sanitized payload.
    pub fn create(
        tx_type: impl Into<TransactionType>,
        provider_id: Option<&str>,
        payload: Payload,
        actor: &str,
    ) -> Result<Self> {
        let record = Self {
            id: uuid::Uuid::new_v4().to_string(),
            tx_type: tx_type.into(),
            provider_id: provider_id.map(str::to_string),
            payload,
            created_by: actor.to_string(),
            timestamp: now(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Sanitize a raw event and turn it into a record.
    pub fn from_event(event: RawEvent, sanitizer: &Sanitizer) -> Result<Self> {
        let payload = sanitizer.sanitize(&event.fields);
        Self::create(
            event.tx_type,
            event.provider_id.as_deref(),
            payload,
            &event.actor,
        )
    }

    /// The system record that anchors a new chain.
    pub fn genesis(message: &str) -> Self {
        let mut payload = Payload::new();
        payload.insert("message".to_string(), Value::String(message.to_string()));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tx_type: TransactionType::Genesis,
            provider_id: None,
            payload,
            created_by: "system".to_string(),
            timestamp: now(),
        }
    }

    /// Check append-time requirements.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("transaction id is empty".into()));
        }
        if self.created_by.trim().is_empty() {
            return Err(Error::Validation("actor is empty".into()));
        }
        let has_provider = self
            .provider_id
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false);
        if !has_provider && !self.tx_type.is_system() {
            return Err(Error::Validation(format!(
                "provider_id is required for {} transactions",
                self.tx_type
            )));
        }
        Ok(())
    }

    /// Canonical JSON form hashed by `content_hash`.
    pub fn canonical_value(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.tx_type.as_str(),
            "provider_id": self.provider_id,
            "payload": self.payload,
            "created_by": self.created_by,
            "timestamp": canonical_timestamp(&self.timestamp),
        })
    }

    /// Hash of the canonical (sorted-key) serialization of every field.
    pub fn content_hash(&self) -> Hash256 {
        canonical_hash(&self.canonical_value())
    }

    /// Whether the record concerns `provider_id`.
    pub fn is_for_provider(&self, provider_id: &str) -> bool {
        self.provider_id.as_deref() == Some(provider_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(pairs: &[(&str, Value)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_create_record() {
        let record = TransactionRecord::create(
            TransactionType::DataUpdate,
            Some("P1"),
            payload(&[("city", json!("Mumbai"))]),
            "agentA",
        )
        .unwrap();

        assert_eq!(record.tx_type, TransactionType::DataUpdate);
        assert_eq!(record.provider_id.as_deref(), Some("P1"));
        assert_eq!(record.created_by, "agentA");
        assert!(uuid::Uuid::parse_str(&record.id).is_ok());
    }

    #[test]
    fn test_missing_provider_rejected() {
        let err = TransactionRecord::create("data_update", None, Payload::new(), "agentA")
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let blank = TransactionRecord::create("fraud_flag", Some("  "), Payload::new(), "agentA");
        assert!(blank.is_err());
    }

    #[test]
    fn test_genesis_allows_missing_provider() {
        let record = TransactionRecord::genesis("chain start");
        assert!(record.validate().is_ok());
        assert!(record.provider_id.is_none());
    }

    #[test]
    fn test_content_hash_deterministic() {
        let record = TransactionRecord::create(
            "verification",
            Some("P7"),
            payload(&[("status", json!("verified"))]),
            "agentB",
        )
        .unwrap();
        assert_eq!(record.content_hash(), record.clone().content_hash());
    }

    #[test]
    fn test_content_hash_ignores_insertion_order() {
        let base = TransactionRecord::genesis("x");

        let mut a = base.clone();
        a.payload = Payload::new();
        a.payload.insert("zeta".into(), json!({"b": 1, "a": 2}));
        a.payload.insert("alpha".into(), json!("first"));

        let mut nested = serde_json::Map::new();
        nested.insert("a".into(), json!(2));
        nested.insert("b".into(), json!(1));
        let mut b = base;
        b.payload = Payload::new();
        b.payload.insert("alpha".into(), json!("first"));
        b.payload.insert("zeta".into(), Value::Object(nested));

        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_changes_on_modification() {
        let record = TransactionRecord::create(
            "data_update",
            Some("P1"),
            payload(&[("city", json!("Mumbai"))]),
            "agentA",
        )
        .unwrap();
        let mut changed = record.clone();
        changed
            .payload
            .insert("city".to_string(), json!("Pune"));
        assert_ne!(record.content_hash(), changed.content_hash());
    }

    #[test]
    fn test_content_hash_survives_json_roundtrip() {
        let record = TransactionRecord::create(
            "fraud_flag",
            Some("P3"),
            payload(&[("fraud_score", json!(0.82))]),
            "scorer",
        )
        .unwrap();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: TransactionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.content_hash(), record.content_hash());
        assert!(json.contains("\"type\":\"fraud_flag\""));
    }

    #[test]
    fn test_transaction_type_names() {
        assert_eq!(TransactionType::from("compliance_exception"), TransactionType::ComplianceException);
        assert_eq!(
            TransactionType::from("license_renewal"),
            TransactionType::Custom("license_renewal".into())
        );
        assert_eq!(TransactionType::Custom("x".into()).to_string(), "x");
        assert!(TransactionType::Genesis.is_system());
        assert!(!TransactionType::DataUpdate.is_system());
    }

    #[test]
    fn test_from_event_sanitizes() {
        let event = RawEvent::new("data_update", Some("P1"), "agentA")
            .with_field("city", "Mumbai")
            .with_field("email", "dr@example.org")
            .with_field("internal_note", "drop me");

        let record = TransactionRecord::from_event(event, &Sanitizer::default()).unwrap();
        assert_eq!(record.payload.get("city"), Some(&json!("Mumbai")));
        assert!(record.payload.contains_key("email_hash"));
        assert!(!record.payload.contains_key("email"));
        assert!(!record.payload.contains_key("internal_note"));
    }
}
