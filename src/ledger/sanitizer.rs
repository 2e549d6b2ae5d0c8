//! PII sanitization for ledger payloads.
//!
//! The ledger is replicated and never edited, so identifying data must not
//! reach it in the clear. Fields are either allowed through, replaced by a
//! truncated one-way digest, or dropped.

use crate::core::crypto::hex_digest_prefix;
use crate::ledger::transaction::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Which fields may enter the ledger and how.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerPolicy {
    /// Fields copied verbatim
    pub allowed_fields: BTreeSet<String>,
    /// Fields replaced by `<field>_hash`
    pub sensitive_fields: BTreeSet<String>,
    /// Hex characters kept from each digest
    pub digest_len: usize,
}

impl Default for SanitizerPolicy {
    fn default() -> Self {
        let allowed = [
            "registration_number",
            "provider_type",
            "specialization",
            "city",
            "state",
            "country",
            "status",
            "verification_results",
            "confidence_scores",
            "fraud_score",
        ];
        let sensitive = ["name", "email", "phone"];
        Self {
            allowed_fields: allowed.iter().map(|s| s.to_string()).collect(),
            sensitive_fields: sensitive.iter().map(|s| s.to_string()).collect(),
            digest_len: 16,
        }
    }
}

impl SanitizerPolicy {
    /// Allow an extra field through.
    pub fn allow(mut self, field: &str) -> Self {
        self.allowed_fields.insert(field.to_string());
        self
    }

    /// Treat an extra field as sensitive.
    pub fn hash(mut self, field: &str) -> Self {
        self.sensitive_fields.insert(field.to_string());
        self
    }
}

/// Applies a [`SanitizerPolicy`] to raw payloads.
#[derive(Clone, Debug, Default)]
pub struct Sanitizer {
    policy: SanitizerPolicy,
}

impl Sanitizer {
    /// Create a sanitizer for a policy.
    pub fn new(policy: SanitizerPolicy) -> Self {
        Self { policy }
    }

    /// The active policy.
    pub fn policy(&self) -> &SanitizerPolicy {
        &self.policy
    }

    /// Strip or hash PII from a raw payload.
    pub fn sanitize(&self, raw: &Payload) -> Payload {
        let mut sanitized = Payload::new();

        for (key, value) in raw {
            if self.policy.sensitive_fields.contains(key) {
                if value.is_null() {
                    continue;
                }
                sanitized.insert(format!("{}_hash", key), Value::String(self.digest(value)));
            } else if self.policy.allowed_fields.contains(key) {
                sanitized.insert(key.clone(), value.clone());
            }
        }

        sanitized
    }

    fn digest(&self, value: &Value) -> String {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        hex_digest_prefix(text.as_bytes(), self.policy.digest_len)
    }
}
