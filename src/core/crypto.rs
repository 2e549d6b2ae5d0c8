//! Hashing utilities.
//!
//! SHA3-256 digests and the canonical JSON encoding every ledger hash is
//! computed over.

use crate::core::Hash256;
use serde_json::Value;
use sha3::{Digest, Sha3_256};

/// Compute SHA3-256 hash of data.
pub fn sha3_256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash256::new(bytes)
}

/// Compute SHA3-256 hash of multiple data chunks.
pub fn sha3_256_multi(chunks: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha3_256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash256::new(bytes)
}

/// Truncated hex digest, used where only a one-way fingerprint is stored.
pub fn hex_digest_prefix(data: &[u8], len: usize) -> String {
    let mut hex = sha3_256(data).to_hex();
    hex.truncate(len);
    hex
}

/// Serialize a JSON value with object keys sorted at every depth.
///
/// Sorting is done here rather than relying on `serde_json::Map` ordering,
/// which changes if any crate in the build enables `preserve_order`.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA3-256 over the canonical JSON encoding of `value`.
pub fn canonical_hash(value: &Value) -> Hash256 {
    sha3_256(canonical_json(value).as_bytes())
}
