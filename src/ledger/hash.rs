//! Content Hashing
//!
//! Deterministic SHA-256 digests over canonical JSON serializations of
//! event payloads.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::LedgerError;

/// Lowercase hex SHA-256 of raw bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Serialize a payload to compact JSON with object keys sorted at every depth
pub fn canonical_json<T: Serialize + ?Sized>(payload: &T) -> Result<String, LedgerError> {
    let value = serde_json::to_value(payload)?;
    Ok(serde_json::to_string(&canonicalize(value))?)
}

/// Digest of the canonical serialization of `payload`
pub fn hash_payload<T: Serialize + ?Sized>(payload: &T) -> Result<String, LedgerError> {
    let canonical = canonical_json(payload)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));

            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
