// crates/criteriagate-core/src/core/hashing.rs
// ============================================================================
// Module: CriteriaGate Hashing
// Description: Canonical JSON serialization and content digests.
// Purpose: Derive stable idempotency keys, checkpoint fingerprints, and
//          canonical-text keys for review inheritance.
// Dependencies: serde_json, sha2
// ============================================================================

//! ## Overview
//! Hashing is used in three places: deriving an outbox idempotency key
//! suffix from a payload, fingerprinting a `PipelineState` checkpoint, and
//! computing a canonical-text key so re-extraction can match new criteria
//! against prior reviewer decisions.

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// A SHA-256 digest rendered as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashDigest([u8; 32]);

impl HashDigest {
    /// Returns the digest as a lowercase hex string.
    #[must_use]
    pub fn to_hex(self) -> String {
        self.0.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

impl std::fmt::Display for HashDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Errors raised while canonicalizing a value for hashing.
#[derive(Debug, thiserror::Error)]
pub enum HashingError {
    /// Serialization to JSON failed.
    #[error("failed to serialize value for hashing: {0}")]
    Serialize(String),
}

/// Serializes `value` to a canonical JSON form (sorted object keys, no
/// insignificant whitespace) suitable for hashing.
///
/// # Errors
///
/// Returns [`HashingError::Serialize`] when `value` cannot be serialized.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, HashingError> {
    let value = serde_json::to_value(value).map_err(|err| HashingError::Serialize(err.to_string()))?;
    let canonical = canonicalize(&value);
    serde_json::to_vec(&canonical).map_err(|err| HashingError::Serialize(err.to_string()))
}

/// Sorts object keys recursively so structurally equal values always
/// serialize identically regardless of field insertion order.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                if let Some(entry) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(entry));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Hashes raw bytes with SHA-256.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> HashDigest {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    HashDigest(out)
}

/// Canonicalizes `value` to JSON and hashes the result.
///
/// # Errors
///
/// Returns [`HashingError::Serialize`] when `value` cannot be serialized.
pub fn hash_canonical_json<T: Serialize>(value: &T) -> Result<HashDigest, HashingError> {
    Ok(hash_bytes(&canonical_json_bytes(value)?))
}

/// Normalizes criterion text into a canonical key used to match new criteria
/// against prior reviewer decisions across re-extractions.
///
/// # Invariants
/// - Case-insensitive, whitespace-collapsed; stable across re-extractions of
///   semantically identical text.
#[must_use]
pub fn canonical_text_key(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
