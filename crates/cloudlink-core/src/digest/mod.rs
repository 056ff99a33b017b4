//! Content-hash reconciliation engine.
//!
//! Neither side of the relation carries sequence numbers or timestamps;
//! whether an advertised state has been acted upon is decided purely by
//! comparing content hashes over the shared record. The digest here is a
//! SHA-256 over a canonical serialization of the *decoded* record:
//!
//! 1. every raw value is decoded per [`crate::record::decode_value`], so a
//!    JSON-encoded string and its structured equivalent hash identically;
//! 2. the decoded record is serialized with keys sorted at every nesting
//!    level (a `BTreeMap` at the top, `serde_json`'s sorted object maps
//!    below; the `preserve_order` feature must stay off);
//! 3. the bytes are hashed and hex-encoded.
//!
//! The digest is therefore invariant under key insertion order and under
//! at-least-once, reordered delivery of individual keys: it depends only on
//! the final converged content. An empty record hashes to the digest of
//! `{}`, never fails.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

use crate::record::{self, RawRecord};

/// Hex-encoded SHA-256 digest of one side's canonicalized record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// The digest as a lowercase hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ContentHash {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ContentHash {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Computes the content hash of a raw record.
#[must_use]
pub fn record_digest(record: &RawRecord) -> ContentHash {
    let decoded = record::decode_record(record);
    ContentHash(hex::encode(Sha256::digest(canonical_bytes(&decoded)).as_slice()))
}

/// Serializes a decoded record to its canonical byte form.
fn canonical_bytes(decoded: &BTreeMap<String, serde_json::Value>) -> Vec<u8> {
    // A string-keyed map of JSON values cannot fail to serialize.
    serde_json::to_vec(decoded).expect("canonical record serialization is infallible")
}

/// Whether a request differs from the hash recorded when it was last
/// completed. No stored hash means never completed, which counts as changed.
#[must_use]
pub fn has_changed(current: &ContentHash, stored: Option<&str>) -> bool {
    stored != Some(current.as_str())
}

/// Whether a completion map acknowledges `instance_id` at exactly the
/// expected hash. Absence and mismatch are both plain "no".
#[must_use]
pub fn is_acknowledged(
    completed: &BTreeMap<String, String>,
    instance_id: &str,
    expected: &ContentHash,
) -> bool {
    completed
        .get(instance_id)
        .is_some_and(|hash| expected == hash.as_str())
}

/// Hex encoding for digest output.
mod hex {
    use std::fmt::Write;

    pub(super) fn encode(bytes: &[u8]) -> String {
        bytes.iter().fold(
            String::with_capacity(bytes.len() * 2),
            |mut out, byte| {
                let _ = write!(out, "{byte:02x}");
                out
            },
        )
    }
}

#[cfg(test)]
mod tests;
