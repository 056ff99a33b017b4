//! Raw transport records and the JSON value boundary.
//!
//! The delivery substrate stores each side's published data as a flat
//! string-to-string mapping per relation. Structured values (tag maps,
//! capability flags, pattern lists) are JSON-encoded *inside* those strings.
//! This module is the only place that encoding is crossed: everything above
//! it (the digest engine, the provider's request accessors) works on decoded
//! [`serde_json::Value`]s, never on raw encoded strings.
//!
//! Decoding is total: a string that fails to parse as JSON degrades to
//! `Value::String` of the raw bytes, so hashing and enumeration never fail
//! on unexpected peer data.

use std::collections::BTreeMap;

use serde_json::Value;

/// One side's published mapping for one relation, exactly as the transport
/// stores it.
pub type RawRecord = BTreeMap<String, String>;

/// Well-known keys of the published record schema.
pub mod keys {
    /// Requirer identity: the cloud instance identifier (raw string).
    pub const INSTANCE_ID: &str = "instance-id";
    /// Requirer identity: the region derived from the availability zone
    /// (raw string).
    pub const REGION: &str = "region";
    /// Tag names and nullable values to apply to the instance (JSON object).
    pub const INSTANCE_TAGS: &str = "instance-tags";
    /// Tags for the instance's machine-specific security group (JSON object).
    pub const INSTANCE_SECURITY_GROUP_TAGS: &str = "instance-security-group-tags";
    /// Tags for the instance's subnet (JSON object).
    pub const INSTANCE_SUBNET_TAGS: &str = "instance-subnet-tags";
    /// Marker that at least one capability request has been made
    /// (literal `"true"`).
    pub const REQUESTED: &str = "requested";
    /// Provider acknowledgement map: instance id to content hash
    /// (JSON object).
    pub const COMPLETED: &str = "completed";
}

/// Decodes one raw transport value.
///
/// Falls back to treating the input as an opaque string when it is not
/// valid JSON. `instance-id` and `region` are published unencoded, so they
/// take this path by design; so does malformed peer data.
#[must_use]
pub fn decode_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// Encodes a structured value for publication into a raw record.
#[must_use]
pub fn encode_value(value: &Value) -> String {
    value.to_string()
}

/// Decodes every value of a raw record.
///
/// The result is the canonical structured view used for hashing and for the
/// provider-side accessors.
#[must_use]
pub fn decode_record(record: &RawRecord) -> BTreeMap<String, Value> {
    record
        .iter()
        .map(|(key, raw)| (key.clone(), decode_value(raw)))
        .collect()
}

/// Extracts the provider's `completed` acknowledgement map from a record.
///
/// Absence, malformed JSON, and non-object values all yield an empty map;
/// non-string hash entries are skipped. Consumers treat an empty map as
/// "nothing acknowledged yet", never as an error.
#[must_use]
pub fn decode_completed(record: &RawRecord) -> BTreeMap<String, String> {
    let Some(raw) = record.get(keys::COMPLETED) else {
        return BTreeMap::new();
    };
    match decode_value(raw) {
        Value::Object(entries) => entries
            .into_iter()
            .filter_map(|(instance_id, hash)| match hash {
                Value::String(hash) => Some((instance_id, hash)),
                _ => None,
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}
