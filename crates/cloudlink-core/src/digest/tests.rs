//! Property and unit tests for the content-hash engine.
//!
//! These verify the laws the reconciliation protocol leans on:
//! - determinism and insertion-order invariance;
//! - encoding invariance (hashing sees decoded values, not raw strings);
//! - sensitivity to any decoded-value change;
//! - total behavior on empty and malformed records.

use proptest::prelude::*;

use super::*;
use crate::record::RawRecord;

fn record_from(pairs: &[(&str, &str)]) -> RawRecord {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

#[test]
fn empty_record_hashes_to_empty_object_digest() {
    let digest = record_digest(&RawRecord::new());
    // SHA-256 of "{}"
    assert_eq!(
        digest.as_str(),
        "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
    );
}

#[test]
fn digest_is_deterministic() {
    let record = record_from(&[("instance-id", "i-123"), ("enable-dns-management", "true")]);
    assert_eq!(record_digest(&record), record_digest(&record));
}

#[test]
fn digest_ignores_raw_json_whitespace() {
    let compact = record_from(&[("instance-tags", r#"{"env":"prod","owner":null}"#)]);
    let spaced = record_from(&[("instance-tags", r#"{ "owner": null , "env": "prod" }"#)]);
    assert_eq!(record_digest(&compact), record_digest(&spaced));
}

#[test]
fn digest_survives_malformed_json() {
    let record = record_from(&[("instance-tags", "{definitely not json")]);
    // must not panic, and must differ from the empty record
    assert_ne!(record_digest(&record), record_digest(&RawRecord::new()));
}

#[test]
fn acknowledgement_requires_exact_hash() {
    let record = record_from(&[("instance-id", "i-123")]);
    let expected = record_digest(&record);

    let mut completed = std::collections::BTreeMap::new();
    assert!(!is_acknowledged(&completed, "i-123", &expected));

    completed.insert("i-123".to_owned(), "deadbeef".to_owned());
    assert!(!is_acknowledged(&completed, "i-123", &expected));

    completed.insert("i-123".to_owned(), expected.as_str().to_owned());
    assert!(is_acknowledged(&completed, "i-123", &expected));
    assert!(!is_acknowledged(&completed, "i-456", &expected));
}

#[test]
fn change_detection_treats_missing_hash_as_changed() {
    let digest = record_digest(&record_from(&[("instance-id", "i-123")]));
    assert!(has_changed(&digest, None));
    assert!(has_changed(&digest, Some("deadbeef")));
    assert!(!has_changed(&digest, Some(digest.as_str())));
}

fn arb_key() -> impl Strategy<Value = String> {
    "[a-z]{1,8}(-[a-z]{1,8})?"
}

fn arb_raw_value() -> impl Strategy<Value = String> {
    prop_oneof![
        // raw, non-JSON strings (the instance-id/region path)
        "[a-z0-9 -]{0,12}",
        // JSON scalars
        Just("true".to_owned()),
        Just("null".to_owned()),
        (0u32..10_000).prop_map(|n| n.to_string()),
        // JSON objects with nullable values
        proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..4).prop_map(|m| {
            let value: serde_json::Map<String, serde_json::Value> = m
                .into_iter()
                .map(|(k, v)| {
                    let v = if v.is_empty() {
                        serde_json::Value::Null
                    } else {
                        serde_json::Value::String(v)
                    };
                    (k, v)
                })
                .collect();
            serde_json::Value::Object(value).to_string()
        }),
    ]
}

proptest! {
    #[test]
    fn digest_is_insertion_order_invariant(
        entries in proptest::collection::vec((arb_key(), arb_raw_value()), 0..8),
        seed in any::<u64>(),
    ) {
        let forward: RawRecord = entries.iter().cloned().collect();

        // insert in a seed-derived order
        let mut shuffled = entries.clone();
        let len = shuffled.len();
        for i in (1..len).rev() {
            #[allow(clippy::cast_possible_truncation)]
            let j = (seed.wrapping_mul(i as u64 + 1) % (i as u64 + 1)) as usize;
            shuffled.swap(i, j);
        }
        let reordered: RawRecord = shuffled.into_iter().collect();

        prop_assert_eq!(record_digest(&forward), record_digest(&reordered));
    }

    #[test]
    fn digest_changes_when_any_value_changes(
        entries in proptest::collection::btree_map(arb_key(), arb_raw_value(), 1..6),
    ) {
        let original: RawRecord = entries.clone().into_iter().collect();

        let mut mutated = original.clone();
        let victim = mutated.keys().next().cloned().expect("non-empty by construction");
        // a decoded value no generator above can produce
        mutated.insert(victim, "98765432109876".to_owned());

        prop_assert_ne!(record_digest(&original), record_digest(&mutated));
    }

    #[test]
    fn digest_is_unaffected_by_other_records(
        entries in proptest::collection::btree_map(arb_key(), arb_raw_value(), 0..6),
        other in proptest::collection::btree_map(arb_key(), arb_raw_value(), 0..6),
    ) {
        let record: RawRecord = entries.into_iter().collect();
        let before = record_digest(&record);

        // hashing an unrelated peer's record must not disturb this one
        let _ = record_digest(&other.into_iter().collect());

        prop_assert_eq!(before, record_digest(&record));
    }
}
