//! Tests for the provider façade: enumeration, change detection across
//! completion and restart, accessor defaults, and departure cleanup.

use std::sync::Arc;

use super::*;
use crate::store::MemoryStore;

const UNIT: &str = "worker/0";
const INSTANCE_ID: &str = "i-abcdefghijklmnopq";

fn record_with(entries: &[(&str, &str)]) -> RawRecord {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

fn sample_record() -> RawRecord {
    record_with(&[
        ("instance-id", INSTANCE_ID),
        ("region", "us-east-1"),
        ("instance-tags", r#"{"env":"prod","owner":null}"#),
        ("enable-dns-management", "true"),
        (
            "object-storage-access-patterns",
            r#"["arn:aws:s3:::mybucket"]"#,
        ),
        ("enable-object-storage-access", "true"),
        ("requested", "true"),
    ])
}

fn provider_with(store: &Arc<MemoryStore>) -> GrantProvider {
    GrantProvider::new("aws", Arc::clone(store) as Arc<dyn Store>)
}

fn changed(unit: &str, record: RawRecord) -> RelationEvent {
    RelationEvent::Changed {
        unit: unit.to_owned(),
        record,
    }
}

#[test]
fn no_peers_means_no_requests() {
    let provider = provider_with(&Arc::new(MemoryStore::new()));
    assert!(provider.pending_requests().is_empty());
}

#[test]
fn joined_unit_without_data_is_not_pending() {
    let mut provider = provider_with(&Arc::new(MemoryStore::new()));
    provider.handle_event(&RelationEvent::Joined {
        unit: UNIT.to_owned(),
    });
    // no instance-id yet: not attributable, never enumerated
    assert!(provider.pending_requests().is_empty());
}

#[test]
fn changed_record_becomes_pending() {
    let mut provider = provider_with(&Arc::new(MemoryStore::new()));
    provider.handle_event(&changed(UNIT, sample_record()));

    let pending = provider.pending_requests();
    assert_eq!(pending.len(), 1);
    let request = &pending[0];
    assert_eq!(request.unit_name(), UNIT);
    assert_eq!(request.application_name(), "worker");
    assert_eq!(request.instance_id(), INSTANCE_ID);
    assert_eq!(request.region(), Some("us-east-1"));
}

#[test]
fn tag_round_trip_preserves_null_values() {
    let mut provider = provider_with(&Arc::new(MemoryStore::new()));
    provider.handle_event(&changed(UNIT, sample_record()));

    let pending = provider.pending_requests();
    let tags = pending[0].instance_tags();
    assert_eq!(tags.get("env").cloned(), Some(Some("prod".to_owned())));
    assert_eq!(tags.get("owner").cloned(), Some(None), "null survives");
    assert_eq!(tags.len(), 2);
}

#[test]
fn capability_flags_and_patterns_are_read_back() {
    let mut provider = provider_with(&Arc::new(MemoryStore::new()));
    provider.handle_event(&changed(UNIT, sample_record()));

    let pending = provider.pending_requests();
    let request = &pending[0];
    assert!(request.requested(Capability::DnsManagement));
    assert!(request.requested(Capability::ObjectStorageAccess));
    assert!(!request.requested(Capability::LoadBalancerManagement));
    assert_eq!(
        request.object_storage_access_patterns(),
        ["arn:aws:s3:::mybucket"]
    );
    assert!(request.object_storage_management_patterns().is_empty());
}

#[test]
fn accessors_default_on_sparse_records() {
    let mut provider = provider_with(&Arc::new(MemoryStore::new()));
    provider.handle_event(&changed(UNIT, record_with(&[("instance-id", INSTANCE_ID)])));

    let pending = provider.pending_requests();
    let request = &pending[0];
    assert_eq!(request.region(), None);
    assert!(request.instance_tags().is_empty());
    assert!(request.security_group_tags().is_empty());
    assert!(request.subnet_tags().is_empty());
    for capability in Capability::ALL {
        assert!(!request.requested(capability));
    }
    assert!(request.object_storage_access_patterns().is_empty());
}

#[test]
fn accessors_tolerate_malformed_fields() {
    let mut provider = provider_with(&Arc::new(MemoryStore::new()));
    provider.handle_event(&changed(
        UNIT,
        record_with(&[
            ("instance-id", INSTANCE_ID),
            ("instance-tags", "{broken json"),
            ("enable-dns-management", "\"yes\""),
            ("object-storage-access-patterns", "null"),
        ]),
    ));

    let pending = provider.pending_requests();
    let request = &pending[0];
    assert!(request.instance_tags().is_empty());
    assert!(!request.requested(Capability::DnsManagement));
    assert!(request.object_storage_access_patterns().is_empty());
}

#[test]
fn completion_retires_the_request_until_it_changes() {
    let store = Arc::new(MemoryStore::new());
    let mut provider = provider_with(&store);
    provider.handle_event(&changed(UNIT, sample_record()));

    let pending = provider.pending_requests();
    assert_eq!(pending.len(), 1);
    let request = pending[0].clone();
    provider.mark_completed(&request);

    // acknowledged: no longer pending
    assert!(provider.pending_requests().is_empty());

    // the acknowledgement is published for the requirer to observe
    let completed = crate::record::decode_completed(provider.published());
    assert_eq!(
        completed.get(INSTANCE_ID).map(String::as_str),
        Some(request.hash().as_str())
    );

    // and the hash is persisted under the peer's stable key
    assert_eq!(
        store.get(&format!("aws.request.{INSTANCE_ID}")).as_deref(),
        Some(request.hash().as_str())
    );

    // a changed record re-opens the work
    let mut mutated = sample_record();
    mutated.insert("enable-network-management".to_owned(), "true".to_owned());
    provider.handle_event(&changed(UNIT, mutated));
    assert_eq!(provider.pending_requests().len(), 1);
}

#[test]
fn completing_one_peer_keeps_the_other_acknowledged() {
    let store = Arc::new(MemoryStore::new());
    let mut provider = provider_with(&store);
    provider.handle_event(&changed("worker/0", sample_record()));
    provider.handle_event(&changed(
        "worker/1",
        record_with(&[("instance-id", "i-other"), ("enable-dns-management", "true")]),
    ));

    let pending = provider.pending_requests();
    assert_eq!(pending.len(), 2);
    // stable order within a call: sorted by unit name
    assert_eq!(pending[0].unit_name(), "worker/0");
    assert_eq!(pending[1].unit_name(), "worker/1");

    provider.mark_completed(&pending[0]);
    provider.mark_completed(&pending[1]);

    let completed = crate::record::decode_completed(provider.published());
    assert_eq!(completed.len(), 2, "completed map accumulates per instance");
    assert!(completed.contains_key(INSTANCE_ID));
    assert!(completed.contains_key("i-other"));
}

#[test]
fn restart_with_the_same_store_stays_acknowledged() {
    let store = Arc::new(MemoryStore::new());
    let mut provider = provider_with(&store);
    provider.handle_event(&changed(UNIT, sample_record()));
    let request = provider.pending_requests()[0].clone();
    provider.mark_completed(&request);

    // a fresh provider over the same store sees unchanged work
    let mut restarted = provider_with(&store);
    restarted.handle_event(&changed(UNIT, sample_record()));
    assert!(restarted.pending_requests().is_empty());
}

#[test]
fn departure_forgets_the_peer() {
    let store = Arc::new(MemoryStore::new());
    let mut provider = provider_with(&store);
    provider.handle_event(&changed(UNIT, sample_record()));
    let request = provider.pending_requests()[0].clone();
    provider.mark_completed(&request);

    provider.handle_event(&RelationEvent::Departed {
        unit: UNIT.to_owned(),
    });
    assert_eq!(store.get(&format!("aws.request.{INSTANCE_ID}")), None);

    // a rejoin with identical content is fresh work again
    provider.handle_event(&changed(UNIT, sample_record()));
    assert_eq!(provider.pending_requests().len(), 1);
}

#[test]
fn rejoin_without_departure_is_unchanged() {
    let store = Arc::new(MemoryStore::new());
    let mut provider = provider_with(&store);
    provider.handle_event(&changed(UNIT, sample_record()));
    let request = provider.pending_requests()[0].clone();
    provider.mark_completed(&request);

    // same identity, same content, no departure observed in between
    provider.handle_event(&changed(UNIT, sample_record()));
    assert!(provider.pending_requests().is_empty());
}

#[test]
fn broken_forgets_every_peer() {
    let store = Arc::new(MemoryStore::new());
    let mut provider = provider_with(&store);
    provider.handle_event(&changed("worker/0", sample_record()));
    provider.handle_event(&changed(
        "worker/1",
        record_with(&[("instance-id", "i-other")]),
    ));
    for request in provider.pending_requests() {
        provider.mark_completed(&request);
    }

    provider.handle_event(&RelationEvent::Broken);
    assert!(provider.application_names().is_empty());
    assert_eq!(store.get(&format!("aws.request.{INSTANCE_ID}")), None);
    assert_eq!(store.get("aws.request.i-other"), None);
}

#[test]
fn application_names_deduplicate_units() {
    let mut provider = provider_with(&Arc::new(MemoryStore::new()));
    provider.handle_event(&RelationEvent::Joined {
        unit: "worker/0".to_owned(),
    });
    provider.handle_event(&RelationEvent::Joined {
        unit: "worker/1".to_owned(),
    });
    provider.handle_event(&RelationEvent::Joined {
        unit: "other/0".to_owned(),
    });

    let names = provider.application_names();
    assert_eq!(
        names.into_iter().collect::<Vec<_>>(),
        ["other", "worker"]
    );
}
