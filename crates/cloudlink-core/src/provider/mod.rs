//! Provider side of the capability-grant relation.
//!
//! The provider runs with real cloud credentials. For every joined remote
//! unit it decides, purely by content hash, whether that unit's record
//! represents new or changed work; the host's provisioning logic then acts
//! on each [`PendingRequest`] and calls [`GrantProvider::mark_completed`]
//! as its final step.
//!
//! Completion ordering is the load-bearing invariant: `mark_completed` is
//! the single write that flips the requirer to ready, so it must come after
//! every provisioning side effect has succeeded. A crash beforehand leaves
//! the stored hash stale and the request re-enumerates on the next pass.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::capability::Capability;
use crate::digest::{self, ContentHash};
use crate::record::{self, RawRecord, keys};
use crate::relation::{self, RelationEvent};
use crate::store::Store;

/// Provider-side façade over the shared relation records.
pub struct GrantProvider {
    endpoint: String,
    store: Arc<dyn Store>,
    peers: BTreeMap<String, RawRecord>,
    published: RawRecord,
}

impl GrantProvider {
    /// Creates a provider for `endpoint`, persisting completion hashes in
    /// `store` so restarts and rejoins are judged correctly.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Self {
            endpoint: endpoint.into(),
            store,
            peers: BTreeMap::new(),
            published: RawRecord::new(),
        }
    }

    /// The endpoint name this provider serves.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The record to publish into the transport (holds the `completed`
    /// acknowledgement map). The host syncs this out after each handler.
    #[must_use]
    pub fn published(&self) -> &RawRecord {
        &self.published
    }

    /// Names of all applications with at least one joined unit.
    #[must_use]
    pub fn application_names(&self) -> BTreeSet<String> {
        self.peers
            .keys()
            .map(|unit| relation::application_name(unit).to_owned())
            .collect()
    }

    /// Applies one lifecycle event.
    ///
    /// `Departed` both removes the unit and forgets its persisted hash, so
    /// a later rejoin under the same identity is treated as fresh work;
    /// `Broken` does the same for every unit at once.
    pub fn handle_event(&mut self, event: &RelationEvent) {
        match event {
            RelationEvent::Joined { unit } => {
                self.peers.entry(unit.clone()).or_default();
            }
            RelationEvent::Changed { unit, record } => {
                self.peers.insert(unit.clone(), record.clone());
            }
            RelationEvent::Departed { unit } => {
                self.forget(unit);
            }
            RelationEvent::Broken => {
                let units: Vec<String> = self.peers.keys().cloned().collect();
                for unit in units {
                    self.forget(&unit);
                }
            }
        }
    }

    /// Enumerates the units whose current record differs from the hash
    /// recorded when they were last completed.
    ///
    /// Units that have not yet published an `instance-id` are never
    /// enumerated: their work cannot be attributed to an instance, so it
    /// can never be marked done. Order is stable (by unit name) within one
    /// call; no ordering is guaranteed across calls once membership changes.
    #[must_use]
    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        let mut pending = Vec::new();
        for (unit, peer_record) in &self.peers {
            let Some(instance_id) = peer_record.get(keys::INSTANCE_ID) else {
                warn!(unit = %unit, "peer has not published an instance id; skipping");
                continue;
            };
            let hash = digest::record_digest(peer_record);
            let stored = self.store.get(&self.hash_key(instance_id));
            if digest::has_changed(&hash, stored.as_deref()) {
                pending.push(PendingRequest {
                    unit: unit.clone(),
                    instance_id: instance_id.clone(),
                    hash,
                    fields: record::decode_record(peer_record),
                });
            }
        }
        debug!(
            endpoint = %self.endpoint,
            pending = pending.len(),
            joined = self.peers.len(),
            "enumerated requests"
        );
        pending
    }

    /// Acknowledges `request` as fully satisfied.
    ///
    /// Publishes the request's hash under its instance id in the `completed`
    /// map and persists it for change detection across restarts. Call this
    /// only after all provisioning side effects for the request have
    /// succeeded: it is the write that flips the requirer to ready.
    pub fn mark_completed(&mut self, request: &PendingRequest) {
        let mut completed = record::decode_completed(&self.published);
        completed.insert(
            request.instance_id.clone(),
            request.hash.as_str().to_owned(),
        );
        let value = Value::Object(
            completed
                .into_iter()
                .map(|(instance_id, hash)| (instance_id, Value::String(hash)))
                .collect(),
        );
        self.published
            .insert(keys::COMPLETED.to_owned(), record::encode_value(&value));
        self.store
            .set(&self.hash_key(&request.instance_id), request.hash.as_str());
        info!(
            endpoint = %self.endpoint,
            unit = %request.unit,
            instance_id = %request.instance_id,
            hash = %request.hash,
            "request completed"
        );
    }

    /// Drops a departed unit and clears its persisted completion hash.
    pub fn forget(&mut self, unit: &str) {
        if let Some(peer_record) = self.peers.remove(unit) {
            if let Some(instance_id) = peer_record.get(keys::INSTANCE_ID) {
                self.store.unset(&self.hash_key(instance_id));
            }
            info!(endpoint = %self.endpoint, unit = %unit, "forgot departed peer");
        }
    }

    fn hash_key(&self, instance_id: &str) -> String {
        format!("{}.request.{instance_id}", self.endpoint)
    }
}

/// One remote unit's current request, snapshotted at enumeration time.
///
/// Accessors are total: absent or malformed fields default (empty map,
/// `false`, empty list) rather than failing, so a partially-propagated peer
/// record never breaks enumeration.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    unit: String,
    instance_id: String,
    hash: ContentHash,
    fields: BTreeMap<String, Value>,
}

impl PendingRequest {
    /// Name of the remote unit that made the request.
    #[must_use]
    pub fn unit_name(&self) -> &str {
        &self.unit
    }

    /// Name of the application the requesting unit belongs to.
    #[must_use]
    pub fn application_name(&self) -> &str {
        relation::application_name(&self.unit)
    }

    /// The instance id the request is for.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The region the requesting unit reported, if any.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.fields.get(keys::REGION).and_then(Value::as_str)
    }

    /// Content hash of the request as enumerated.
    #[must_use]
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// Tags to apply to the instance.
    #[must_use]
    pub fn instance_tags(&self) -> BTreeMap<String, Option<String>> {
        self.tag_map(keys::INSTANCE_TAGS)
    }

    /// Tags to apply to the instance's machine-specific security group.
    #[must_use]
    pub fn security_group_tags(&self) -> BTreeMap<String, Option<String>> {
        self.tag_map(keys::INSTANCE_SECURITY_GROUP_TAGS)
    }

    /// Tags to apply to the instance's subnet.
    #[must_use]
    pub fn subnet_tags(&self) -> BTreeMap<String, Option<String>> {
        self.tag_map(keys::INSTANCE_SUBNET_TAGS)
    }

    /// Whether `capability` was requested.
    #[must_use]
    pub fn requested(&self, capability: Capability) -> bool {
        self.fields
            .get(capability.flag_key())
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Patterns restricting object-storage access; empty means
    /// unrestricted.
    #[must_use]
    pub fn object_storage_access_patterns(&self) -> Vec<String> {
        self.patterns(Capability::ObjectStorageAccess)
    }

    /// Patterns restricting object-storage management; empty means
    /// unrestricted.
    #[must_use]
    pub fn object_storage_management_patterns(&self) -> Vec<String> {
        self.patterns(Capability::ObjectStorageManagement)
    }

    fn tag_map(&self, key: &str) -> BTreeMap<String, Option<String>> {
        match self.fields.get(key) {
            Some(Value::Object(entries)) => entries
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        Value::Null => None,
                        Value::String(s) => Some(s.clone()),
                        other => Some(other.to_string()),
                    };
                    (name.clone(), value)
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    fn patterns(&self, capability: Capability) -> Vec<String> {
        let Some(key) = capability.patterns_key() else {
            return Vec::new();
        };
        match self.fields.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map_or_else(|| item.to_string(), str::to_owned)
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests;
