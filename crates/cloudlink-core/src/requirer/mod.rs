//! Requirer side of the capability-grant relation.
//!
//! The requirer declares what it wants by writing into its own side of the
//! shared record, then watches the provider's side for an acknowledgement of
//! the exact content it published. It holds no cloud credentials at any
//! point.
//!
//! # State Machine
//!
//! ```text
//!                 Joined (publish identity)
//!     ┌───────────┐          ┌─────────┐  hash match   ┌───────┐
//!     │ Unrelated │─────────▶│ Pending │──────────────▶│ Ready │
//!     └───────────┘          └─────────┘               └───────┘
//!           ▲                     ▲         any tag_*/enable_*  │
//!           │                     └──────────────────────────────┘
//!           │                          Broken
//!           └────────────────────────────────────────────────────
//! ```
//!
//! Readiness is never assumed to persist: every request-mutating call drops
//! the phase back to `Pending` until the provider re-acknowledges the new
//! content hash. Torn-down relations clear the published record entirely.
//!
//! Metadata-resolution failure during `Joined` is a hard local-environment
//! error and propagates out of [`GrantRequirer::handle_event`]; it is never
//! folded into "waiting".

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::capability::{self, Capability};
use crate::digest;
use crate::metadata::{MetadataCache, MetadataFetchError};
use crate::record::{self, RawRecord, keys};
use crate::relation::RelationEvent;

/// Lifecycle phase of the requirer side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirerPhase {
    /// No relation established.
    Unrelated,
    /// Relation exists; awaiting the provider's hash acknowledgement.
    Pending,
    /// The provider has acknowledged the exact current request content.
    Ready,
}

/// Human-readable reason the integration is not usable yet.
///
/// This is the single value external orchestration code is expected to
/// poll; protocol-state conditions are never raised as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockedReason {
    /// No relation exists (or it was just torn down).
    Missing {
        /// The endpoint name the relation is expected on.
        endpoint: String,
    },
    /// Related, but the provider has not yet satisfied the current request.
    Waiting {
        /// The endpoint name of the relation being waited on.
        endpoint: String,
    },
}

impl fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { endpoint } => write!(f, "Missing required {endpoint}"),
            Self::Waiting { endpoint } => write!(f, "Waiting for {endpoint}"),
        }
    }
}

/// Requirer-side façade over the shared relation record.
pub struct GrantRequirer {
    endpoint: String,
    metadata: MetadataCache,
    published: RawRecord,
    received: RawRecord,
    related: bool,
    phase: RequirerPhase,
}

impl GrantRequirer {
    /// Creates a requirer for `endpoint`, resolving identity through
    /// `metadata`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, metadata: MetadataCache) -> Self {
        Self {
            endpoint: endpoint.into(),
            metadata,
            published: RawRecord::new(),
            received: RawRecord::new(),
            related: false,
            phase: RequirerPhase::Unrelated,
        }
    }

    /// The endpoint name this requirer relates on.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> RequirerPhase {
        self.phase
    }

    /// The record to publish into the transport. The host syncs this out
    /// after each handler invocation.
    #[must_use]
    pub fn published(&self) -> &RawRecord {
        &self.published
    }

    /// Applies one lifecycle event.
    ///
    /// `Joined` publishes this unit's identity (idempotent: identical bytes
    /// on every invocation once resolved); `Changed` takes the provider's
    /// current record; `Departed` drops the peer's data; `Broken` tears the
    /// relation down and destroys the published record.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataFetchError`] when identity resolution fails during
    /// `Joined`: a hard failure of the local environment, distinct from
    /// every protocol-state condition.
    pub fn handle_event(&mut self, event: &RelationEvent) -> Result<(), MetadataFetchError> {
        match event {
            RelationEvent::Joined { .. } => {
                self.related = true;
                let meta = self.metadata.resolve()?;
                self.published
                    .insert(keys::INSTANCE_ID.to_owned(), meta.instance_id.clone());
                self.published
                    .insert(keys::REGION.to_owned(), meta.region.clone());
                debug!(
                    endpoint = %self.endpoint,
                    instance_id = %meta.instance_id,
                    region = %meta.region,
                    "published identity"
                );
            }
            RelationEvent::Changed { record, .. } => {
                self.related = true;
                self.received = record.clone();
            }
            RelationEvent::Departed { .. } => {
                self.received.clear();
            }
            RelationEvent::Broken => {
                self.related = false;
                self.received.clear();
                self.published.clear();
            }
        }
        self.refresh_phase();
        Ok(())
    }

    /// Whether the provider has acknowledged exactly the current published
    /// content. Absence of a relation, of a peer record, or of a matching
    /// hash entry are all plain `false`, never errors.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        if !self.related {
            return false;
        }
        let Some(instance_id) = self.published.get(keys::INSTANCE_ID) else {
            return false;
        };
        let completed = record::decode_completed(&self.received);
        let expected = digest::record_digest(&self.published);
        digest::is_acknowledged(&completed, instance_id, &expected)
    }

    /// Returns why the integration is blocked, or `None` once satisfied.
    ///
    /// Pass the relation event currently being handled, if any; a `Broken`
    /// event reports `Missing` even before [`Self::handle_event`] has torn
    /// the state down. This is the one value orchestration code polls;
    /// protocol-state conditions are never raised as errors.
    #[must_use]
    pub fn evaluate_relation(&self, event: Option<&RelationEvent>) -> Option<BlockedReason> {
        let torn_down = matches!(event, Some(RelationEvent::Broken));
        if !self.related || torn_down {
            return Some(BlockedReason::Missing {
                endpoint: self.endpoint.clone(),
            });
        }
        if !self.is_ready() {
            return Some(BlockedReason::Waiting {
                endpoint: self.endpoint.clone(),
            });
        }
        None
    }

    /// Requests that the given tags be applied to this instance.
    ///
    /// A `None` value publishes the tag with no value, which is distinct
    /// from the tag being absent.
    pub fn tag_instance(&mut self, tags: &BTreeMap<String, Option<String>>) {
        self.request(vec![(keys::INSTANCE_TAGS, tags_value(tags))]);
    }

    /// Requests that the given tags be applied to this instance's
    /// machine-specific security group.
    pub fn tag_instance_security_group(&mut self, tags: &BTreeMap<String, Option<String>>) {
        self.request(vec![(keys::INSTANCE_SECURITY_GROUP_TAGS, tags_value(tags))]);
    }

    /// Requests that the given tags be applied to this instance's subnet.
    pub fn tag_instance_subnet(&mut self, tags: &BTreeMap<String, Option<String>>) {
        self.request(vec![(keys::INSTANCE_SUBNET_TAGS, tags_value(tags))]);
    }

    /// Requests that a capability be enabled for this instance.
    ///
    /// For the object-storage capabilities this publishes an unrestricted
    /// (null) pattern list; use [`Self::enable_object_storage_access`] /
    /// [`Self::enable_object_storage_management`] to restrict by pattern.
    pub fn enable(&mut self, capability: Capability) {
        if capability.patterns_key().is_some() {
            self.enable_patterned(capability, None);
        } else {
            self.request(vec![(capability.flag_key(), Value::Bool(true))]);
        }
    }

    /// Requests read-only certificate-management access.
    pub fn enable_acm_readonly(&mut self) {
        self.enable(Capability::AcmReadonly);
    }

    /// Requests full certificate-management access.
    pub fn enable_acm_fullaccess(&mut self) {
        self.enable(Capability::AcmFullAccess);
    }

    /// Requests read-only autoscaling access.
    pub fn enable_autoscaling_readonly(&mut self) {
        self.enable(Capability::AutoscalingReadonly);
    }

    /// Requests the ability to inspect instances.
    pub fn enable_instance_inspection(&mut self) {
        self.enable(Capability::InstanceInspection);
    }

    /// Requests the ability to modify instances.
    pub fn enable_instance_modification(&mut self) {
        self.enable(Capability::InstanceModification);
    }

    /// Requests the ability to manage networking (firewalls, subnets, etc).
    pub fn enable_network_management(&mut self) {
        self.enable(Capability::NetworkManagement);
    }

    /// Requests the ability to manage load balancers.
    pub fn enable_load_balancer_management(&mut self) {
        self.enable(Capability::LoadBalancerManagement);
    }

    /// Requests the ability to manage block storage.
    pub fn enable_block_storage_management(&mut self) {
        self.enable(Capability::BlockStorageManagement);
    }

    /// Requests the ability to manage DNS.
    pub fn enable_dns_management(&mut self) {
        self.enable(Capability::DnsManagement);
    }

    /// Requests the ability to read region features.
    pub fn enable_region_readonly(&mut self) {
        self.enable(Capability::RegionReadonly);
    }

    /// Requests object-storage access, optionally restricted to resources
    /// matching `patterns`.
    ///
    /// Patterns not already carrying the `arn:aws:s3:::` prefix are
    /// qualified with it; exact matches pass through untouched.
    pub fn enable_object_storage_access(&mut self, patterns: Option<Vec<String>>) {
        self.enable_patterned(Capability::ObjectStorageAccess, patterns);
    }

    /// Requests object-storage management, optionally restricted to
    /// resources matching `patterns`.
    pub fn enable_object_storage_management(&mut self, patterns: Option<Vec<String>>) {
        self.enable_patterned(Capability::ObjectStorageManagement, patterns);
    }

    fn enable_patterned(&mut self, capability: Capability, patterns: Option<Vec<String>>) {
        let patterns_value = patterns.map_or(Value::Null, |p| {
            Value::Array(
                capability::qualify_patterns(p)
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            )
        });
        let mut entries = vec![(capability.flag_key(), Value::Bool(true))];
        if let Some(patterns_key) = capability.patterns_key() {
            entries.push((patterns_key, patterns_value));
        }
        self.request(entries);
    }

    /// Publishes request entries, overwriting exactly the keys given, and
    /// optimistically invalidates readiness.
    fn request(&mut self, entries: Vec<(&'static str, Value)>) {
        for (key, value) in entries {
            self.published
                .insert(key.to_owned(), record::encode_value(&value));
        }
        self.published
            .insert(keys::REQUESTED.to_owned(), "true".to_owned());
        if self.related {
            if self.phase == RequirerPhase::Ready {
                debug!(endpoint = %self.endpoint, "request mutated, readiness invalidated");
            }
            self.phase = RequirerPhase::Pending;
        }
    }

    fn refresh_phase(&mut self) {
        let next = if !self.related {
            RequirerPhase::Unrelated
        } else if self.is_ready() {
            RequirerPhase::Ready
        } else {
            RequirerPhase::Pending
        };
        if next != self.phase {
            debug!(endpoint = %self.endpoint, ?next, "phase transition");
        }
        self.phase = next;
    }
}

fn tags_value(tags: &BTreeMap<String, Option<String>>) -> Value {
    Value::Object(
        tags.iter()
            .map(|(name, value)| {
                let value = value
                    .as_ref()
                    .map_or(Value::Null, |v| Value::String(v.clone()));
                (name.clone(), value)
            })
            .collect(),
    )
}
