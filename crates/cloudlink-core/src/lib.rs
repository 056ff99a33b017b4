//! Credential-free negotiation of cloud capability grants.
//!
//! Two cooperating units agree on a set of cloud capability grants (instance
//! tagging, load-balancer management, object-storage access, ...) without
//! the requesting side ever holding credentials. The requirer declares what
//! it wants into its half of a shared key/value record; the provider, the
//! only side with cloud credentials, acts on it and acknowledges by
//! publishing a content hash; the requirer is "ready" exactly when the
//! acknowledged hash matches what it currently publishes.
//!
//! # Architecture
//!
//! ```text
//! Requirer                      transport                      Provider
//! ────────                      ─────────                      ────────
//! identity + requests ──────▶ shared record ──────▶ pending_requests()
//!                                                        │ provision
//! is_ready() ◀────────────── shared record ◀────── mark_completed()
//! ```
//!
//! There are no sequence numbers, timers, or coordination services: both
//! sides hash a canonical serialization of the converged record
//! ([`digest`]), which makes the protocol idempotent under at-least-once,
//! reordered delivery and safe across restarts (persisted hashes via
//! [`store`]) and renegotiation (any request mutation changes the hash and
//! re-opens the work).
//!
//! # Modules
//!
//! - [`record`]: the raw transport record and the JSON value boundary
//! - [`digest`]: the content-hash reconciliation engine
//! - [`capability`]: the capability vocabulary and pattern qualification
//! - [`metadata`]: token-authenticated instance metadata resolution
//! - [`store`]: the injected persistence capability
//! - [`relation`]: lifecycle events delivered by the host
//! - [`requirer`] / [`provider`]: the two role façades
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use cloudlink_core::{
//!     Capability, GrantProvider, GrantRequirer, MemoryStore, MetadataCache,
//!     MockFetcher, RelationEvent,
//! };
//!
//! // Requirer side: declare identity and requests.
//! let fetcher = MockFetcher::new()
//!     .with_response("instance-id", "i-123")
//!     .with_response("placement/availability-zone", "us-east-1a");
//! let mut requirer = GrantRequirer::new("aws", MetadataCache::new(fetcher, "aws"));
//! requirer
//!     .handle_event(&RelationEvent::Joined { unit: "provider/0".into() })
//!     .expect("metadata reachable");
//! requirer.enable_load_balancer_management();
//!
//! // Provider side: observe, act, acknowledge.
//! let mut provider = GrantProvider::new("aws", Arc::new(MemoryStore::new()));
//! provider.handle_event(&RelationEvent::Changed {
//!     unit: "requirer/0".into(),
//!     record: requirer.published().clone(),
//! });
//! for request in provider.pending_requests() {
//!     assert!(request.requested(Capability::LoadBalancerManagement));
//!     // ... provision, then acknowledge as the final step:
//!     provider.mark_completed(&request);
//! }
//!
//! // Requirer observes the acknowledgement.
//! requirer
//!     .handle_event(&RelationEvent::Changed {
//!         unit: "provider/0".into(),
//!         record: provider.published().clone(),
//!     })
//!     .expect("no metadata fetch on changed");
//! assert!(requirer.is_ready());
//! ```

pub mod capability;
pub mod digest;
pub mod metadata;
pub mod provider;
pub mod record;
pub mod relation;
pub mod requirer;
pub mod store;

pub use capability::{Capability, S3_ARN_PREFIX};
pub use digest::{ContentHash, record_digest};
pub use metadata::{
    ImdsFetcher, InstanceMetadata, MetadataCache, MetadataConfig, MetadataFetchError,
    MetadataFetcher, MockFetcher,
};
pub use provider::{GrantProvider, PendingRequest};
pub use record::RawRecord;
pub use relation::RelationEvent;
pub use requirer::{BlockedReason, GrantRequirer, RequirerPhase};
pub use store::{MemoryStore, Store};
