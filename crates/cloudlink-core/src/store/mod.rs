//! Injected persistent key/value capability.
//!
//! Cross-restart memoization (resolved instance metadata, the provider's
//! last-completed hash per peer) goes through this trait rather than any
//! ambient global. Hosts with a durable unit-local store inject their own
//! implementation; [`MemoryStore`] covers tests and hosts without one.
//!
//! Key schema used by this crate:
//! - `{endpoint}.instance-id`, `{endpoint}.region`: resolved metadata;
//! - `{endpoint}.request.{instance_id}`: last completed request hash.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Unit-local persistent string store.
///
/// Modelled as infallible: the reference facility this abstracts never
/// surfaces storage errors to callers. A fallible host store adapts at this
/// boundary.
pub trait Store: Send + Sync {
    /// Returns the stored value for `key`, if any.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str);

    /// Removes `key`. Removing an absent key is a no-op.
    fn unset(&self, key: &str);
}

/// In-memory [`Store`] for tests and store-less hosts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value.to_owned());
    }

    fn unset(&self, key: &str) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
