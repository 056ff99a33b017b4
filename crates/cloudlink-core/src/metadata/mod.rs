//! Instance metadata resolution with token-authenticated fetch and caching.
//!
//! The requirer identifies itself to the provider with two environment
//! facts, the instance id and the region, resolved from the link-local
//! metadata service. Every fetch is a two-phase exchange: a `PUT` to the
//! token endpoint mints a short-lived session token, then the data `GET`
//! carries that token in a header.
//!
//! ```text
//! MetadataFetcher (trait)
//!     |
//!     +-- ImdsFetcher (production, reqwest blocking client)
//!     |
//!     +-- MockFetcher (for testing)
//!
//! MetadataCache
//!     wraps any fetcher; consults the injected Store before the network,
//!     memoizes in-process after the first successful resolution.
//! ```
//!
//! Failures at either phase surface as a single [`MetadataFetchError`]
//! carrying the originally-requested data URL. Callers treat it as a hard
//! local-environment failure, distinct from every protocol-state condition.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::store::Store;

/// Token endpoint of the metadata service.
pub const TOKEN_URL: &str = "http://169.254.169.254/latest/api/token";

/// Base URL of the metadata tree.
pub const METADATA_BASE_URL: &str = "http://169.254.169.254/latest/meta-data/";

/// Path of the instance identifier value.
pub const INSTANCE_ID_PATH: &str = "instance-id";

/// Path of the availability-zone value the region is derived from.
pub const AVAILABILITY_ZONE_PATH: &str = "placement/availability-zone";

/// Maximum bytes read from any metadata response.
///
/// Realistically the values are ~20 characters; the bound just has to
/// comfortably exceed that.
pub const READ_BLOCK_SIZE: usize = 2048;

const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Failure to resolve instance metadata from the local environment.
///
/// Carries the data URL that was being resolved, regardless of which phase
/// (token mint or data fetch) actually failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to fetch instance metadata from {url}: {reason}")]
pub struct MetadataFetchError {
    /// The data URL whose resolution failed (never the token URL).
    pub url: String,
    /// The underlying transport or HTTP condition.
    pub reason: String,
}

impl MetadataFetchError {
    pub(crate) fn new(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration for the production metadata client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Base URL of the metadata tree.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Token endpoint URL.
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// TTL hint sent when minting a session token, in seconds.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,

    /// TCP connect timeout, in seconds. The endpoint is link-local, so this
    /// stays short.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Overall per-request timeout, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    METADATA_BASE_URL.to_owned()
}

fn default_token_url() -> String {
    TOKEN_URL.to_owned()
}

const fn default_token_ttl_secs() -> u64 {
    21_600
}

const fn default_connect_timeout_secs() -> u64 {
    2
}

const fn default_timeout_secs() -> u64 {
    10
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token_url: default_token_url(),
            token_ttl_secs: default_token_ttl_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Fetches one metadata value by path.
pub trait MetadataFetcher: Send + Sync {
    /// Resolves the value at `path` (relative to the metadata tree).
    ///
    /// # Errors
    ///
    /// Returns [`MetadataFetchError`] on any network, HTTP, or decoding
    /// failure at either phase of the exchange.
    fn fetch(&self, path: &str) -> Result<String, MetadataFetchError>;
}

impl<T: MetadataFetcher + ?Sized> MetadataFetcher for Arc<T> {
    fn fetch(&self, path: &str) -> Result<String, MetadataFetchError> {
        (**self).fetch(path)
    }
}

/// Production fetcher speaking the token-authenticated metadata protocol.
pub struct ImdsFetcher {
    config: MetadataConfig,
    http_client: reqwest::blocking::Client,
}

impl ImdsFetcher {
    /// Creates a fetcher against the well-known link-local endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new() -> Result<Self, MetadataFetchError> {
        Self::from_config(MetadataConfig::default())
    }

    /// Creates a fetcher with explicit endpoint configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn from_config(config: MetadataConfig) -> Result<Self, MetadataFetchError> {
        let http_client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| {
                MetadataFetchError::new(
                    config.base_url.clone(),
                    format!("failed to initialize HTTP client: {error}"),
                )
            })?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn data_url(&self, path: &str) -> String {
        let base = &self.config.base_url;
        if base.ends_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Mints a session token. Failures are attributed to `url`, the data URL
    /// the caller is actually after.
    fn mint_token(&self, url: &str) -> Result<String, MetadataFetchError> {
        let response = self
            .http_client
            .put(&self.config.token_url)
            .header(TOKEN_TTL_HEADER, self.config.token_ttl_secs.to_string())
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|error| {
                MetadataFetchError::new(url, format!("token request failed: {error}"))
            })?;
        read_bounded(response, url)
    }
}

impl MetadataFetcher for ImdsFetcher {
    fn fetch(&self, path: &str) -> Result<String, MetadataFetchError> {
        let url = self.data_url(path);
        let token = self.mint_token(&url)?;
        let response = self
            .http_client
            .get(&url)
            .header(TOKEN_HEADER, token.trim())
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|error| MetadataFetchError::new(&url, error.to_string()))?;
        let value = read_bounded(response, &url)?;
        debug!(%url, "resolved metadata value");
        Ok(value)
    }
}

/// Reads at most [`READ_BLOCK_SIZE`] bytes of a response body as UTF-8.
fn read_bounded(
    response: reqwest::blocking::Response,
    url: &str,
) -> Result<String, MetadataFetchError> {
    let mut buf = Vec::with_capacity(64);
    response
        .take(READ_BLOCK_SIZE as u64)
        .read_to_end(&mut buf)
        .map_err(|error| MetadataFetchError::new(url, format!("read failed: {error}")))?;
    String::from_utf8(buf)
        .map_err(|_| MetadataFetchError::new(url, "response was not valid UTF-8"))
}

/// Derives the region from an availability-zone string by stripping the
/// trailing zone letters (`us-east-1a` → `us-east-1`).
#[must_use]
pub fn region_from_availability_zone(availability_zone: &str) -> String {
    availability_zone
        .trim_end_matches(|c: char| c.is_ascii_lowercase())
        .to_owned()
}

/// The two environment facts identifying this unit to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMetadata {
    /// The cloud instance identifier.
    pub instance_id: String,
    /// The region, derived from the availability zone.
    pub region: String,
}

/// Once-per-process metadata resolution with optional cross-restart
/// persistence.
///
/// Construct one per requirer. `resolve` consults the injected [`Store`]
/// first (keyed by the stable prefix, so restarts skip the network), fetches
/// on miss, writes back, and memoizes in-process: after the first success it
/// never touches the store or the network again.
pub struct MetadataCache {
    fetcher: Box<dyn MetadataFetcher>,
    store: Option<Arc<dyn Store>>,
    key_prefix: String,
    resolved: Option<InstanceMetadata>,
}

impl MetadataCache {
    /// Creates a cache over `fetcher`, keyed by `key_prefix` (the endpoint
    /// name, stable per relation instance).
    #[must_use]
    pub fn new(
        fetcher: impl MetadataFetcher + 'static,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            fetcher: Box::new(fetcher),
            store: None,
            key_prefix: key_prefix.into(),
            resolved: None,
        }
    }

    /// Attaches a persistent store for cross-restart memoization.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// The already-resolved metadata, if any.
    #[must_use]
    pub fn cached(&self) -> Option<&InstanceMetadata> {
        self.resolved.as_ref()
    }

    /// Resolves the instance metadata, fetching only on a cold cache.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataFetchError`] if the environment is unreachable on a
    /// cache miss. Once this has succeeded it can no longer fail for the
    /// lifetime of the cache.
    pub fn resolve(&mut self) -> Result<InstanceMetadata, MetadataFetchError> {
        if let Some(meta) = &self.resolved {
            return Ok(meta.clone());
        }
        let meta = self.lookup()?;
        self.resolved = Some(meta.clone());
        Ok(meta)
    }

    fn instance_id_key(&self) -> String {
        format!("{}.{INSTANCE_ID_PATH}", self.key_prefix)
    }

    fn region_key(&self) -> String {
        format!("{}.region", self.key_prefix)
    }

    fn lookup(&mut self) -> Result<InstanceMetadata, MetadataFetchError> {
        if let Some(store) = &self.store {
            if let (Some(instance_id), Some(region)) =
                (store.get(&self.instance_id_key()), store.get(&self.region_key()))
            {
                debug!(%instance_id, %region, "resolved metadata from store");
                return Ok(InstanceMetadata {
                    instance_id,
                    region,
                });
            }
        }

        let instance_id = self.fetcher.fetch(INSTANCE_ID_PATH)?;
        let availability_zone = self.fetcher.fetch(AVAILABILITY_ZONE_PATH)?;
        let region = region_from_availability_zone(&availability_zone);
        debug!(%instance_id, %region, "resolved metadata from environment");

        if let Some(store) = &self.store {
            store.set(&self.instance_id_key(), &instance_id);
            store.set(&self.region_key(), &region);
        }

        Ok(InstanceMetadata {
            instance_id,
            region,
        })
    }
}

/// Scripted fetcher for tests.
#[derive(Default)]
pub struct MockFetcher {
    responses: HashMap<String, String>,
    failure: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    /// Creates a fetcher with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the response for one path.
    #[must_use]
    pub fn with_response(mut self, path: impl Into<String>, value: impl Into<String>) -> Self {
        self.responses.insert(path.into(), value.into());
        self
    }

    /// Makes every fetch fail with the given reason.
    #[must_use]
    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    /// The paths fetched so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MetadataFetcher for MockFetcher {
    fn fetch(&self, path: &str) -> Result<String, MetadataFetchError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_owned());
        if let Some(reason) = &self.failure {
            return Err(MetadataFetchError::new(path, reason.clone()));
        }
        self.responses
            .get(path)
            .cloned()
            .ok_or_else(|| MetadataFetchError::new(path, "no scripted response"))
    }
}
