//! Core types for the asset cache: request identities, response snapshots
//! and serve results.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

/// Identity of a cacheable request: method plus URL.
///
/// Methods are normalized to uppercase so `get` and `GET` share a cache slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: Url,
}

impl RequestKey {
  pub fn new(method: &str, url: Url) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url,
    }
  }

  /// Shorthand for the common case: a GET request.
  pub fn get(url: Url) -> Self {
    Self::new("GET", url)
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  /// Whether the cache is allowed to handle this request at all.
  ///
  /// Only safe reads over HTTP(S) are intercepted; everything else passes
  /// through to the network untouched.
  pub fn is_interceptable(&self) -> bool {
    self.method == "GET" && matches!(self.url.scheme(), "http" | "https")
  }

  /// Stable, fixed-length storage key for this request identity.
  pub fn storage_key(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    hex::encode(hasher.finalize())
  }
}

/// A stored copy of one response: status, headers and body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl AssetSnapshot {
  /// Whether this response should be written back to the cache.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// A snapshot together with the time it entered the cache.
#[derive(Debug, Clone)]
pub struct StoredAsset {
  pub snapshot: AssetSnapshot,
  pub cached_at: DateTime<Utc>,
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Returned straight from the cache; a background refresh may still land.
  Cache,
  /// No cached copy existed; the network response was awaited.
  Network,
}

/// Response handed back to the caller of `CacheController::serve`.
#[derive(Debug, Clone)]
pub struct Served {
  pub snapshot: AssetSnapshot,
  pub source: ServedFrom,
  /// When the snapshot was cached, if it came from the cache.
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_cache(stored: StoredAsset) -> Self {
    Self {
      snapshot: stored.snapshot,
      source: ServedFrom::Cache,
      cached_at: Some(stored.cached_at),
    }
  }

  pub fn from_network(snapshot: AssetSnapshot) -> Self {
    Self {
      snapshot,
      source: ServedFrom::Network,
      cached_at: None,
    }
  }
}

/// Lifecycle of one cache generation, as driven by its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
  /// No install has been attempted yet (or the last one failed).
  Idle,
  /// Manifest assets are being fetched and stored.
  Installing,
  /// Install finished; waiting for activation.
  Installed,
  /// Stale generations are being purged.
  Activating,
  /// This generation is current and serving.
  Active,
  /// A newer generation has been activated and purged this one.
  Superseded,
}
