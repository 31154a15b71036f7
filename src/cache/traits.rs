//! Core traits and types for the response cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::{Method, Request, Response};

/// Normalized identity of a cacheable request: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  pub method: Method,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method,
      url: url.to_string(),
    }
  }

  pub fn for_request(request: &Request) -> Self {
    Self::new(request.method, &request.url)
  }

  /// SHA256 of the normalized identity, used as the storage key.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// A stored response and when it was last written.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub response: Response,
  pub stored_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A generation is a named group of entries that is deleted as a unit.
/// Writes of a single entry are all-or-nothing.
pub trait CacheStore: Send + Sync {
  /// Create the generation if it does not exist yet.
  fn open(&self, generation: &str) -> Result<()>;

  /// Names of every generation currently present.
  fn generations(&self) -> Result<Vec<String>>;

  /// Drop a generation and all of its entries. Returns whether it existed.
  fn delete_generation(&self, generation: &str) -> Result<bool>;

  /// Look up an entry within one generation.
  fn get(&self, generation: &str, key: &RequestKey) -> Result<Option<CacheEntry>>;

  /// Insert or overwrite one entry.
  fn put(&self, generation: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Insert or overwrite several entries in one transaction.
  fn put_all(&self, generation: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Keys stored in a generation, ordered by URL.
  fn keys(&self, generation: &str) -> Result<Vec<RequestKey>>;
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Live response from the network
  Network,
  /// Served from a cache generation
  Cache,
  /// Network unreachable, cache empty: synthesized placeholder
  Fallback,
}
