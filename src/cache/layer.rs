//! Cache layer implementing the three request strategies on top of a store and the network.

use color_eyre::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::traits::{CacheStore, RequestKey, ResponseSource};
use crate::http::{Request, Response};
use crate::network::Network;

/// A response ready to hand back to the client.
#[derive(Debug)]
pub struct Served {
  pub response: Response,
  pub source: ResponseSource,
  /// Detached cache refresh still running after the response was produced
  pub revalidation: Option<JoinHandle<()>>,
}

impl Served {
  pub(crate) fn new(response: Response, source: ResponseSource) -> Self {
    Self {
      response,
      source,
      revalidation: None,
    }
  }
}

/// Cache layer that manages caching logic and network fetching.
///
/// Network failures are recovered from by each strategy. Storage failures
/// propagate, except while falling back from an unreachable network.
pub struct CacheLayer<S: CacheStore> {
  storage: Arc<S>,
  network: Arc<dyn Network>,
}

impl<S: CacheStore + 'static> CacheLayer<S> {
  pub fn new(storage: Arc<S>, network: Arc<dyn Network>) -> Self {
    Self { storage, network }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn network(&self) -> &Arc<dyn Network> {
    &self.network
  }

  /// Network-first: freshness preferred, cache as the offline fallback.
  ///
  /// 1. Fetch from network; a 2xx response is stored before being returned
  /// 2. Non-2xx responses are returned as-is and never stored
  /// 3. On network failure, serve the cached entry
  /// 4. With nothing cached, answer with the structured 503 offline response
  pub async fn network_first(&self, request: &Request, generation: &str) -> Result<Served> {
    let key = RequestKey::for_request(request);

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          store_quietly(self.storage.as_ref(), generation, &key, &response);
        }
        Ok(Served::new(response, ResponseSource::Network))
      }
      Err(e) => {
        debug!("Network failed for {}, trying cache: {}", key, e);
        match self.storage.get(generation, &key) {
          Ok(Some(entry)) => Ok(Served::new(entry.response, ResponseSource::Cache)),
          Ok(None) => {
            warn!("Offline with no cached copy of {}", key);
            Ok(Served::new(Response::offline(), ResponseSource::Fallback))
          }
          Err(e) => {
            warn!("Offline and cache read of {} failed: {}", key, e);
            Ok(Served::new(Response::offline(), ResponseSource::Fallback))
          }
        }
      }
    }
  }

  /// Cache-first: a hit never touches the network.
  ///
  /// Misses are fetched and stored when 2xx. An unreachable network yields an empty 404.
  pub async fn cache_first(&self, request: &Request, generation: &str) -> Result<Served> {
    let key = RequestKey::for_request(request);

    if let Some(entry) = self.storage.get(generation, &key)? {
      return Ok(Served::new(entry.response, ResponseSource::Cache));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          store_quietly(self.storage.as_ref(), generation, &key, &response);
        }
        Ok(Served::new(response, ResponseSource::Network))
      }
      Err(e) => {
        debug!("Failed to fetch {} from network: {}", key, e);
        Ok(Served::new(Response::not_found(), ResponseSource::Fallback))
      }
    }
  }

  /// Stale-while-revalidate: answer from cache at once, refresh it in the background.
  ///
  /// With a cached entry the refresh is spawned and handed back in
  /// `Served::revalidation`; the caller never waits on it. Without one the
  /// caller waits for the network, and gets the 503 offline response if it fails.
  pub async fn stale_while_revalidate(
    &self,
    request: &Request,
    generation: &str,
  ) -> Result<Served> {
    let key = RequestKey::for_request(request);
    let cached = self.storage.get(generation, &key)?;

    let refresh = revalidate(
      Arc::clone(&self.storage),
      Arc::clone(&self.network),
      request.clone(),
      generation.to_string(),
    );

    match cached {
      Some(entry) => {
        let handle = tokio::spawn(async move {
          refresh.await;
        });
        Ok(Served {
          response: entry.response,
          source: ResponseSource::Cache,
          revalidation: Some(handle),
        })
      }
      None => match refresh.await {
        Some(response) => Ok(Served::new(response, ResponseSource::Network)),
        None => Ok(Served::new(Response::offline(), ResponseSource::Fallback)),
      },
    }
  }
}

impl<S: CacheStore> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
    }
  }
}

/// Fetch and store a fresh copy. `None` when the network is unreachable.
async fn revalidate<S: CacheStore>(
  storage: Arc<S>,
  network: Arc<dyn Network>,
  request: Request,
  generation: String,
) -> Option<Response> {
  let key = RequestKey::for_request(&request);
  match network.fetch(&request).await {
    Ok(response) => {
      if response.ok() {
        store_quietly(storage.as_ref(), &generation, &key, &response);
      }
      Some(response)
    }
    Err(e) => {
      debug!("Background refresh of {} failed: {}", key, e);
      None
    }
  }
}

/// The live response is still served when the cache write fails.
fn store_quietly<S: CacheStore + ?Sized>(
  storage: &S,
  generation: &str,
  key: &RequestKey,
  response: &Response,
) {
  if let Err(e) = storage.put(generation, key, response) {
    warn!("Failed to cache {} in {}: {}", key, generation, e);
  }
}
