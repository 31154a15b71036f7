//! Network access used by the caching strategies and the sync processor.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;

use crate::http::{Method, Request, Response};

/// Something that can put a request on the wire.
///
/// `Err` means the network was unreachable. Any HTTP status, including 4xx/5xx,
/// comes back as `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Network client backed by reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
}

impl HttpNetwork {
  pub fn new(timeout: Option<Duration>) -> Result<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
      builder = builder.timeout(timeout);
    }
    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self { client })
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Head => reqwest::Method::HEAD,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
    Method::Options => reqwest::Method::OPTIONS,
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let mut builder = self
      .client
      .request(to_reqwest_method(request.method), request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Network request to {} failed: {}", request.url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", request.url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
    })
  }
}

#[cfg(test)]
pub(crate) mod testing {
  //! Scripted network for unit tests.

  use super::*;
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  #[derive(Clone)]
  pub enum Scripted {
    Respond(Response),
    Unreachable,
    /// Respond after a delay, to keep a fetch in flight
    Delayed(Duration, Response),
  }

  /// Answers by URL; anything not scripted is unreachable.
  #[derive(Default)]
  pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, Scripted>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Request>>,
  }

  impl ScriptedNetwork {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn respond(&self, url: &str, response: Response) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), Scripted::Respond(response));
    }

    pub fn delay(&self, url: &str, delay: Duration, response: Response) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), Scripted::Delayed(delay, response));
    }

    pub fn fail(&self, url: &str) {
      self
        .routes
        .lock()
        .unwrap()
        .insert(url.to_string(), Scripted::Unreachable);
    }

    pub fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
      self.requests.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<Response> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      self.requests.lock().unwrap().push(request.clone());
      let scripted = self
        .routes
        .lock()
        .unwrap()
        .get(request.url.as_str())
        .cloned();
      match scripted {
        Some(Scripted::Respond(response)) => Ok(response),
        Some(Scripted::Delayed(delay, response)) => {
          tokio::time::sleep(delay).await;
          Ok(response)
        }
        Some(Scripted::Unreachable) | None => Err(eyre!("unreachable: {}", request.url)),
      }
    }
  }
}
