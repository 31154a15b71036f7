//! Owned request and response values passed between the worker, the cache and the network.

use serde::{Deserialize, Serialize};
use url::Url;

/// HTTP method of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }
}

impl std::fmt::Display for Method {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(color_eyre::eyre::eyre!("Unsupported HTTP method: {}", other)),
    }
  }
}

/// What the requesting client intends to do with the response.
///
/// Mirrors the fetch `destination` classification; only `Image` affects routing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
  /// Fetches issued from script (XHR, `fetch()`), the API traffic
  #[default]
  Empty,
  Document,
  Image,
  Script,
  Style,
  Font,
  Manifest,
}

impl std::str::FromStr for Destination {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "" | "empty" => Ok(Destination::Empty),
      "document" => Ok(Destination::Document),
      "image" => Ok(Destination::Image),
      "script" => Ok(Destination::Script),
      "style" => Ok(Destination::Style),
      "font" => Ok(Destination::Font),
      "manifest" => Ok(Destination::Manifest),
      other => Err(color_eyre::eyre::eyre!("Unknown request destination: {}", other)),
    }
  }
}

/// An intercepted or outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      destination: Destination::Empty,
      headers: Vec::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::Get, url)
  }

  /// Build a JSON `POST`, as used when replaying queued mutations.
  pub fn post_json(url: Url, body: &serde_json::Value) -> color_eyre::Result<Self> {
    let body = serde_json::to_vec(body)
      .map_err(|e| color_eyre::eyre::eyre!("Failed to serialize request body: {}", e))?;
    Ok(Self {
      method: Method::Post,
      url,
      destination: Destination::Empty,
      headers: vec![("Content-Type".to_string(), "application/json".to_string())],
      body: Some(body),
    })
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }
}

/// A response snapshot. Cloning it is how a live response gets persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// Whether the status is in the 2xx range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Structured offline signal returned when neither network nor cache can answer.
  pub fn offline() -> Self {
    let body = serde_json::json!({
      "error": "Offline",
      "message": "This feature requires an internet connection",
    });
    Self::new(503, body.to_string()).with_header("Content-Type", "application/json")
  }

  /// Empty placeholder returned by cache-first when the asset is unreachable.
  pub fn not_found() -> Self {
    Self::new(404, Vec::new())
  }

  pub fn json(&self) -> color_eyre::Result<serde_json::Value> {
    serde_json::from_slice(&self.body)
      .map_err(|e| color_eyre::eyre::eyre!("Response body is not JSON: {}", e))
  }
}
