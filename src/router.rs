//! Strategy selection for intercepted requests.
//!
//! Routing is decided from the request alone, before any cache or network I/O.

use crate::config::{Config, GenerationsConfig};
use crate::http::{Destination, Method, Request};

/// Which caching strategy serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  NetworkFirst,
  CacheFirst,
  StaleWhileRevalidate,
}

impl std::fmt::Display for Strategy {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Strategy::NetworkFirst => write!(f, "network-first"),
      Strategy::CacheFirst => write!(f, "cache-first"),
      Strategy::StaleWhileRevalidate => write!(f, "stale-while-revalidate"),
    }
  }
}

/// Routing decision: the strategy and the generation it reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
  /// Let the request through untouched
  Passthrough,
  Intercept { strategy: Strategy, generation: String },
}

/// Pick a route. Rules are evaluated in order and the first match wins:
///
/// 1. Non-GET: passthrough
/// 2. Path contains the API marker: network-first against the API generation
/// 3. Image destination or path contains the asset marker: cache-first against the
///    static generation
/// 4. Anything else: stale-while-revalidate against the static generation
pub fn select(request: &Request, config: &Config) -> Route {
  select_for(request, config, &config.generations)
}

/// [`select`] against another version's generations, used while an older
/// version still governs.
pub fn select_for(request: &Request, config: &Config, generations: &GenerationsConfig) -> Route {
  if request.method != Method::Get {
    return Route::Passthrough;
  }

  let path = request.url.path();

  if path.contains(&config.api_marker) {
    return Route::Intercept {
      strategy: Strategy::NetworkFirst,
      generation: generations.api.clone(),
    };
  }

  if request.destination == Destination::Image || path.contains(&config.asset_marker) {
    return Route::Intercept {
      strategy: Strategy::CacheFirst,
      generation: generations.static_assets.clone(),
    };
  }

  Route::Intercept {
    strategy: Strategy::StaleWhileRevalidate,
    generation: generations.static_assets.clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  fn config() -> Config {
    Config::for_origin("https://app.test")
  }

  fn get(path: &str) -> Request {
    Request::get(Url::parse("https://app.test").unwrap().join(path).unwrap())
  }

  fn strategy_of(request: &Request) -> Option<Strategy> {
    match select(request, &config()) {
      Route::Passthrough => None,
      Route::Intercept { strategy, .. } => Some(strategy),
    }
  }

  #[test]
  fn test_api_is_network_first() {
    let route = select(&get("/api/habits?cycle=3"), &config());
    assert_eq!(
      route,
      Route::Intercept {
        strategy: Strategy::NetworkFirst,
        generation: "ansury-x-api-v1".to_string(),
      }
    );
  }

  #[test]
  fn test_api_wins_over_image_destination() {
    let request = get("/api/avatar").with_destination(Destination::Image);
    assert_eq!(strategy_of(&request), Some(Strategy::NetworkFirst));
  }

  #[test]
  fn test_assets_and_images_are_cache_first() {
    assert_eq!(
      strategy_of(&get("/assets/hero-banner.jpg")),
      Some(Strategy::CacheFirst)
    );
    let image = get("/uploads/badge.png").with_destination(Destination::Image);
    assert_eq!(strategy_of(&image), Some(Strategy::CacheFirst));
  }

  #[test]
  fn test_documents_are_stale_while_revalidate() {
    for path in ["/", "/index.html", "/dashboard", "/main.js"] {
      assert_eq!(
        strategy_of(&get(path).with_destination(Destination::Document)),
        Some(Strategy::StaleWhileRevalidate),
        "{}",
        path
      );
    }
  }

  #[test]
  fn test_non_get_passes_through() {
    for method in [Method::Post, Method::Put, Method::Delete, Method::Head] {
      let mut request = get("/api/journal");
      request.method = method;
      assert_eq!(select(&request, &config()), Route::Passthrough);
    }
  }

  #[test]
  fn test_marker_only_matches_path() {
    // Query strings are not part of the path
    assert_eq!(
      strategy_of(&get("/search?next=/api/")),
      Some(Strategy::StaleWhileRevalidate)
    );
  }

  #[test]
  fn test_select_for_uses_given_generations() {
    let previous = GenerationsConfig {
      shell: "ansury-x-v0".to_string(),
      static_assets: "ansury-x-static-v0".to_string(),
      api: "ansury-x-api-v0".to_string(),
    };
    assert_eq!(
      select_for(&get("/api/habits"), &config(), &previous),
      Route::Intercept {
        strategy: Strategy::NetworkFirst,
        generation: "ansury-x-api-v0".to_string(),
      }
    );
    assert_eq!(
      select_for(&get("/index.html"), &config(), &previous),
      Route::Intercept {
        strategy: Strategy::StaleWhileRevalidate,
        generation: "ansury-x-static-v0".to_string(),
      }
    );
  }
}
