//! Event dispatch for the worker.
//!
//! Every host interaction is an [`Event`]; [`ServiceWorker::dispatch`] turns it
//! into an [`Action`] for the host to carry out.

use color_eyre::Result;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::{CacheLayer, CacheStore, ResponseSource, Served};
use crate::config::{Config, GenerationsConfig};
use crate::http::Request;
use crate::lifecycle::{self, ActivateReport, InstallReport, Lifecycle};
use crate::network::Network;
use crate::router::{self, Route, Strategy};
use crate::sync::{MutationKind, MutationQueue, PendingMutation, SyncProcessor, SyncReport};

/// Something the host delivered to the worker.
#[derive(Debug, Clone)]
pub enum Event {
  Install,
  Activate,
  Fetch(Request),
  /// Background sync trigger carrying its tag
  Sync(String),
  /// `postMessage` payload from a page
  Message(serde_json::Value),
}

/// Messages pages send to the worker.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
  /// The page confirmed an update; activate without waiting
  SkipWaiting,
  /// The page came back online; drain every class
  SyncPendingData,
  /// Queue a write made while offline
  QueueMutation {
    kind: MutationKind,
    payload: serde_json::Value,
  },
}

/// Work completed on behalf of an event the host had to wait for.
#[derive(Debug, Clone, PartialEq)]
pub enum Completed {
  Installed(InstallReport),
  Activated(ActivateReport),
  Synced(SyncReport),
  Queued(PendingMutation),
  SkipWaiting,
}

/// What the host should do with an event.
#[derive(Debug)]
pub enum Action {
  /// Answer the intercepted request with this response
  RespondWith(Served),
  /// Do not intercept; the request goes to the network untouched
  Passthrough,
  /// Work the host kept the worker alive for has finished
  WaitUntil(Completed),
  /// Nothing to do
  Ignored,
}

pub struct ServiceWorker<S: CacheStore, Q: MutationQueue> {
  config: Arc<Config>,
  cache: CacheLayer<S>,
  sync: SyncProcessor<Q>,
  lifecycle: Mutex<Lifecycle>,
  /// Generations of the older Active version, serving until this one activates
  governing: Option<GenerationsConfig>,
}

impl<S: CacheStore + 'static, Q: MutationQueue> ServiceWorker<S, Q> {
  /// Build a worker in the Installing phase of the configured version.
  pub fn new(config: Config, store: Arc<S>, queue: Arc<Q>, network: Arc<dyn Network>) -> Self {
    let lifecycle = Lifecycle::new(config.generations.version());
    Self::with_lifecycle(config, store, queue, network, lifecycle)
  }

  /// Build a worker resuming a previously saved lifecycle.
  pub fn with_lifecycle(
    config: Config,
    store: Arc<S>,
    queue: Arc<Q>,
    network: Arc<dyn Network>,
    lifecycle: Lifecycle,
  ) -> Self {
    let config = Arc::new(config);
    Self {
      cache: CacheLayer::new(store, Arc::clone(&network)),
      sync: SyncProcessor::new(queue, network, Arc::clone(&config)),
      config,
      lifecycle: Mutex::new(lifecycle),
      governing: None,
    }
  }

  /// Keep serving from an older version's generations while this version is
  /// not Active, e.g. after its install failed.
  pub fn with_governing(mut self, generations: Option<GenerationsConfig>) -> Self {
    self.governing = generations;
    self
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn store(&self) -> &Arc<S> {
    self.cache.storage()
  }

  pub fn queue(&self) -> &Arc<Q> {
    self.sync.queue()
  }

  /// Snapshot of the current lifecycle state.
  pub async fn lifecycle(&self) -> Lifecycle {
    self.lifecycle.lock().await.clone()
  }

  pub async fn dispatch(&self, event: Event) -> Result<Action> {
    match event {
      Event::Install => {
        // The lock is not held across the fetches; requests and messages keep flowing
        let was_active = self.lifecycle.lock().await.begin_install()?;
        let result = lifecycle::precache(
          self.cache.storage().as_ref(),
          self.cache.network().as_ref(),
          &self.config,
        )
        .await;
        let report = self
          .lifecycle
          .lock()
          .await
          .finish_install(was_active, result)?;
        Ok(Action::WaitUntil(Completed::Installed(report)))
      }
      Event::Activate => {
        let mut lifecycle = self.lifecycle.lock().await;
        let report = lifecycle.activate(self.cache.storage().as_ref(), &self.config)?;
        Ok(Action::WaitUntil(Completed::Activated(report)))
      }
      Event::Fetch(request) => self.handle_fetch(request).await,
      Event::Sync(tag) => {
        info!("Background sync triggered: {}", tag);
        match self.sync.handle_tag(&tag).await? {
          Some(report) => Ok(Action::WaitUntil(Completed::Synced(report))),
          None => Ok(Action::Ignored),
        }
      }
      Event::Message(payload) => self.handle_message(payload).await,
    }
  }

  /// Serve a request the way the host does: intercepted requests get the
  /// worker's response, passed-through ones go to the network untouched.
  /// An unreachable network on passthrough is an `Err`, as it is for a page.
  pub async fn fetch(&self, request: Request) -> Result<Served> {
    match self.handle_fetch(request.clone()).await? {
      Action::RespondWith(served) => Ok(served),
      _ => {
        debug!("Forwarding {} {}", request.method, request.url);
        let response = self.cache.network().fetch(&request).await?;
        Ok(Served::new(response, ResponseSource::Network))
      }
    }
  }

  async fn handle_fetch(&self, request: Request) -> Result<Action> {
    let route = if self.lifecycle.lock().await.is_active() {
      router::select(&request, &self.config)
    } else if let Some(generations) = &self.governing {
      router::select_for(&request, &self.config, generations)
    } else {
      return Ok(Action::Passthrough);
    };

    let (strategy, generation) = match route {
      Route::Passthrough => return Ok(Action::Passthrough),
      Route::Intercept {
        strategy,
        generation,
      } => (strategy, generation),
    };
    debug!("{} {} via {}", request.method, request.url, strategy);

    let served = match strategy {
      Strategy::NetworkFirst => self.cache.network_first(&request, &generation).await?,
      Strategy::CacheFirst => self.cache.cache_first(&request, &generation).await?,
      Strategy::StaleWhileRevalidate => {
        self
          .cache
          .stale_while_revalidate(&request, &generation)
          .await?
      }
    };
    Ok(Action::RespondWith(served))
  }

  async fn handle_message(&self, payload: serde_json::Value) -> Result<Action> {
    let message: ClientMessage = match serde_json::from_value(payload.clone()) {
      Ok(message) => message,
      Err(e) => {
        debug!("Ignoring client message {}: {}", payload, e);
        return Ok(Action::Ignored);
      }
    };

    match message {
      ClientMessage::SkipWaiting => {
        self.lifecycle.lock().await.request_skip_waiting();
        Ok(Action::WaitUntil(Completed::SkipWaiting))
      }
      ClientMessage::SyncPendingData => {
        let report = self.sync.drain_all().await?;
        Ok(Action::WaitUntil(Completed::Synced(report)))
      }
      ClientMessage::QueueMutation { kind, payload } => {
        let mutation = self.sync.queue().enqueue(kind, payload)?;
        debug!("Queued {} mutation {}", kind, mutation.id);
        Ok(Action::WaitUntil(Completed::Queued(mutation)))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryCacheStore, RequestKey};
  use crate::http::{Destination, Method, Response};
  use crate::lifecycle::Phase;
  use crate::network::testing::ScriptedNetwork;
  use crate::sync::MemoryMutationQueue;
  use serde_json::json;
  use std::time::Duration;
  use url::Url;

  type TestWorker = ServiceWorker<MemoryCacheStore, MemoryMutationQueue>;

  fn worker() -> (TestWorker, Arc<ScriptedNetwork>) {
    let network = Arc::new(ScriptedNetwork::new());
    for path in ["/", "/index.html", "/manifest.json", "/assets/hero-banner.jpg"] {
      network.respond(&format!("https://app.test{}", path), Response::new(200, path));
    }
    let worker = ServiceWorker::new(
      Config::for_origin("https://app.test"),
      Arc::new(MemoryCacheStore::new()),
      Arc::new(MemoryMutationQueue::new()),
      network.clone(),
    );
    (worker, network)
  }

  async fn activated() -> (TestWorker, Arc<ScriptedNetwork>) {
    let (worker, network) = worker();
    worker.dispatch(Event::Install).await.unwrap();
    worker.dispatch(Event::Activate).await.unwrap();
    (worker, network)
  }

  fn get(path: &str) -> Request {
    Request::get(Url::parse("https://app.test").unwrap().join(path).unwrap())
  }

  fn served(action: Action) -> Served {
    match action {
      Action::RespondWith(served) => served,
      other => panic!("expected a response, got {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_install_then_activate() {
    let (worker, _) = worker();

    let action = worker.dispatch(Event::Install).await.unwrap();
    assert!(matches!(
      action,
      Action::WaitUntil(Completed::Installed(InstallReport { cached: 4, .. }))
    ));
    assert_eq!(worker.lifecycle().await.phase, Phase::Installed);

    worker.dispatch(Event::Activate).await.unwrap();
    assert_eq!(worker.lifecycle().await.phase, Phase::Active);
  }

  #[tokio::test]
  async fn test_failed_install_is_reported() {
    let (worker, network) = worker();
    network.fail("https://app.test/assets/hero-banner.jpg");

    assert!(worker.dispatch(Event::Install).await.is_err());
    assert_eq!(worker.lifecycle().await.phase, Phase::Redundant);
  }

  #[tokio::test]
  async fn test_fetch_before_activation_passes_through() {
    let (worker, network) = worker();
    let action = worker.dispatch(Event::Fetch(get("/api/habits"))).await.unwrap();
    assert!(matches!(action, Action::Passthrough));
    assert_eq!(network.calls(), 0);
  }

  #[tokio::test]
  async fn test_requests_served_while_install_in_flight() {
    let (worker, network) = activated().await;
    network.respond("https://app.test/api/habits", Response::new(200, "[1]"));
    network.delay(
      "https://app.test/assets/hero-banner.jpg",
      Duration::from_millis(500),
      Response::new(200, "banner"),
    );

    let during_install = async {
      // Let the install reach its delayed fetch first
      tokio::task::yield_now().await;
      let fetch = tokio::time::timeout(
        Duration::from_millis(200),
        worker.dispatch(Event::Fetch(get("/api/habits"))),
      )
      .await;
      let message = tokio::time::timeout(
        Duration::from_millis(200),
        worker.dispatch(Event::Message(json!({"type": "SKIP_WAITING"}))),
      )
      .await;
      (fetch, message)
    };
    let (installed, (fetch, message)) =
      tokio::join!(worker.dispatch(Event::Install), during_install);

    installed.unwrap();
    let fetch = fetch.expect("fetch waited for the install to finish");
    assert_eq!(served(fetch.unwrap()).response.body, b"[1]");
    let message = message.expect("message waited for the install to finish");
    assert!(matches!(message.unwrap(), Action::WaitUntil(Completed::SkipWaiting)));
    assert_eq!(worker.lifecycle().await.phase, Phase::Active);
  }

  #[tokio::test]
  async fn test_failed_upgrade_keeps_serving_previous_generations() {
    let previous = GenerationsConfig {
      shell: "ansury-x-v0".to_string(),
      static_assets: "ansury-x-static-v0".to_string(),
      api: "ansury-x-api-v0".to_string(),
    };
    let store = Arc::new(MemoryCacheStore::new());
    store
      .put(
        "ansury-x-api-v0",
        &RequestKey::for_request(&get("/api/habits")),
        &Response::new(200, "[0]"),
      )
      .unwrap();
    // Nothing is scripted, so the device is offline
    let network = Arc::new(ScriptedNetwork::new());
    let worker = ServiceWorker::new(
      Config::for_origin("https://app.test"),
      store,
      Arc::new(MemoryMutationQueue::new()),
      network,
    )
    .with_governing(Some(previous));

    assert!(worker.dispatch(Event::Install).await.is_err());
    assert_eq!(worker.lifecycle().await.phase, Phase::Redundant);

    let served = served(worker.dispatch(Event::Fetch(get("/api/habits"))).await.unwrap());
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"[0]");
  }

  #[tokio::test]
  async fn test_fetch_forwards_passthrough_to_network() {
    let (worker, network) = activated().await;
    network.respond("https://app.test/api/journal", Response::new(201, "created"));

    let mut request = get("/api/journal");
    request.method = Method::Post;
    request.body = Some(b"{\"content\":\"x\"}".to_vec());
    let served = worker.fetch(request).await.unwrap();

    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.status, 201);
    let sent = network.requests().pop().unwrap();
    assert_eq!(sent.method, Method::Post);
    assert_eq!(sent.body.as_deref(), Some(&b"{\"content\":\"x\"}"[..]));
    assert!(worker.store().keys("ansury-x-api-v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_fetch_before_activation_reaches_network() {
    let (worker, network) = worker();
    network.respond("https://app.test/api/habits", Response::new(200, "[2]"));

    let served = worker.fetch(get("/api/habits")).await.unwrap();
    assert_eq!(served.response.body, b"[2]");
    assert!(worker.store().keys("ansury-x-api-v1").unwrap().is_empty());

    network.fail("https://app.test/api/habits");
    assert!(worker.fetch(get("/api/habits")).await.is_err());
  }

  #[tokio::test]
  async fn test_fetch_returns_intercepted_response() {
    let (worker, network) = activated().await;
    let calls = network.calls();
    let request = get("/assets/hero-banner.jpg").with_destination(Destination::Image);

    let served = worker.fetch(request).await.unwrap();
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(network.calls(), calls);
  }

  #[tokio::test]
  async fn test_non_get_passes_through() {
    let (worker, _) = activated().await;
    let mut request = get("/api/journal");
    request.method = Method::Post;
    let action = worker.dispatch(Event::Fetch(request)).await.unwrap();
    assert!(matches!(action, Action::Passthrough));
  }

  #[tokio::test]
  async fn test_api_offline_falls_back_to_cache() {
    let (worker, network) = activated().await;
    network.respond("https://app.test/api/habits", Response::new(200, "[1]"));
    worker.dispatch(Event::Fetch(get("/api/habits"))).await.unwrap();

    network.fail("https://app.test/api/habits");
    let served = served(worker.dispatch(Event::Fetch(get("/api/habits"))).await.unwrap());
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body, b"[1]");

    let key = RequestKey::for_request(&get("/api/habits"));
    assert!(worker.store().get("ansury-x-api-v1", &key).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_precached_asset_served_without_network() {
    let (worker, network) = activated().await;
    let calls = network.calls();

    let request = get("/assets/hero-banner.jpg").with_destination(Destination::Image);
    let served = served(worker.dispatch(Event::Fetch(request)).await.unwrap());
    assert_eq!(served.response.body, b"/assets/hero-banner.jpg");
    assert_eq!(network.calls(), calls);
  }

  #[tokio::test]
  async fn test_shell_served_stale_and_refreshed() {
    let (worker, network) = activated().await;
    network.respond("https://app.test/index.html", Response::new(200, "v2"));

    let served = served(worker.dispatch(Event::Fetch(get("/index.html"))).await.unwrap());
    assert_eq!(served.response.body, b"/index.html");
    served.revalidation.unwrap().await.unwrap();

    let again = served_body(&worker, "/index.html").await;
    assert_eq!(again, b"v2");
  }

  async fn served_body(worker: &TestWorker, path: &str) -> Vec<u8> {
    served(worker.dispatch(Event::Fetch(get(path))).await.unwrap())
      .response
      .body
  }

  #[tokio::test]
  async fn test_queue_message_then_sync_trigger() {
    let (worker, network) = worker();
    network.respond("https://app.test/api/habits/complete", Response::new(201, "{}"));

    let message = json!({
      "type": "QUEUE_MUTATION",
      "kind": "habit-completion",
      "payload": {"habit_id": "h1", "completed": true}
    });
    let action = worker.dispatch(Event::Message(message)).await.unwrap();
    assert!(matches!(action, Action::WaitUntil(Completed::Queued(_))));
    assert_eq!(worker.queue().pending(MutationKind::HabitCompletion).unwrap().len(), 1);

    let action = worker
      .dispatch(Event::Sync("habit-completion".to_string()))
      .await
      .unwrap();
    assert!(matches!(
      action,
      Action::WaitUntil(Completed::Synced(SyncReport { synced: 1, remaining: 0 }))
    ));
    assert!(worker.queue().pending(MutationKind::HabitCompletion).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_unknown_sync_tag_ignored() {
    let (worker, _) = worker();
    let action = worker.dispatch(Event::Sync("other".to_string())).await.unwrap();
    assert!(matches!(action, Action::Ignored));
  }

  #[tokio::test]
  async fn test_sync_pending_data_drains_everything() {
    let (worker, network) = worker();
    network.respond("https://app.test/api/journal", Response::new(200, "{}"));
    worker
      .queue()
      .enqueue(MutationKind::JournalEntry, json!({"content": "x"}))
      .unwrap();
    worker
      .queue()
      .enqueue(MutationKind::HabitCompletion, json!({"habit_id": "h1"}))
      .unwrap();

    let action = worker
      .dispatch(Event::Message(json!({"type": "SYNC_PENDING_DATA"})))
      .await
      .unwrap();
    assert!(matches!(
      action,
      Action::WaitUntil(Completed::Synced(SyncReport { synced: 1, remaining: 1 }))
    ));
  }

  #[tokio::test]
  async fn test_skip_waiting_message() {
    let (worker, _) = worker();
    let action = worker
      .dispatch(Event::Message(json!({"type": "SKIP_WAITING"})))
      .await
      .unwrap();
    assert!(matches!(action, Action::WaitUntil(Completed::SkipWaiting)));
    assert!(worker.lifecycle().await.skip_waiting);
  }

  #[tokio::test]
  async fn test_unknown_message_ignored() {
    let (worker, _) = worker();
    for message in [json!({"type": "PING"}), json!("SKIP_WAITING"), json!(null)] {
      let action = worker.dispatch(Event::Message(message)).await.unwrap();
      assert!(matches!(action, Action::Ignored));
    }
  }
}
