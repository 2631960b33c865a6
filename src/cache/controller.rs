//! Cache controller: generation lifecycle and cache-first serving.
//!
//! One controller manages one cache generation. `install` snapshots the
//! asset manifest atomically, `activate` purges every other generation and
//! claims connected clients, and `serve` answers requests cache-first while
//! refreshing the cache from the network in the background.

use futures::future;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::clients::ClientRegistry;
use crate::net::{AssetFetcher, FetchError};

use super::store::{AssetStore, StoreError};
use super::types::{AssetSnapshot, LifecycleState, RequestKey, Served};

/// Cache failures, per operation:
///
/// `AssetFetchFailure` is fatal to an install (the generation never becomes
/// active; a previously active generation keeps serving). `NetworkUnavailable`
/// is raised only when a request has neither a cached copy nor a reachable
/// origin. Background-refresh errors never surface here at all.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("failed to fetch {url} while installing: {reason}")]
  AssetFetchFailure { url: Url, reason: String },
  #[error("network unavailable and no cached copy of {url}")]
  NetworkUnavailable {
    url: Url,
    #[source]
    source: FetchError,
  },
  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Controller for one cache generation.
pub struct CacheController<S, F> {
  store: Arc<S>,
  fetcher: Arc<F>,
  generation: String,
  manifest: Vec<Url>,
  clients: ClientRegistry,
  skip_waiting: bool,
  state: Mutex<LifecycleState>,
}

impl<S, F> CacheController<S, F>
where
  S: AssetStore + 'static,
  F: AssetFetcher,
{
  pub fn new(
    store: S,
    fetcher: F,
    generation: impl Into<String>,
    manifest: Vec<Url>,
    clients: ClientRegistry,
  ) -> Self {
    Self {
      store: Arc::new(store),
      fetcher: Arc::new(fetcher),
      generation: generation.into(),
      manifest,
      clients,
      skip_waiting: false,
      state: Mutex::new(LifecycleState::Idle),
    }
  }

  /// Activate immediately after a successful install instead of waiting for
  /// an explicit `activate` call.
  pub fn with_skip_waiting(mut self, skip_waiting: bool) -> Self {
    self.skip_waiting = skip_waiting;
    self
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn manifest(&self) -> &[Url] {
    &self.manifest
  }

  /// The lifecycle state as last driven by this controller.
  pub fn state(&self) -> LifecycleState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, next: LifecycleState) {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
  }

  /// The lifecycle state, consulting the store to detect supersession:
  /// an active generation that no longer exists has been purged by a newer
  /// generation's activation.
  pub fn probe_state(&self) -> Result<LifecycleState, CacheError> {
    let state = self.state();
    if state == LifecycleState::Active
      && !self
        .store
        .list_generations()?
        .iter()
        .any(|g| g == &self.generation)
    {
      self.set_state(LifecycleState::Superseded);
      return Ok(LifecycleState::Superseded);
    }
    Ok(state)
  }

  /// Fetch and store every manifest asset.
  ///
  /// All-or-nothing: any unreachable asset or non-success status aborts the
  /// install and nothing is written. With skip-waiting set, a successful
  /// install activates immediately.
  pub async fn install(&self) -> Result<(), CacheError> {
    self.set_state(LifecycleState::Installing);

    match self.fetch_manifest().await {
      Ok(entries) => {
        self.store.put_all(&self.generation, &entries)?;
        self.set_state(LifecycleState::Installed);
        tracing::info!(
          generation = %self.generation,
          assets = entries.len(),
          "installed cache generation"
        );
      }
      Err(e) => {
        self.set_state(LifecycleState::Idle);
        return Err(e);
      }
    }

    if self.skip_waiting {
      self.activate()?;
    }

    Ok(())
  }

  async fn fetch_manifest(&self) -> Result<Vec<(RequestKey, AssetSnapshot)>, CacheError> {
    let fetches = self.manifest.iter().map(|url| {
      let key = RequestKey::get(url.clone());
      let fut = self.fetcher.fetch(&key);
      async move {
        match fut.await {
          Ok(snapshot) if snapshot.is_success() => Ok((key, snapshot)),
          Ok(snapshot) => Err(CacheError::AssetFetchFailure {
            url: key.url().clone(),
            reason: format!("unexpected status {}", snapshot.status),
          }),
          Err(e) => Err(CacheError::AssetFetchFailure {
            url: key.url().clone(),
            reason: e.to_string(),
          }),
        }
      }
    });

    future::try_join_all(fetches).await
  }

  /// Make this generation current: purge every other generation from the
  /// store, then take control of all connected clients.
  pub fn activate(&self) -> Result<(), CacheError> {
    self.set_state(LifecycleState::Activating);

    for generation in self.store.list_generations()? {
      if generation != self.generation {
        self.store.delete_generation(&generation)?;
        tracing::info!(stale = %generation, "purged superseded cache generation");
      }
    }

    self.clients.claim_all();
    self.set_state(LifecycleState::Active);
    tracing::info!(generation = %self.generation, "cache generation active");

    Ok(())
  }

  /// Serve one request cache-first.
  ///
  /// Returns `Ok(None)` for requests the cache must not handle (non-GET or
  /// non-HTTP). Otherwise the cached snapshot, if any, is returned without
  /// waiting on the network; the network fetch proceeds in the background,
  /// writes successful responses back (last write wins) and posts an update
  /// notice to status pages when the refreshed body differs from what was
  /// cached. With no cached snapshot the network response is awaited and
  /// returned whatever its status; a transport failure then surfaces as
  /// `NetworkUnavailable`.
  pub async fn serve(&self, key: &RequestKey) -> Result<Option<Served>, CacheError> {
    if !key.is_interceptable() {
      return Ok(None);
    }

    let cached = self.store.get(&self.generation, key)?;

    // The network branch always runs; the receiver is only consumed when
    // there was no cached response to return first.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let fut = self.fetcher.fetch(key);
    let store = Arc::clone(&self.store);
    let clients = self.clients.clone();
    let generation = self.generation.clone();
    let prior_body = cached.as_ref().map(|stored| stored.snapshot.body.clone());
    let request = key.clone();

    tokio::spawn(async move {
      let result = fut.await;

      match &result {
        Ok(snapshot) if snapshot.is_success() => {
          if let Err(e) = store.put(&generation, &request, snapshot) {
            tracing::warn!(url = %request.url(), error = %e, "failed to write back refreshed asset");
          }
          if let Some(prior) = prior_body {
            if prior != snapshot.body {
              let notified = clients.broadcast_update(request.url());
              tracing::debug!(url = %request.url(), notified, "cached content changed");
            }
          }
        }
        Ok(snapshot) => {
          tracing::debug!(url = %request.url(), status = snapshot.status, "refresh not cached");
        }
        Err(e) => {
          // Background refresh errors are swallowed; the caller already has
          // the cached response or is waiting on this result.
          tracing::debug!(url = %request.url(), error = %e, "refresh failed");
        }
      }

      // Ignore send errors - receiver is gone once a cached response was
      // returned.
      let _ = tx.send(result);
    });

    match cached {
      Some(stored) => Ok(Some(Served::from_cache(stored))),
      None => match rx.recv().await {
        Some(Ok(snapshot)) => Ok(Some(Served::from_network(snapshot))),
        Some(Err(source)) => Err(CacheError::NetworkUnavailable {
          url: key.url().clone(),
          source,
        }),
        None => Err(CacheError::NetworkUnavailable {
          url: key.url().clone(),
          source: FetchError::Transport {
            url: key.url().to_string(),
            reason: "fetch task aborted".to_string(),
          },
        }),
      },
    }
  }

  /// Delete every generation from the store, this one included.
  ///
  /// Returns how many generations were removed.
  pub fn reset(&self) -> Result<usize, CacheError> {
    let generations = self.store.list_generations()?;
    for generation in &generations {
      self.store.delete_generation(generation)?;
    }
    self.set_state(LifecycleState::Idle);
    Ok(generations.len())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{AssetSnapshot, MemoryStore, ServedFrom};
  use crate::clients::{ClientHandle, ClientKind, ClientMessage};
  use crate::net::BoxFuture;
  use std::collections::HashMap;
  use std::time::Duration;
  use tokio::time::timeout;

  #[derive(Clone)]
  enum Behavior {
    Respond(AssetSnapshot),
    Fail,
    Hang,
  }

  /// Scripted fetcher: one behavior per URL, connection refused otherwise.
  #[derive(Default)]
  struct StubFetcher {
    behaviors: Mutex<HashMap<String, Behavior>>,
  }

  impl StubFetcher {
    fn respond(&self, url: &str, snapshot: AssetSnapshot) {
      self
        .behaviors
        .lock()
        .unwrap()
        .insert(url.to_string(), Behavior::Respond(snapshot));
    }

    fn fail(&self, url: &str) {
      self
        .behaviors
        .lock()
        .unwrap()
        .insert(url.to_string(), Behavior::Fail);
    }

    fn hang(&self, url: &str) {
      self
        .behaviors
        .lock()
        .unwrap()
        .insert(url.to_string(), Behavior::Hang);
    }
  }

  impl AssetFetcher for Arc<StubFetcher> {
    fn fetch(&self, key: &RequestKey) -> BoxFuture<Result<AssetSnapshot, FetchError>> {
      let behavior = self.behaviors.lock().unwrap().get(key.url().as_str()).cloned();
      let url = key.url().to_string();
      Box::pin(async move {
        match behavior {
          Some(Behavior::Respond(snapshot)) => Ok(snapshot),
          Some(Behavior::Hang) => future::pending().await,
          Some(Behavior::Fail) | None => Err(FetchError::Transport {
            url,
            reason: "connection refused".to_string(),
          }),
        }
      })
    }
  }

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn snapshot(body: &str) -> AssetSnapshot {
    AssetSnapshot {
      status: 200,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: body.as_bytes().to_vec(),
    }
  }

  fn snapshot_with_status(status: u16, body: &str) -> AssetSnapshot {
    AssetSnapshot {
      status,
      ..snapshot(body)
    }
  }

  struct Fixture {
    controller: CacheController<Arc<MemoryStore>, Arc<StubFetcher>>,
    store: Arc<MemoryStore>,
    fetcher: Arc<StubFetcher>,
    clients: ClientRegistry,
    status_page: ClientHandle,
  }

  fn fixture(generation: &str, manifest: &[&str]) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(StubFetcher::default());
    let clients = ClientRegistry::new();
    let status_page = clients.connect(ClientKind::StatusPage);
    let manifest = manifest.iter().map(|u| url(u)).collect();
    let controller = CacheController::new(
      Arc::clone(&store),
      Arc::clone(&fetcher),
      generation,
      manifest,
      clients.clone(),
    );
    Fixture {
      controller,
      store,
      fetcher,
      clients,
      status_page,
    }
  }

  #[tokio::test]
  async fn test_install_stores_every_manifest_asset() {
    let f = fixture(
      "v1",
      &[
        "https://example.net/index.html",
        "https://example.net/app.js",
        "https://example.net/styles.css",
      ],
    );
    for asset in f.controller.manifest() {
      f.fetcher.respond(asset.as_str(), snapshot(asset.path()));
    }

    f.controller.install().await.unwrap();

    assert_eq!(f.controller.state(), LifecycleState::Installed);
    for asset in f.controller.manifest() {
      let key = RequestKey::get(asset.clone());
      assert!(f.store.get("v1", &key).unwrap().is_some());
    }
  }

  #[tokio::test]
  async fn test_install_aborts_when_any_asset_unreachable() {
    let f = fixture(
      "v1",
      &["https://example.net/index.html", "https://example.net/app.js"],
    );
    f.fetcher
      .respond("https://example.net/index.html", snapshot("shell"));
    f.fetcher.fail("https://example.net/app.js");

    let err = f.controller.install().await.unwrap_err();
    assert!(matches!(err, CacheError::AssetFetchFailure { .. }));

    // No partial install: nothing was written at all.
    assert!(f.store.list_generations().unwrap().is_empty());
    assert_eq!(f.controller.state(), LifecycleState::Idle);
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let f = fixture("v1", &["https://example.net/index.html"]);
    f.fetcher.respond(
      "https://example.net/index.html",
      snapshot_with_status(404, "not found"),
    );

    let err = f.controller.install().await.unwrap_err();
    assert!(matches!(err, CacheError::AssetFetchFailure { .. }));
    assert!(f.store.list_generations().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_skip_waiting_activates_after_install() {
    let f = fixture("v1", &["https://example.net/index.html"]);
    f.fetcher
      .respond("https://example.net/index.html", snapshot("shell"));

    let controller = f.controller.with_skip_waiting(true);
    controller.install().await.unwrap();

    assert_eq!(controller.state(), LifecycleState::Active);
  }

  #[tokio::test]
  async fn test_activate_purges_every_other_generation() {
    let f = fixture("v2", &["https://example.net/index.html"]);
    let key = RequestKey::get(url("https://example.net/index.html"));
    f.store.put("v1", &key, &snapshot("old shell")).unwrap();
    f.fetcher
      .respond("https://example.net/index.html", snapshot("new shell"));

    f.controller.install().await.unwrap();
    f.controller.activate().unwrap();

    assert_eq!(f.store.list_generations().unwrap(), vec!["v2"]);
    assert_eq!(f.controller.state(), LifecycleState::Active);
    assert_eq!(f.clients.controlled_count(), 1);
  }

  #[tokio::test]
  async fn test_serve_returns_cache_without_waiting_for_network() {
    let f = fixture("v1", &["https://example.net/app.js"]);
    f.fetcher
      .respond("https://example.net/app.js", snapshot("cached body"));
    f.controller.install().await.unwrap();

    // Network now hangs forever; the cached branch must win the race.
    f.fetcher.hang("https://example.net/app.js");
    let key = RequestKey::get(url("https://example.net/app.js"));
    let served = timeout(Duration::from_millis(200), f.controller.serve(&key))
      .await
      .expect("serve must not wait on the network")
      .unwrap()
      .unwrap();

    assert_eq!(served.source, ServedFrom::Cache);
    assert_eq!(served.snapshot.body, b"cached body");
    assert!(served.cached_at.is_some());
  }

  #[tokio::test]
  async fn test_serve_uncached_awaits_network_and_writes_back() {
    let f = fixture("v1", &[]);
    f.fetcher
      .respond("https://example.net/new.js", snapshot("fresh"));

    let key = RequestKey::get(url("https://example.net/new.js"));
    let served = f.controller.serve(&key).await.unwrap().unwrap();

    assert_eq!(served.source, ServedFrom::Network);
    assert_eq!(served.snapshot.body, b"fresh");
    // The write-back happens before the network result is delivered.
    assert!(f.store.get("v1", &key).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_serve_uncached_returns_error_statuses_unchanged() {
    let f = fixture("v1", &[]);
    f.fetcher.respond(
      "https://example.net/missing.js",
      snapshot_with_status(404, "not found"),
    );

    let key = RequestKey::get(url("https://example.net/missing.js"));
    let served = f.controller.serve(&key).await.unwrap().unwrap();

    assert_eq!(served.snapshot.status, 404);
    // Error responses are returned but never cached.
    assert!(f.store.get("v1", &key).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_serve_offline_falls_back_to_cache() {
    let f = fixture("v1", &["https://example.net/app.js"]);
    f.fetcher
      .respond("https://example.net/app.js", snapshot("cached body"));
    f.controller.install().await.unwrap();

    f.fetcher.fail("https://example.net/app.js");
    let key = RequestKey::get(url("https://example.net/app.js"));
    let served = f.controller.serve(&key).await.unwrap().unwrap();

    assert_eq!(served.source, ServedFrom::Cache);
    assert_eq!(served.snapshot.body, b"cached body");
  }

  #[tokio::test]
  async fn test_serve_offline_without_cache_fails() {
    let f = fixture("v1", &[]);
    f.fetcher.fail("https://example.net/app.js");

    let key = RequestKey::get(url("https://example.net/app.js"));
    let err = f.controller.serve(&key).await.unwrap_err();
    assert!(matches!(err, CacheError::NetworkUnavailable { .. }));
  }

  #[tokio::test]
  async fn test_serve_passes_through_unsafe_requests() {
    let f = fixture("v1", &[]);

    let post = RequestKey::new("POST", url("https://example.net/submit"));
    assert!(f.controller.serve(&post).await.unwrap().is_none());

    let file = RequestKey::get(url("file:///etc/hosts"));
    assert!(f.controller.serve(&file).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_changed_body_notifies_status_page_once() {
    let mut f = fixture("v1", &["https://example.net/app.js"]);
    f.fetcher
      .respond("https://example.net/app.js", snapshot("old"));
    f.controller.install().await.unwrap();

    f.fetcher
      .respond("https://example.net/app.js", snapshot("new"));
    let key = RequestKey::get(url("https://example.net/app.js"));
    let served = f.controller.serve(&key).await.unwrap().unwrap();

    // Caller still gets the stale cached body; the notice arrives async.
    assert_eq!(served.snapshot.body, b"old");
    let message = timeout(Duration::from_secs(1), f.status_page.next())
      .await
      .expect("update notice must arrive")
      .unwrap();
    assert_eq!(
      message,
      ClientMessage::UpdateAvailable {
        url: "https://example.net/app.js".to_string()
      }
    );
    assert_eq!(f.status_page.try_next(), None);

    // The refreshed body replaced the cached one.
    let stored = f.store.get("v1", &key).unwrap().unwrap();
    assert_eq!(stored.snapshot.body, b"new");
  }

  #[tokio::test]
  async fn test_unchanged_body_sends_no_notice() {
    let mut f = fixture("v1", &["https://example.net/app.js"]);
    f.fetcher
      .respond("https://example.net/app.js", snapshot("same"));
    f.controller.install().await.unwrap();

    let key = RequestKey::get(url("https://example.net/app.js"));
    f.controller.serve(&key).await.unwrap();

    // Give the background refresh time to finish.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.status_page.try_next(), None);
  }

  #[tokio::test]
  async fn test_failed_refresh_keeps_cached_body() {
    let mut f = fixture("v1", &["https://example.net/app.js"]);
    f.fetcher
      .respond("https://example.net/app.js", snapshot("cached"));
    f.controller.install().await.unwrap();

    f.fetcher.respond(
      "https://example.net/app.js",
      snapshot_with_status(500, "oops"),
    );
    let key = RequestKey::get(url("https://example.net/app.js"));
    f.controller.serve(&key).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let stored = f.store.get("v1", &key).unwrap().unwrap();
    assert_eq!(stored.snapshot.body, b"cached");
    assert_eq!(f.status_page.try_next(), None);
  }

  #[tokio::test]
  async fn test_probe_state_detects_supersession() {
    let f = fixture("v1", &["https://example.net/index.html"]);
    f.fetcher
      .respond("https://example.net/index.html", snapshot("shell"));
    f.controller.install().await.unwrap();
    f.controller.activate().unwrap();
    assert_eq!(f.controller.probe_state().unwrap(), LifecycleState::Active);

    // A newer generation activates against the same store.
    let newer = CacheController::new(
      Arc::clone(&f.store),
      Arc::clone(&f.fetcher),
      "v2",
      vec![url("https://example.net/index.html")],
      ClientRegistry::new(),
    );
    newer.install().await.unwrap();
    newer.activate().unwrap();

    assert_eq!(
      f.controller.probe_state().unwrap(),
      LifecycleState::Superseded
    );
  }

  #[tokio::test]
  async fn test_reset_removes_all_generations() {
    let f = fixture("v2", &["https://example.net/index.html"]);
    let key = RequestKey::get(url("https://example.net/index.html"));
    f.store.put("v1", &key, &snapshot("old")).unwrap();
    f.fetcher
      .respond("https://example.net/index.html", snapshot("new"));
    f.controller.install().await.unwrap();

    let removed = f.controller.reset().unwrap();
    assert_eq!(removed, 2);
    assert!(f.store.list_generations().unwrap().is_empty());
    assert_eq!(f.controller.state(), LifecycleState::Idle);
  }
}
