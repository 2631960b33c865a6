//! Command execution: wires config, store, fetcher and controller together.

use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::cache::{
  AssetStore, CacheController, LifecycleState, MemoryStore, RequestKey, ServedFrom, SqliteStore,
};
use crate::clients::{ClientKind, ClientRegistry};
use crate::config::Config;
use crate::net::HttpFetcher;
use crate::radix;

/// How long `check` keeps listening after the refresh pass before deciding
/// no further notices are coming.
const CHECK_QUIESCE: Duration = Duration::from_secs(2);

/// Convert a numeral and print the result.
///
/// Needs no configuration, so it runs before any config file is loaded.
pub fn convert(value: &str, from: u32, to: u32, explain: bool) -> Result<()> {
  let result = radix::convert(value, from, to)?;
  println!("{}", result);

  if explain {
    if let Some(text) = radix::explanation(from, to) {
      println!();
      println!("{}", text);
    }
  }

  Ok(())
}

pub struct App {
  store: Arc<dyn AssetStore>,
  controller: CacheController<Arc<dyn AssetStore>, HttpFetcher>,
  clients: ClientRegistry,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let store = open_store(&config)?;
    let fetcher = HttpFetcher::new()?;
    let clients = ClientRegistry::new();

    let controller = CacheController::new(
      Arc::clone(&store),
      fetcher,
      config.cache.generation,
      config.cache.manifest,
      clients.clone(),
    )
    .with_skip_waiting(config.cache.skip_waiting);

    Ok(Self {
      store,
      controller,
      clients,
    })
  }

  /// Install the configured generation and make sure it is active.
  pub async fn sync(&self) -> Result<()> {
    self.controller.install().await?;
    if self.controller.state() != LifecycleState::Active {
      self.controller.activate()?;
    }

    println!(
      "generation {} active with {} assets",
      self.controller.generation(),
      self.controller.manifest().len()
    );
    Ok(())
  }

  /// Serve one asset through the cache and write its body to stdout.
  pub async fn get(&self, raw_url: &str) -> Result<()> {
    let url = Url::parse(raw_url).map_err(|e| eyre!("Invalid URL {}: {}", raw_url, e))?;
    let key = RequestKey::get(url);

    // The requesting context is an ordinary page client; it is claimed on
    // activation but receives no update notices.
    let _page = self.clients.connect(ClientKind::Page);

    let served = self
      .controller
      .serve(&key)
      .await?
      .ok_or_else(|| eyre!("{} is not an HTTP resource the cache can serve", raw_url))?;

    match served.source {
      ServedFrom::Cache => {
        tracing::info!(url = %key.url(), cached_at = ?served.cached_at, "served from cache")
      }
      ServedFrom::Network => tracing::info!(url = %key.url(), "served from network"),
    }
    std::io::stdout().write_all(&served.snapshot.body)?;
    Ok(())
  }

  /// Refresh every cached asset and print update notices as JSON lines.
  pub async fn check(&self) -> Result<()> {
    let mut status_page = self.clients.connect(ClientKind::StatusPage);
    tracing::debug!(client = status_page.id, "status page connected");

    // Each serve kicks off a background refresh; changed bodies produce
    // update notices on the status page channel.
    for asset in self.controller.manifest() {
      let key = RequestKey::get(asset.clone());
      if let Err(e) = self.controller.serve(&key).await {
        tracing::warn!(url = %key.url(), error = %e, "refresh failed");
      }
    }

    let mut updates = 0;
    while let Ok(Some(message)) =
      tokio::time::timeout(CHECK_QUIESCE, status_page.next()).await
    {
      println!("{}", serde_json::to_string(&message)?);
      updates += 1;
    }

    if updates == 0 {
      tracing::info!("all cached assets are up to date");
    }
    Ok(())
  }

  /// Print cache generations and the controller's lifecycle state.
  pub fn status(&self) -> Result<()> {
    let status = serde_json::json!({
      "generation": self.controller.generation(),
      "state": self.controller.probe_state()?,
      "generations": self.store.list_generations()?,
      "manifest_assets": self.controller.manifest().len(),
      "controlled_clients": self.clients.controlled_count(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
  }

  /// Delete every cache generation.
  pub fn reset(&self) -> Result<()> {
    let removed = self.controller.reset()?;
    println!("removed {} cache generation(s)", removed);
    Ok(())
  }
}

fn open_store(config: &Config) -> Result<Arc<dyn AssetStore>> {
  if config.cache.ephemeral {
    return Ok(Arc::new(MemoryStore::new()));
  }

  let store = match &config.cache.store {
    Some(path) => SqliteStore::open(path)?,
    None => SqliteStore::open_default()?,
  };
  Ok(Arc::new(store))
}
