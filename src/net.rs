//! Network fetching seam for the cache controller.
//!
//! The controller races network fetches against cache lookups and runs
//! write-backs in background tasks, so the seam returns boxed `Send`
//! futures rather than borrowing from the fetcher.

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use crate::cache::{AssetSnapshot, RequestKey};

/// A boxed future that can be spawned or raced by the controller.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Fetch failures. One attempt per call; never retried here or upstream.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
  #[error("failed to build HTTP client: {0}")]
  Client(String),
  #[error("request to {url} failed: {reason}")]
  Transport { url: String, reason: String },
}

/// Something that can fetch an asset from the network.
///
/// Implementations must bypass intermediate HTTP caches so refreshed content
/// is revalidated at the origin, and must attempt the network exactly once
/// per call — no retry, no backoff, no timeout-driven abort.
pub trait AssetFetcher: Send + Sync + 'static {
  fn fetch(&self, key: &RequestKey) -> BoxFuture<Result<AssetSnapshot, FetchError>>;
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .build()
      .map_err(|e| FetchError::Client(e.to_string()))?;

    Ok(Self { client })
  }
}

impl AssetFetcher for HttpFetcher {
  fn fetch(&self, key: &RequestKey) -> BoxFuture<Result<AssetSnapshot, FetchError>> {
    let client = self.client.clone();
    let url = key.url().clone();
    let method = key.method().to_string();

    Box::pin(async move {
      let transport = |e: reqwest::Error| FetchError::Transport {
        url: url.to_string(),
        reason: e.to_string(),
      };

      let method =
        reqwest::Method::from_bytes(method.as_bytes()).map_err(|e| FetchError::Transport {
          url: url.to_string(),
          reason: e.to_string(),
        })?;

      let response = client
        .request(method, url.clone())
        // Force revalidation at the origin instead of serving an
        // intermediate HTTP cache's copy.
        .header(reqwest::header::CACHE_CONTROL, "no-cache")
        .header(reqwest::header::PRAGMA, "no-cache")
        .send()
        .await
        .map_err(transport)?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();
      let body = response.bytes().await.map_err(transport)?.to_vec();

      Ok(AssetSnapshot {
        status,
        headers,
        body,
      })
    })
  }
}
