//! Asset cache layer: cache-first interception over a versioned store.

use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::storage::CacheStorage;
use super::traits::{request_key, CacheEntry, CacheResult};
use crate::error::{ActivationError, FetchError, InstallationError, StorageError};
use crate::net::{Fetch, Request, Response};

/// Cache-first asset cache with exactly one live generation.
///
/// Lookups never revalidate: once an asset is stored it is served from the
/// cache until its generation is pruned.
pub struct AssetCache<S: CacheStorage> {
  storage: Arc<S>,
  /// Generation tag new entries are written to
  generation: String,
  /// Path fragment identifying API calls, which are never cached
  api_prefix: String,
}

impl<S: CacheStorage> AssetCache<S> {
  /// Create a new asset cache with the given storage backend.
  pub fn new(storage: S, generation: impl Into<String>, api_prefix: impl Into<String>) -> Self {
    Self {
      storage: Arc::new(storage),
      generation: generation.into(),
      api_prefix: api_prefix.into(),
    }
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  /// Whether `url` addresses the backend API rather than a static asset.
  pub fn is_api(&self, url: &Url) -> bool {
    url.path().contains(&self.api_prefix)
  }

  /// Fetch every manifest asset and store them under the current generation.
  ///
  /// Nothing is stored unless every asset came back with a success status.
  /// Each asset may appear only once; URLs differing only by fragment count as
  /// the same asset.
  pub async fn install<F>(&self, assets: &[Url], fetcher: &F) -> Result<usize, InstallationError>
  where
    F: Fetch + ?Sized,
  {
    if let Some(api) = assets.iter().find(|url| self.is_api(url)) {
      return Err(InstallationError::ApiAsset {
        url: api.to_string(),
      });
    }

    let mut seen = BTreeSet::new();
    if let Some(duplicate) = assets.iter().find(|url| !seen.insert(request_key(url))) {
      return Err(InstallationError::DuplicateAsset {
        url: duplicate.to_string(),
      });
    }

    info!(generation = %self.generation, assets = assets.len(), "Installing asset generation");

    let entries = try_join_all(assets.iter().map(|url| async move {
      let response = fetcher
        .fetch(Request::get(url.clone()))
        .await
        .map_err(|source| InstallationError::Fetch {
          url: url.to_string(),
          source,
        })?;

      if !response.is_success() {
        return Err(InstallationError::BadStatus {
          url: url.to_string(),
          status: response.status,
        });
      }

      Ok(CacheEntry::from_response(request_key(url), &response))
    }))
    .await?;

    self.storage.install_generation(&self.generation, &entries)?;

    info!(generation = %self.generation, stored = entries.len(), "Asset generation installed");
    Ok(entries.len())
  }

  /// Delete every generation other than the current one.
  ///
  /// Refuses to prune anything until the current generation is installed, so a
  /// failed install leaves the previous generation serving.
  pub fn activate(&self) -> Result<Vec<String>, ActivationError> {
    let generations = self.storage.generations()?;

    let installed = generations
      .iter()
      .any(|g| g.name == self.generation && g.installed);
    if !installed {
      return Err(ActivationError::NotInstalled(self.generation.clone()));
    }

    let mut deleted = Vec::new();
    for generation in generations.into_iter().filter(|g| g.name != self.generation) {
      if self.storage.delete_generation(&generation.name)? {
        info!(generation = %generation.name, "Deleted old asset generation");
        deleted.push(generation.name);
      }
    }

    Ok(deleted)
  }

  /// Answer a request cache-first.
  ///
  /// 1. GET with a stored exact match: return it, no network
  /// 2. Otherwise fetch from the network
  /// 3. Store a copy of same-origin 200 responses, except API calls
  ///
  /// Storage failures never fail the request; they only cost a cache hit or write.
  pub async fn handle<F>(&self, request: Request, fetcher: &F) -> Result<CacheResult<Response>, FetchError>
  where
    F: Fetch + ?Sized,
  {
    if !request.is_get() {
      return fetcher.fetch(request).await.map(CacheResult::passthrough);
    }

    let key = request_key(&request.url);

    match self.storage.match_entry(&key) {
      Ok(Some(cached)) => {
        debug!(url = %key, generation = %cached.generation, "Cache hit");
        return Ok(CacheResult::from_cache(
          cached.entry.into_response(request.url),
          cached.cached_at,
        ));
      }
      Ok(None) => debug!(url = %key, "Cache miss"),
      Err(e) => warn!(url = %key, error = %e, "Cache lookup failed, going to network"),
    }

    let is_api = self.is_api(&request.url);
    let response = fetcher.fetch(request).await?;

    if is_api || !response.is_cacheable() {
      return Ok(CacheResult::passthrough(response));
    }

    match self.store(&key, &response) {
      Ok(()) => Ok(CacheResult::from_network(response)),
      Err(e) => {
        warn!(url = %key, error = %e, "Failed to cache response");
        Ok(CacheResult::passthrough(response))
      }
    }
  }

  fn store(&self, key: &str, response: &Response) -> Result<(), StorageError> {
    let entry = CacheEntry::from_response(key.to_string(), response);
    self.storage.put_entry(&self.generation, &entry)
  }
}

impl<S: CacheStorage> Clone for AssetCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      generation: self.generation.clone(),
      api_prefix: self.api_prefix.clone(),
    }
  }
}
