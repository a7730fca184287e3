//! Core types for the asset cache.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use url::Url;

use crate::net::{Response, ResponseType};

/// A stored asset response, keyed by the exact request URL.
///
/// Entries are never edited in place; a later store for the same key replaces
/// the whole entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
  pub request_key: String,
  pub status: u16,
  /// Origin relation of the response as fetched
  pub kind: ResponseType,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl CacheEntry {
  /// Capture a copy of `response` under `request_key`.
  pub fn from_response(request_key: String, response: &Response) -> Self {
    Self {
      request_key,
      status: response.status,
      kind: response.kind,
      headers: response.headers.clone(),
      body: response.body.clone(),
    }
  }

  /// Rebuild a response for the request at `url`.
  pub fn into_response(self, url: Url) -> Response {
    Response {
      status: self.status,
      kind: self.kind,
      url,
      headers: self.headers,
      body: self.body,
    }
  }
}

/// Cache key for a request URL. Fragments never reach the server, so they are
/// not part of the key.
pub fn request_key(url: &Url) -> String {
  let mut url = url.clone();
  url.set_fragment(None);
  url.into()
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Fresh network data that was also written to the cache.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Network data that was deliberately not cached.
  pub fn passthrough(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Passthrough,
      cached_at: None,
    }
  }

  /// Data served from the cache without a network round-trip.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Served from a stored entry
  Cache,
  /// Fetched from the network and stored
  Network,
  /// Fetched from the network, not stored (API call, non-GET, or not cacheable)
  Passthrough,
}
