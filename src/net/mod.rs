//! The network capability consumed by the cache and the sync coordinator.
//!
//! Components never talk to `reqwest` directly; they go through [`Fetch`] so a
//! host (or a test) can supply its own transport.

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

use crate::error::FetchError;

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      headers: BTreeMap::new(),
      body: None,
    }
  }

  /// Build a POST with a JSON body and matching content type.
  pub fn post_json<T: Serialize>(url: Url, body: &T) -> Result<Self, serde_json::Error> {
    let body = serde_json::to_vec(body)?;
    Ok(
      Self {
        method: Method::POST,
        url,
        headers: BTreeMap::new(),
        body: Some(body),
      }
      .with_header("Content-Type", "application/json"),
    )
  }

  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_string(), value.into());
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }
}

/// How the response relates to the requesting origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin response
  Basic,
  /// Cross-origin response
  Cors,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResponseType::Basic => "basic",
      ResponseType::Cors => "cors",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "basic" => Some(ResponseType::Basic),
      "cors" => Some(ResponseType::Cors),
      _ => None,
    }
  }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct Response {
  pub status: u16,
  pub kind: ResponseType,
  pub url: Url,
  pub headers: BTreeMap<String, String>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Only a plain same-origin 200 is eligible for the asset cache.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseType::Basic
  }
}

/// Network capability supplied by the host environment.
#[async_trait]
pub trait Fetch: Send + Sync {
  async fn fetch(&self, request: Request) -> Result<Response, FetchError>;
}

/// Whether two URLs share scheme, host and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
  a.origin() == b.origin()
}

/// [`Fetch`] backed by a shared `reqwest` client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  origin: Url,
}

impl HttpFetcher {
  /// Create a fetcher that classifies responses relative to `origin`.
  pub fn new(origin: Url) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(15))
      .build()
      .map_err(|e| FetchError::InvalidRequest(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { client, origin })
  }
}

#[async_trait]
impl Fetch for HttpFetcher {
  async fn fetch(&self, request: Request) -> Result<Response, FetchError> {
    let url = request.url.to_string();
    let network = |e: reqwest::Error| FetchError::Network {
      url: url.clone(),
      reason: e.to_string(),
    };

    let mut builder = self.client.request(request.method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(body) = request.body {
      builder = builder.body(body);
    }

    let response = builder.send().await.map_err(network)?;

    let status = response.status().as_u16();
    let final_url = response.url().clone();
    let kind = if same_origin(&final_url, &self.origin) {
      ResponseType::Basic
    } else {
      ResponseType::Cors
    };
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
    let body = response.bytes().await.map_err(network)?.to_vec();

    Ok(Response {
      status,
      kind,
      url: final_url,
      headers,
      body,
    })
  }
}
