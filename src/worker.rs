//! The offline worker: one async handler per host event.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info};
use url::Url;

use crate::cache::{AssetCache, CacheResult, CacheStorage};
use crate::error::{ActivationError, FetchError, InstallationError, StorageError};
use crate::net::{Fetch, Request, Response};
use crate::outbox::OutboxStorage;
use crate::sync::{SyncCoordinator, SyncReport};

const DEFAULT_NOTIFICATION_TITLE: &str = "Food Alert";
const DEFAULT_NOTIFICATION_BODY: &str = "New food is available near you";

/// Host events, one method each. The host treats an event as finished only
/// once the returned future settles.
#[async_trait]
pub trait EventHandler: Send + Sync {
  /// Store the asset manifest for this worker's generation.
  async fn install(&self) -> Result<usize, InstallationError>;

  /// Prune every other generation. Returns the deleted generation names.
  async fn activate(&self) -> Result<Vec<String>, ActivationError>;

  /// Answer an intercepted request.
  async fn fetch(&self, request: Request) -> Result<CacheResult<Response>, FetchError>;

  /// Run a background sync. `None` when the tag is not ours.
  async fn sync(&self, tag: &str) -> Result<Option<SyncReport>, StorageError>;

  /// Turn a push message into a notification.
  async fn push(&self, payload: Option<&[u8]>) -> Notification;
}

/// A notification to show for a push message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub title: String,
  pub body: String,
}

#[derive(Deserialize)]
struct PushMessage {
  title: Option<String>,
  body: Option<String>,
}

impl Notification {
  /// Decode a push payload: JSON `{"title", "body"}`, or plain text used as the body.
  pub fn from_payload(payload: Option<&[u8]>) -> Self {
    let (title, body) = match payload {
      None => (None, None),
      Some(bytes) => match serde_json::from_slice::<PushMessage>(bytes) {
        Ok(msg) => (msg.title, msg.body),
        Err(_) => {
          let text = String::from_utf8_lossy(bytes).trim().to_string();
          (None, Some(text).filter(|t| !t.is_empty()))
        }
      },
    };

    Self {
      title: title.unwrap_or_else(|| DEFAULT_NOTIFICATION_TITLE.to_string()),
      body: body.unwrap_or_else(|| DEFAULT_NOTIFICATION_BODY.to_string()),
    }
  }
}

/// Worker wiring the asset cache and the sync coordinator to host events.
pub struct ServiceWorker<C: CacheStorage, O: OutboxStorage, F: Fetch> {
  cache: AssetCache<C>,
  coordinator: SyncCoordinator<O, F>,
  fetcher: Arc<F>,
  manifest: Vec<Url>,
  sync_tag: String,
}

impl<C: CacheStorage, O: OutboxStorage, F: Fetch> ServiceWorker<C, O, F> {
  pub fn new(
    cache: AssetCache<C>,
    coordinator: SyncCoordinator<O, F>,
    fetcher: Arc<F>,
    manifest: Vec<Url>,
    sync_tag: impl Into<String>,
  ) -> Self {
    Self {
      cache,
      coordinator,
      fetcher,
      manifest,
      sync_tag: sync_tag.into(),
    }
  }

  pub fn cache(&self) -> &AssetCache<C> {
    &self.cache
  }

  pub fn coordinator(&self) -> &SyncCoordinator<O, F> {
    &self.coordinator
  }

  pub fn sync_tag(&self) -> &str {
    &self.sync_tag
  }
}

#[async_trait]
impl<C, O, F> EventHandler for ServiceWorker<C, O, F>
where
  C: CacheStorage + 'static,
  O: OutboxStorage + 'static,
  F: Fetch + 'static,
{
  async fn install(&self) -> Result<usize, InstallationError> {
    self
      .cache
      .install(&self.manifest, self.fetcher.as_ref())
      .await
      .inspect_err(|e| error!(generation = %self.cache.generation(), error = %e, "Install failed"))
  }

  async fn activate(&self) -> Result<Vec<String>, ActivationError> {
    let deleted = self.cache.activate()?;
    info!(generation = %self.cache.generation(), pruned = deleted.len(), "Worker activated");
    Ok(deleted)
  }

  async fn fetch(&self, request: Request) -> Result<CacheResult<Response>, FetchError> {
    self.cache.handle(request, self.fetcher.as_ref()).await
  }

  async fn sync(&self, tag: &str) -> Result<Option<SyncReport>, StorageError> {
    if tag != self.sync_tag {
      debug!(tag, "Ignoring sync event for unknown tag");
      return Ok(None);
    }

    match self.coordinator.run_pass().await {
      Ok(report) => Ok(Some(report)),
      Err(e) => {
        error!(error = %e, "Sync pass aborted, outbox left intact");
        Err(e)
      }
    }
  }

  async fn push(&self, payload: Option<&[u8]>) -> Notification {
    Notification::from_payload(payload)
  }
}
