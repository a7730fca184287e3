//! Foreground posting client: write-behind entry point for new postings.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::error::OutboxError;
use crate::host::HostHandle;
use crate::net::{Fetch, Request};
use crate::outbox::{Outbox, OutboxItem, OutboxStorage, PostingDraft};

/// A map position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
  pub lat: f64,
  pub lng: f64,
}

impl Default for Location {
  /// Lagos, used until the device reports a position.
  fn default() -> Self {
    Self {
      lat: 6.5244,
      lng: 3.3792,
    }
  }
}

/// The signed-in user and where they are, passed explicitly to every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
  pub user_id: u64,
  #[serde(default)]
  pub location: Location,
}

impl Session {
  pub fn new(user_id: u64) -> Self {
    Self {
      user_id,
      location: Location::default(),
    }
  }

  pub fn with_location(mut self, location: Location) -> Self {
    self.location = location;
    self
  }
}

/// The share-food form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostingForm {
  pub title: String,
  pub description: String,
  pub quantity: String,
  pub available_until: String,
}

impl PostingForm {
  fn into_draft(self, session: &Session) -> PostingDraft {
    PostingDraft {
      user_id: Some(session.user_id),
      title: Some(self.title),
      description: Some(self.description),
      quantity: Some(self.quantity),
      latitude: Some(session.location.lat),
      longitude: Some(session.location.lng),
      available_until: Some(self.available_until),
    }
  }
}

/// What happened to a submitted posting.
#[derive(Debug)]
pub enum Submitted {
  /// The server accepted it; carries the response body
  Created(serde_json::Value),
  /// The network was unreachable; the posting waits in the outbox
  Queued(OutboxItem),
  /// The server answered with an error status; nothing was queued
  Rejected { status: u16 },
}

/// Posts directly when online and falls back to the outbox when not.
pub struct PostingClient<S: OutboxStorage, F: Fetch> {
  fetcher: Arc<F>,
  outbox: Outbox<S>,
  endpoint: Url,
  sync_tag: String,
  host: Option<HostHandle>,
}

impl<S: OutboxStorage, F: Fetch> PostingClient<S, F> {
  pub fn new(fetcher: Arc<F>, outbox: Outbox<S>, endpoint: Url, sync_tag: impl Into<String>) -> Self {
    Self {
      fetcher,
      outbox,
      endpoint,
      sync_tag: sync_tag.into(),
      host: None,
    }
  }

  /// Register background syncs with a running host when postings are queued.
  pub fn with_host(mut self, host: HostHandle) -> Self {
    self.host = Some(host);
    self
  }

  /// Submit a posting.
  ///
  /// The posting is validated first, so an incomplete form is never sent or
  /// queued. Only an unreachable network leads to queueing.
  pub async fn submit(&self, session: &Session, form: PostingForm) -> Result<Submitted, OutboxError> {
    let draft = form.into_draft(session);
    let posting = draft.clone().validate()?;

    let request = Request::post_json(self.endpoint.clone(), &posting)?;

    match self.fetcher.fetch(request).await {
      Ok(response) if response.is_success() => {
        info!(title = %posting.title, "Posting created");
        let body = serde_json::from_slice(&response.body).unwrap_or(serde_json::Value::Null);
        Ok(Submitted::Created(body))
      }
      Ok(response) => {
        warn!(title = %posting.title, status = response.status, "Posting rejected by server");
        Ok(Submitted::Rejected {
          status: response.status,
        })
      }
      Err(e) => {
        info!(title = %posting.title, error = %e, "Offline, queueing posting");
        let item = self.outbox.enqueue(draft)?;
        if let Some(host) = &self.host {
          host.register_sync(&self.sync_tag);
        }
        Ok(Submitted::Queued(item))
      }
    }
  }
}
