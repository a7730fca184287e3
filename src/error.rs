//! Error taxonomy for the offline layer.
//!
//! Component APIs return these typed errors so callers can tell an isolated
//! per-item failure from one that must abort a whole pass. The CLI converts
//! them into `color_eyre` reports at the edge.

use std::path::PathBuf;

use thiserror::Error;

/// The durable store (asset cache or outbox) could not be read or written.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to encode or decode stored data: {0}")]
  Codec(#[from] serde_json::Error),

  #[error("stored timestamp '{value}' is invalid: {source}")]
  Timestamp {
    value: String,
    #[source]
    source: chrono::ParseError,
  },

  #[error("stored value is corrupt: {0}")]
  Corrupt(String),

  #[error("storage lock poisoned")]
  Poisoned,

  #[error("failed to prepare storage at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// The network capability could not produce a response at all.
///
/// An HTTP error status is not a `FetchError`; it arrives as a normal response.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("network unreachable for {url}: {reason}")]
  Network { url: String, reason: String },

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

/// An asset from the manifest could not be stored, so the generation is not
/// installed.
#[derive(Debug, Error)]
pub enum InstallationError {
  #[error("asset {url} could not be fetched: {source}")]
  Fetch {
    url: String,
    #[source]
    source: FetchError,
  },

  #[error("asset {url} returned status {status}")]
  BadStatus { url: String, status: u16 },

  #[error("asset {url} is an API endpoint and cannot be cached")]
  ApiAsset { url: String },

  #[error("asset {url} is listed more than once")]
  DuplicateAsset { url: String },

  #[error(transparent)]
  Storage(#[from] StorageError),
}

/// Activation could not prune old generations.
#[derive(Debug, Error)]
pub enum ActivationError {
  #[error("generation {0} has not been installed")]
  NotInstalled(String),

  #[error(transparent)]
  Storage(#[from] StorageError),
}

/// A posting is missing a required field or carries an invalid value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid posting: {field} {problem}")]
pub struct ValidationError {
  pub field: &'static str,
  pub problem: String,
}

impl ValidationError {
  pub fn missing(field: &'static str) -> Self {
    Self {
      field,
      problem: "is required".to_string(),
    }
  }

  pub fn invalid(field: &'static str, problem: impl Into<String>) -> Self {
    Self {
      field,
      problem: problem.into(),
    }
  }
}

/// Enqueueing into the outbox failed.
#[derive(Debug, Error)]
pub enum OutboxError {
  #[error(transparent)]
  Validation(#[from] ValidationError),

  #[error("failed to encode posting: {0}")]
  Encode(#[from] serde_json::Error),

  #[error(transparent)]
  Storage(#[from] StorageError),
}

/// A single outbox item could not be delivered. The item stays queued.
#[derive(Debug, Error)]
pub enum DeliveryError {
  #[error("network failure: {0}")]
  Network(#[from] FetchError),

  #[error("server rejected posting with status {status}")]
  Rejected { status: u16 },

  #[error("failed to encode posting: {0}")]
  Encode(#[from] serde_json::Error),
}
