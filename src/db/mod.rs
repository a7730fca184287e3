//! SQLite connection helpers shared by the asset cache and the outbox.
//!
//! Each store lives in its own database file so the two namespaces never share
//! tables or transactions.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::StorageError;

/// File name of the asset cache database inside the data directory.
pub const CACHE_DB: &str = "cache.db";

/// File name of the outbox database inside the data directory.
pub const OUTBOX_DB: &str = "outbox.db";

/// A single SQLite connection guarded for use from async tasks.
pub struct Database {
  conn: Mutex<Connection>,
}

impl Database {
  /// Open or create the database at `path` and apply `schema`.
  pub fn open(path: &Path, schema: &str) -> Result<Self, StorageError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|source| StorageError::Io {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let conn = Connection::open(path)?;
    Self::from_connection(conn, schema)
  }

  /// Open a private in-memory database. Used by tests and dry runs.
  pub fn open_in_memory(schema: &str) -> Result<Self, StorageError> {
    Self::from_connection(Connection::open_in_memory()?, schema)
  }

  fn from_connection(conn: Connection, schema: &str) -> Result<Self, StorageError> {
    conn.execute_batch(schema)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Lock the connection for the duration of one storage operation.
  pub fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
    self.conn.lock().map_err(|_| StorageError::Poisoned)
  }
}
