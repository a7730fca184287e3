//! Outbox storage trait and SQLite implementation.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use uuid::Uuid;

use super::item::{FoodPosting, OutboxItem};
use crate::db::Database;
use crate::error::StorageError;

/// Trait for outbox storage backends.
///
/// Ids are assigned in insertion order and never reused, so a cursor over ids
/// walks the queue in the order postings were created.
pub trait OutboxStorage: Send + Sync {
  /// Append a fully validated posting.
  fn append(
    &self,
    client_id: Uuid,
    posting: &FoodPosting,
    enqueued_at: DateTime<Utc>,
  ) -> Result<OutboxItem, StorageError>;

  /// The first item with id greater than `after` and at most `upto`.
  fn next_after(&self, after: Option<i64>, upto: Option<i64>) -> Result<Option<OutboxItem>, StorageError>;

  /// Highest id currently stored.
  fn last_id(&self) -> Result<Option<i64>, StorageError>;

  /// Remove exactly the given ids in one transaction. Returns how many existed.
  fn remove(&self, ids: &[i64]) -> Result<usize, StorageError>;

  /// Remove every item in one transaction.
  fn clear(&self) -> Result<usize, StorageError>;

  fn count(&self) -> Result<usize, StorageError>;
}

/// SQLite-based outbox storage.
pub struct SqliteOutbox {
  db: Database,
}

impl SqliteOutbox {
  /// Open the outbox database at `path`.
  pub fn open(path: &Path) -> Result<Self, StorageError> {
    Ok(Self {
      db: Database::open(path, OUTBOX_SCHEMA)?,
    })
  }

  /// Open a throwaway in-memory outbox.
  pub fn open_in_memory() -> Result<Self, StorageError> {
    Ok(Self {
      db: Database::open_in_memory(OUTBOX_SCHEMA)?,
    })
  }
}

/// AUTOINCREMENT keeps ids monotonic even after the table is emptied.
const OUTBOX_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id TEXT NOT NULL UNIQUE,
    payload BLOB NOT NULL,
    enqueued_at TEXT NOT NULL
);
"#;

impl OutboxStorage for SqliteOutbox {
  fn append(
    &self,
    client_id: Uuid,
    posting: &FoodPosting,
    enqueued_at: DateTime<Utc>,
  ) -> Result<OutboxItem, StorageError> {
    let conn = self.db.lock()?;
    let payload = serde_json::to_vec(posting)?;
    // Stored with microsecond precision
    let enqueued_at = enqueued_at.trunc_subsecs(6);

    conn.execute(
      "INSERT INTO outbox (client_id, payload, enqueued_at) VALUES (?, ?, ?)",
      params![
        client_id.to_string(),
        payload,
        enqueued_at.to_rfc3339_opts(SecondsFormat::Micros, true)
      ],
    )?;

    Ok(OutboxItem {
      id: conn.last_insert_rowid(),
      client_id,
      posting: posting.clone(),
      enqueued_at,
    })
  }

  fn next_after(&self, after: Option<i64>, upto: Option<i64>) -> Result<Option<OutboxItem>, StorageError> {
    let conn = self.db.lock()?;

    let row = conn
      .query_row(
        "SELECT id, client_id, payload, enqueued_at FROM outbox
         WHERE id > ? AND id <= ?
         ORDER BY id
         LIMIT 1",
        params![after.unwrap_or(0), upto.unwrap_or(i64::MAX)],
        raw_item,
      )
      .optional()?;

    row.map(decode_item).transpose()
  }

  fn last_id(&self) -> Result<Option<i64>, StorageError> {
    let conn = self.db.lock()?;
    let id: Option<i64> = conn.query_row("SELECT MAX(id) FROM outbox", [], |row| row.get(0))?;
    Ok(id)
  }

  fn remove(&self, ids: &[i64]) -> Result<usize, StorageError> {
    let mut conn = self.db.lock()?;
    let tx = conn.transaction()?;

    let mut removed = 0;
    {
      let mut stmt = tx.prepare("DELETE FROM outbox WHERE id = ?")?;
      for id in ids {
        removed += stmt.execute(params![id])?;
      }
    }

    tx.commit()?;
    Ok(removed)
  }

  fn clear(&self) -> Result<usize, StorageError> {
    let conn = self.db.lock()?;
    Ok(conn.execute("DELETE FROM outbox", [])?)
  }

  fn count(&self) -> Result<usize, StorageError> {
    let conn = self.db.lock()?;
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
    Ok(count as usize)
  }
}

type RawItem = (i64, String, Vec<u8>, String);

fn raw_item(row: &Row<'_>) -> rusqlite::Result<RawItem> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_item((id, client_id, payload, enqueued_at): RawItem) -> Result<OutboxItem, StorageError> {
  let client_id = Uuid::parse_str(&client_id)
    .map_err(|e| StorageError::Corrupt(format!("invalid client id '{}': {}", client_id, e)))?;
  let posting: FoodPosting = serde_json::from_slice(&payload)?;
  let enqueued_at = DateTime::parse_from_rfc3339(&enqueued_at)
    .map_err(|source| StorageError::Timestamp {
      value: enqueued_at.clone(),
      source,
    })?
    .with_timezone(&Utc);

  Ok(OutboxItem {
    id,
    client_id,
    posting,
    enqueued_at,
  })
}
