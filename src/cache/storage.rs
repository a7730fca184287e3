//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;

use super::traits::CacheEntry;
use crate::db::Database;
use crate::error::StorageError;
use crate::net::ResponseType;

/// A cache entry together with where and when it was stored.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub entry: CacheEntry,
  /// Generation the entry belongs to
  pub generation: String,
  /// When the entry was cached
  pub cached_at: DateTime<Utc>,
}

/// A named cache generation known to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
  pub name: String,
  /// Set once the full manifest has been stored
  pub installed: bool,
}

/// Trait for asset cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// All generations, oldest first.
  fn generations(&self) -> Result<Vec<Generation>, StorageError>;

  /// Store a complete manifest for `generation` and mark it installed.
  /// Either every entry is stored or none is.
  fn install_generation(&self, generation: &str, entries: &[CacheEntry]) -> Result<(), StorageError>;

  /// Delete a generation and all of its entries. Returns false if it did not exist.
  fn delete_generation(&self, generation: &str) -> Result<bool, StorageError>;

  /// Store a single entry, creating the generation if needed.
  fn put_entry(&self, generation: &str, entry: &CacheEntry) -> Result<(), StorageError>;

  /// Find an exact-match entry across all generations, oldest generation first.
  fn match_entry(&self, request_key: &str) -> Result<Option<CachedEntry>, StorageError>;

  /// Number of entries stored in `generation`.
  fn entry_count(&self, generation: &str) -> Result<usize, StorageError>;
}

/// SQLite-based asset cache storage.
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  /// Open the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self, StorageError> {
    Ok(Self {
      db: Database::open(path, CACHE_SCHEMA)?,
    })
  }

  /// Open a throwaway in-memory cache.
  pub fn open_in_memory() -> Result<Self, StorageError> {
    Ok(Self {
      db: Database::open_in_memory(CACHE_SCHEMA)?,
    })
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    installed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL DEFAULT 'basic',
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(request_key);
"#;

const UPSERT_ENTRY: &str = "INSERT OR REPLACE INTO cache_entries (generation, request_key, status, kind, headers, body, cached_at)
   VALUES (?, ?, ?, ?, ?, ?, datetime('now'))";

const ENSURE_GENERATION: &str = "INSERT OR IGNORE INTO cache_generations (name) VALUES (?)";

impl CacheStorage for SqliteStorage {
  fn generations(&self) -> Result<Vec<Generation>, StorageError> {
    let conn = self.db.lock()?;
    let mut stmt = conn.prepare("SELECT name, installed FROM cache_generations ORDER BY rowid")?;
    let generations = stmt
      .query_map([], |row| {
        Ok(Generation {
          name: row.get(0)?,
          installed: row.get::<_, i64>(1)? != 0,
        })
      })?
      .collect::<Result<Vec<_>, _>>()?;
    Ok(generations)
  }

  fn install_generation(&self, generation: &str, entries: &[CacheEntry]) -> Result<(), StorageError> {
    let mut conn = self.db.lock()?;
    let tx = conn.transaction()?;

    tx.execute(ENSURE_GENERATION, params![generation])?;
    for entry in entries {
      let headers = serde_json::to_string(&entry.headers)?;
      tx.execute(
        UPSERT_ENTRY,
        params![
          generation,
          entry.request_key,
          entry.status,
          entry.kind.as_str(),
          headers,
          entry.body
        ],
      )?;
    }
    tx.execute(
      "UPDATE cache_generations SET installed = 1 WHERE name = ?",
      params![generation],
    )?;

    tx.commit()?;
    Ok(())
  }

  fn delete_generation(&self, generation: &str) -> Result<bool, StorageError> {
    let mut conn = self.db.lock()?;
    let tx = conn.transaction()?;

    tx.execute(
      "DELETE FROM cache_entries WHERE generation = ?",
      params![generation],
    )?;
    let removed = tx.execute(
      "DELETE FROM cache_generations WHERE name = ?",
      params![generation],
    )?;

    tx.commit()?;
    Ok(removed > 0)
  }

  fn put_entry(&self, generation: &str, entry: &CacheEntry) -> Result<(), StorageError> {
    let mut conn = self.db.lock()?;
    let headers = serde_json::to_string(&entry.headers)?;
    let tx = conn.transaction()?;

    tx.execute(ENSURE_GENERATION, params![generation])?;
    tx.execute(
      UPSERT_ENTRY,
      params![
        generation,
        entry.request_key,
        entry.status,
        entry.kind.as_str(),
        headers,
        entry.body
      ],
    )?;

    tx.commit()?;
    Ok(())
  }

  fn match_entry(&self, request_key: &str) -> Result<Option<CachedEntry>, StorageError> {
    let conn = self.db.lock()?;

    let row: Option<(String, u16, String, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT ce.generation, ce.status, ce.kind, ce.headers, ce.body, ce.cached_at
         FROM cache_entries ce
         INNER JOIN cache_generations cg ON cg.name = ce.generation
         WHERE ce.request_key = ?
         ORDER BY cg.rowid
         LIMIT 1",
        params![request_key],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
          ))
        },
      )
      .optional()?;

    match row {
      Some((generation, status, kind, headers, body, cached_at)) => {
        let kind = ResponseType::parse(&kind)
          .ok_or_else(|| StorageError::Corrupt(format!("unknown response kind '{}'", kind)))?;
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers)?;
        Ok(Some(CachedEntry {
          entry: CacheEntry {
            request_key: request_key.to_string(),
            status,
            kind,
            headers,
            body,
          },
          generation,
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn entry_count(&self, generation: &str) -> Result<usize, StorageError> {
    let conn = self.db.lock()?;
    let count: i64 = conn.query_row(
      "SELECT COUNT(*) FROM cache_entries WHERE generation = ?",
      params![generation],
      |row| row.get(0),
    )?;
    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StorageError> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|source| StorageError::Timestamp {
      value: s.to_string(),
      source,
    })
}
