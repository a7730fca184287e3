//! Durable outbox of postings created while offline.
//!
//! Items are validated before they are stored, so the queue only ever holds
//! complete postings. Reads are snapshot based: a drain only sees items that
//! existed when it started, and removal is by id, never by popping.

mod item;
mod storage;

pub use item::{parse_deadline, FoodPosting, OutboxItem, PostingDraft, PostingPayload};
pub use storage::{OutboxStorage, SqliteOutbox};

#[cfg(test)]
pub(crate) use item::draft;

use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{OutboxError, StorageError};

/// Durable queue of pending posting writes.
pub struct Outbox<S: OutboxStorage> {
  storage: Arc<S>,
}

impl<S: OutboxStorage> Outbox<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Validate `draft` and append it. Nothing is stored when validation fails.
  pub fn enqueue(&self, draft: PostingDraft) -> Result<OutboxItem, OutboxError> {
    let posting = draft.validate()?;
    let item = self.storage.append(Uuid::new_v4(), &posting, Utc::now())?;

    info!(
      item_id = item.id,
      client_id = %item.client_id,
      title = %item.posting.title,
      "Posting queued for background sync"
    );
    Ok(item)
  }

  /// Lazily walk every item stored right now, in insertion order.
  ///
  /// Items appended after this call are not visited.
  pub fn drain_all(&self) -> Result<Drain<'_, S>, StorageError> {
    let upto = self.storage.last_id()?;
    Ok(Drain {
      storage: &self.storage,
      cursor: None,
      upto,
      done: upto.is_none(),
    })
  }

  /// Read the whole current queue at once.
  pub fn snapshot(&self) -> Result<Vec<OutboxItem>, StorageError> {
    self.drain_all()?.collect()
  }

  /// Remove exactly the given items, all in one transaction.
  pub fn acknowledge(&self, ids: &[i64]) -> Result<usize, StorageError> {
    if ids.is_empty() {
      return Ok(0);
    }
    self.storage.remove(ids)
  }

  /// Remove every item, all in one transaction.
  pub fn clear(&self) -> Result<usize, StorageError> {
    self.storage.clear()
  }

  pub fn len(&self) -> Result<usize, StorageError> {
    self.storage.count()
  }

  pub fn is_empty(&self) -> Result<bool, StorageError> {
    Ok(self.len()? == 0)
  }
}

impl<S: OutboxStorage> Clone for Outbox<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

/// Lazy, restartable walk over an outbox snapshot.
///
/// Each step reads one item from storage. A storage error is yielded once and
/// ends the walk.
pub struct Drain<'a, S: OutboxStorage> {
  storage: &'a S,
  cursor: Option<i64>,
  upto: Option<i64>,
  done: bool,
}

impl<S: OutboxStorage> Drain<'_, S> {
  /// Start again from the first item of the same snapshot.
  pub fn restart(&mut self) {
    self.cursor = None;
    self.done = self.upto.is_none();
  }
}

impl<S: OutboxStorage> Iterator for Drain<'_, S> {
  type Item = Result<OutboxItem, StorageError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }

    match self.storage.next_after(self.cursor, self.upto) {
      Ok(Some(item)) => {
        self.cursor = Some(item.id);
        Some(Ok(item))
      }
      Ok(None) => {
        self.done = true;
        None
      }
      Err(e) => {
        self.done = true;
        Some(Err(e))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn outbox() -> Outbox<SqliteOutbox> {
    Outbox::new(SqliteOutbox::open_in_memory().unwrap())
  }

  fn titles(items: &[OutboxItem]) -> Vec<&str> {
    items.iter().map(|i| i.posting.title.as_str()).collect()
  }

  #[test]
  fn test_invalid_enqueue_leaves_outbox_unchanged() {
    let outbox = outbox();
    outbox.enqueue(draft("Bread")).unwrap();
    let before = outbox.len().unwrap();

    let mut missing = draft("Rice");
    missing.quantity = None;
    let err = outbox.enqueue(missing).unwrap_err();

    assert!(matches!(err, OutboxError::Validation(ref v) if v.field == "quantity"));
    assert_eq!(outbox.len().unwrap(), before);
  }

  #[test]
  fn test_drain_preserves_insertion_order() {
    let outbox = outbox();
    for title in ["Bread", "Rice", "Beans"] {
      outbox.enqueue(draft(title)).unwrap();
    }

    let items = outbox.snapshot().unwrap();
    assert_eq!(titles(&items), vec!["Bread", "Rice", "Beans"]);
  }

  #[test]
  fn test_drain_then_clear_empties_outbox() {
    let outbox = outbox();
    outbox.enqueue(draft("Bread")).unwrap();
    outbox.enqueue(draft("Rice")).unwrap();

    assert_eq!(outbox.drain_all().unwrap().count(), 2);
    assert_eq!(outbox.clear().unwrap(), 2);

    assert!(outbox.is_empty().unwrap());
    assert_eq!(outbox.drain_all().unwrap().count(), 0);
  }

  #[test]
  fn test_drain_is_lazy_and_bounded_by_snapshot() {
    let outbox = outbox();
    outbox.enqueue(draft("Bread")).unwrap();

    let mut drain = outbox.drain_all().unwrap();
    outbox.enqueue(draft("Rice")).unwrap();

    let seen: Vec<OutboxItem> = drain.by_ref().collect::<Result<_, _>>().unwrap();
    assert_eq!(titles(&seen), vec!["Bread"]);
    assert!(drain.next().is_none());
  }

  #[test]
  fn test_drain_restarts_from_first_item() {
    let outbox = outbox();
    outbox.enqueue(draft("Bread")).unwrap();
    outbox.enqueue(draft("Rice")).unwrap();

    let mut drain = outbox.drain_all().unwrap();
    let first = drain.next().unwrap().unwrap();
    drain.next().unwrap().unwrap();
    assert!(drain.next().is_none());

    drain.restart();
    assert_eq!(drain.next().unwrap().unwrap(), first);
  }

  #[test]
  fn test_acknowledge_keeps_unlisted_items() {
    let outbox = outbox();
    let a = outbox.enqueue(draft("Bread")).unwrap();
    outbox.enqueue(draft("Rice")).unwrap();

    assert_eq!(outbox.acknowledge(&[a.id]).unwrap(), 1);
    assert_eq!(titles(&outbox.snapshot().unwrap()), vec!["Rice"]);
    assert_eq!(outbox.acknowledge(&[]).unwrap(), 0);
  }
}
