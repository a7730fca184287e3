//! Background sync of queued postings.

use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{DeliveryError, StorageError};
use crate::net::{Fetch, Request};
use crate::outbox::{Outbox, OutboxItem, OutboxStorage};

/// Header carrying the client-generated posting id on every attempt.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Outcome of one sync pass.
#[derive(Debug, Default)]
pub struct SyncReport {
  /// Every item attempted, in order
  pub attempted: Vec<i64>,
  /// Items the server accepted; removed from the outbox
  pub delivered: Vec<i64>,
  /// Items that failed; still queued
  pub failed: Vec<(i64, DeliveryError)>,
}

impl SyncReport {
  pub fn is_complete(&self) -> bool {
    self.failed.is_empty()
  }
}

/// Replays the outbox against the write endpoint.
pub struct SyncCoordinator<S: OutboxStorage, F: Fetch> {
  outbox: Outbox<S>,
  fetcher: Arc<F>,
  endpoint: Url,
}

impl<S: OutboxStorage, F: Fetch> SyncCoordinator<S, F> {
  pub fn new(outbox: Outbox<S>, fetcher: Arc<F>, endpoint: Url) -> Self {
    Self {
      outbox,
      fetcher,
      endpoint,
    }
  }

  pub fn outbox(&self) -> &Outbox<S> {
    &self.outbox
  }

  /// Deliver every item in the current snapshot.
  ///
  /// Each item is attempted independently; a failed item stays queued and the
  /// pass moves on. Only delivered items of this snapshot are removed, so a
  /// concurrent pass or a posting queued mid-pass is never lost. A storage
  /// failure aborts the pass before anything is removed.
  pub async fn run_pass(&self) -> Result<SyncReport, StorageError> {
    let snapshot = self.outbox.snapshot()?;
    if snapshot.is_empty() {
      debug!("Outbox empty, nothing to sync");
      return Ok(SyncReport::default());
    }

    info!(pending = snapshot.len(), "Starting sync pass");

    let mut report = SyncReport::default();
    for item in &snapshot {
      report.attempted.push(item.id);
      match self.deliver(item).await {
        Ok(()) => {
          debug!(item_id = item.id, title = %item.posting.title, "Posting delivered");
          report.delivered.push(item.id);
        }
        Err(e) => {
          warn!(item_id = item.id, title = %item.posting.title, error = %e, "Posting delivery failed, will retry");
          report.failed.push((item.id, e));
        }
      }
    }

    self.outbox.acknowledge(&report.delivered)?;

    info!(
      delivered = report.delivered.len(),
      failed = report.failed.len(),
      "Sync pass finished"
    );
    Ok(report)
  }

  async fn deliver(&self, item: &OutboxItem) -> Result<(), DeliveryError> {
    let request = Request::post_json(self.endpoint.clone(), &item.payload())?
      .with_header(IDEMPOTENCY_HEADER, item.client_id.to_string());

    let response = self.fetcher.fetch(request).await?;
    if response.is_success() {
      Ok(())
    } else {
      Err(DeliveryError::Rejected {
        status: response.status,
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::testing::{json_body, offline, respond, ScriptedFetcher};
  use crate::outbox::{draft, FoodPosting, SqliteOutbox};
  use chrono::{DateTime, Utc};
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;
  use uuid::Uuid;

  fn endpoint() -> Url {
    Url::parse("http://localhost:5000/api/food-postings").unwrap()
  }

  fn coordinator(fetcher: ScriptedFetcher) -> (SyncCoordinator<SqliteOutbox, ScriptedFetcher>, Arc<ScriptedFetcher>) {
    let fetcher = Arc::new(fetcher);
    let outbox = Outbox::new(SqliteOutbox::open_in_memory().unwrap());
    (SyncCoordinator::new(outbox, Arc::clone(&fetcher), endpoint()), fetcher)
  }

  /// SQLite outbox whose reads or removals can be made to fail.
  struct Faulty {
    inner: SqliteOutbox,
    fail_reads: Arc<AtomicBool>,
    fail_removes: Arc<AtomicBool>,
  }

  impl Faulty {
    fn check(flag: &AtomicBool) -> Result<(), StorageError> {
      if flag.load(Ordering::SeqCst) {
        Err(StorageError::Poisoned)
      } else {
        Ok(())
      }
    }
  }

  impl OutboxStorage for Faulty {
    fn append(
      &self,
      client_id: Uuid,
      posting: &FoodPosting,
      enqueued_at: DateTime<Utc>,
    ) -> Result<OutboxItem, StorageError> {
      self.inner.append(client_id, posting, enqueued_at)
    }

    fn next_after(&self, after: Option<i64>, upto: Option<i64>) -> Result<Option<OutboxItem>, StorageError> {
      Self::check(&self.fail_reads)?;
      self.inner.next_after(after, upto)
    }

    fn last_id(&self) -> Result<Option<i64>, StorageError> {
      self.inner.last_id()
    }

    fn remove(&self, ids: &[i64]) -> Result<usize, StorageError> {
      Self::check(&self.fail_removes)?;
      self.inner.remove(ids)
    }

    fn clear(&self) -> Result<usize, StorageError> {
      Self::check(&self.fail_removes)?;
      self.inner.clear()
    }

    fn count(&self) -> Result<usize, StorageError> {
      self.inner.count()
    }
  }

  fn faulty_coordinator(
    fetcher: ScriptedFetcher,
  ) -> (
    SyncCoordinator<Faulty, ScriptedFetcher>,
    Arc<ScriptedFetcher>,
    Arc<AtomicBool>,
    Arc<AtomicBool>,
  ) {
    let fail_reads = Arc::new(AtomicBool::new(false));
    let fail_removes = Arc::new(AtomicBool::new(false));
    let storage = Faulty {
      inner: SqliteOutbox::open_in_memory().unwrap(),
      fail_reads: Arc::clone(&fail_reads),
      fail_removes: Arc::clone(&fail_removes),
    };
    let fetcher = Arc::new(fetcher);
    let coordinator = SyncCoordinator::new(Outbox::new(storage), Arc::clone(&fetcher), endpoint());
    (coordinator, fetcher, fail_reads, fail_removes)
  }

  fn title(request: &Request) -> String {
    json_body(request)["title"].as_str().unwrap_or_default().to_string()
  }

  fn remaining(coordinator: &SyncCoordinator<SqliteOutbox, ScriptedFetcher>) -> Vec<String> {
    coordinator
      .outbox()
      .snapshot()
      .unwrap()
      .into_iter()
      .map(|i| i.posting.title)
      .collect()
  }

  #[tokio::test]
  async fn test_rejected_item_is_retained_and_others_delivered() {
    let (coordinator, fetcher) = coordinator(ScriptedFetcher::new(|req| {
      let status = if title(req) == "Rice" { 500 } else { 201 };
      Ok(respond(req, status, "{}"))
    }));
    coordinator.outbox().enqueue(draft("Bread")).unwrap();
    coordinator.outbox().enqueue(draft("Rice")).unwrap();

    let report = coordinator.run_pass().await.unwrap();

    let attempted: Vec<String> = fetcher.calls().iter().map(title).collect();
    assert_eq!(attempted, vec!["Bread", "Rice"]);
    assert_eq!(report.attempted.len(), 2);
    assert_eq!(report.delivered.len(), 1);
    assert!(matches!(report.failed[0].1, DeliveryError::Rejected { status: 500 }));
    assert_eq!(remaining(&coordinator), vec!["Rice"]);
  }

  #[tokio::test]
  async fn test_middle_failure_does_not_stop_the_pass() {
    let (coordinator, fetcher) = coordinator(ScriptedFetcher::new(|req| {
      if title(req) == "Rice" {
        Err(offline(req))
      } else {
        Ok(respond(req, 200, "{}"))
      }
    }));
    for t in ["Bread", "Rice", "Beans"] {
      coordinator.outbox().enqueue(draft(t)).unwrap();
    }

    let report = coordinator.run_pass().await.unwrap();

    assert_eq!(fetcher.call_count(), 3);
    assert!(!report.is_complete());
    assert!(matches!(report.failed[0].1, DeliveryError::Network(_)));
    assert_eq!(remaining(&coordinator), vec!["Rice"]);
  }

  #[tokio::test]
  async fn test_full_delivery_empties_outbox() {
    let (coordinator, _) = coordinator(ScriptedFetcher::new(|req| Ok(respond(req, 201, "{}"))));
    coordinator.outbox().enqueue(draft("Bread")).unwrap();

    let report = coordinator.run_pass().await.unwrap();

    assert!(report.is_complete());
    assert!(coordinator.outbox().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_empty_outbox_makes_no_requests() {
    let (coordinator, fetcher) = coordinator(ScriptedFetcher::offline());
    let report = coordinator.run_pass().await.unwrap();
    assert!(report.attempted.is_empty());
    assert_eq!(fetcher.call_count(), 0);
  }

  #[tokio::test]
  async fn test_requests_carry_payload_and_idempotency_key() {
    let (coordinator, fetcher) = coordinator(ScriptedFetcher::new(|req| Ok(respond(req, 201, "{}"))));
    let item = coordinator.outbox().enqueue(draft("Bread")).unwrap();

    coordinator.run_pass().await.unwrap();

    let calls = fetcher.calls();
    let call = &calls[0];
    assert_eq!(call.method, reqwest::Method::POST);
    assert_eq!(call.url, endpoint());
    assert_eq!(
      call.headers.get(IDEMPOTENCY_HEADER),
      Some(&item.client_id.to_string())
    );
    let body = json_body(call);
    assert_eq!(body["user_id"], 7);
    assert_eq!(body["latitude"], 6.5244);
    assert_eq!(body["client_id"], item.client_id.to_string());
  }

  #[tokio::test]
  async fn test_concurrent_passes_never_lose_items() {
    // Every other response fails, so the two passes see interleaved outcomes.
    let counter = AtomicUsize::new(0);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let accepted = Arc::clone(&delivered);
    let (coordinator, _) = coordinator(ScriptedFetcher::new(move |req| {
      if counter.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
        accepted.lock().unwrap().push(title(req));
        Ok(respond(req, 201, "{}"))
      } else {
        Err(offline(req))
      }
    }));
    let titles = ["Bread", "Rice", "Beans", "Yams"];
    for t in titles {
      coordinator.outbox().enqueue(draft(t)).unwrap();
    }

    let (first, second) = tokio::join!(coordinator.run_pass(), coordinator.run_pass());
    first.unwrap();
    second.unwrap();

    let delivered = delivered.lock().unwrap().clone();
    let left = remaining(&coordinator);
    for t in titles {
      assert!(
        delivered.iter().any(|d| d == t) || left.iter().any(|l| l == t),
        "{} was lost",
        t
      );
    }
    for t in &left {
      assert!(!delivered.contains(t), "{} delivered but still queued", t);
    }
  }

  #[tokio::test]
  async fn test_failed_removal_aborts_pass_and_keeps_outbox() {
    let (coordinator, fetcher, _, fail_removes) =
      faulty_coordinator(ScriptedFetcher::new(|req| Ok(respond(req, 201, "{}"))));
    coordinator.outbox().enqueue(draft("Bread")).unwrap();
    coordinator.outbox().enqueue(draft("Rice")).unwrap();
    fail_removes.store(true, Ordering::SeqCst);

    let result = coordinator.run_pass().await;

    assert!(matches!(result, Err(StorageError::Poisoned)));
    assert_eq!(fetcher.call_count(), 2);
    assert_eq!(coordinator.outbox().len().unwrap(), 2);

    // The next trigger delivers both once storage recovers
    fail_removes.store(false, Ordering::SeqCst);
    coordinator.run_pass().await.unwrap();
    assert!(coordinator.outbox().is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_failed_snapshot_sends_nothing() {
    let (coordinator, fetcher, fail_reads, _) =
      faulty_coordinator(ScriptedFetcher::new(|req| Ok(respond(req, 201, "{}"))));
    coordinator.outbox().enqueue(draft("Bread")).unwrap();
    fail_reads.store(true, Ordering::SeqCst);

    let result = coordinator.run_pass().await;

    assert!(matches!(result, Err(StorageError::Poisoned)));
    assert_eq!(fetcher.call_count(), 0);
    assert_eq!(coordinator.outbox().len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_posting_queued_mid_pass_survives() {
    let (coordinator, _) = coordinator(ScriptedFetcher::new(|req| Ok(respond(req, 201, "{}"))));
    coordinator.outbox().enqueue(draft("Bread")).unwrap();

    let outbox = coordinator.outbox().clone();
    let (report, _) = tokio::join!(coordinator.run_pass(), async move {
      tokio::task::yield_now().await;
      outbox.enqueue(draft("Rice")).unwrap();
    });

    assert_eq!(report.unwrap().delivered.len(), 1);
    assert_eq!(remaining(&coordinator), vec!["Rice"]);
  }
}
