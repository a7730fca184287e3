//! End-to-end runs against a local HTTP server.

use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use food_alert_offline::cache::{AssetCache, CacheSource, SqliteStorage};
use food_alert_offline::db::{CACHE_DB, OUTBOX_DB};
use food_alert_offline::net::{Fetch, HttpFetcher, Request, ResponseType};
use food_alert_offline::outbox::{Outbox, PostingDraft, SqliteOutbox};
use food_alert_offline::sync::SyncCoordinator;

fn draft(title: &str) -> PostingDraft {
  PostingDraft {
    user_id: Some(7),
    title: Some(title.to_string()),
    description: Some(format!("Fresh {}", title.to_lowercase())),
    quantity: Some("3 portions".to_string()),
    latitude: Some(6.5244),
    longitude: Some(3.3792),
    available_until: Some("2026-10-20T18:00".to_string()),
  }
}

fn url(server: &MockServer, path: &str) -> Url {
  Url::parse(&format!("{}{}", server.uri(), path)).unwrap()
}

#[tokio::test]
async fn test_installed_assets_are_served_after_the_server_goes_away() {
  // Not pooled, so dropping it really stops the server
  let server = MockServer::builder().start().await;
  for asset in ["/", "/static/js/main.js"] {
    Mock::given(method("GET"))
      .and(path(asset))
      .respond_with(ResponseTemplate::new(200).set_body_string(format!("asset {}", asset)))
      .mount(&server)
      .await;
  }

  let dir = TempDir::new().unwrap();
  let origin = url(&server, "/");
  let fetcher = HttpFetcher::new(origin.clone()).unwrap();
  let cache = AssetCache::new(
    SqliteStorage::open(&dir.path().join(CACHE_DB)).unwrap(),
    "food-alert-v1",
    "/api/",
  );
  let manifest = vec![url(&server, "/"), url(&server, "/static/js/main.js")];

  assert_eq!(cache.install(&manifest, &fetcher).await.unwrap(), 2);
  cache.activate().unwrap();

  let script = url(&server, "/static/js/main.js");
  let api = url(&server, "/api/food-postings");
  drop(server);

  let result = cache.handle(Request::get(script), &fetcher).await.unwrap();
  assert_eq!(result.source, CacheSource::Cache);
  assert_eq!(result.data.body, b"asset /static/js/main.js".to_vec());

  match cache.handle(Request::get(api), &fetcher).await {
    Ok(result) => assert_ne!(result.source, CacheSource::Cache),
    Err(_) => {}
  }
}

#[tokio::test]
async fn test_responses_from_another_origin_are_opaque_to_the_cache() {
  let app = MockServer::start().await;
  let cdn = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path("/leaflet.css"))
    .respond_with(ResponseTemplate::new(200).set_body_string("css"))
    .mount(&cdn)
    .await;

  let fetcher = HttpFetcher::new(url(&app, "/")).unwrap();
  let response = fetcher.fetch(Request::get(url(&cdn, "/leaflet.css"))).await.unwrap();

  assert_eq!(response.kind, ResponseType::Cors);
  assert!(!response.is_cacheable());
}

#[tokio::test]
async fn test_sync_keeps_only_the_rejected_posting() {
  let server = MockServer::start().await;
  Mock::given(method("POST"))
    .and(path("/api/food-postings"))
    .and(header_exists("Idempotency-Key"))
    .and(body_partial_json(json!({ "title": "Bread" })))
    .respond_with(ResponseTemplate::new(201))
    .expect(1)
    .mount(&server)
    .await;
  Mock::given(method("POST"))
    .and(path("/api/food-postings"))
    .and(body_partial_json(json!({ "title": "Rice" })))
    .respond_with(ResponseTemplate::new(500))
    .mount(&server)
    .await;

  let dir = TempDir::new().unwrap();
  let outbox_path = dir.path().join(OUTBOX_DB);
  {
    let outbox = Outbox::new(SqliteOutbox::open(&outbox_path).unwrap());
    outbox.enqueue(draft("Bread")).unwrap();
    outbox.enqueue(draft("Rice")).unwrap();
  }

  // Reopen to exercise durability across restarts
  let outbox = Outbox::new(SqliteOutbox::open(&outbox_path).unwrap());
  let fetcher = Arc::new(HttpFetcher::new(url(&server, "/")).unwrap());
  let coordinator = SyncCoordinator::new(outbox.clone(), fetcher, url(&server, "/api/food-postings"));

  let report = coordinator.run_pass().await.unwrap();

  assert_eq!(report.delivered.len(), 1);
  assert_eq!(report.failed.len(), 1);
  let remaining: Vec<String> = outbox
    .snapshot()
    .unwrap()
    .into_iter()
    .map(|item| item.posting.title)
    .collect();
  assert_eq!(remaining, vec!["Rice".to_string()]);
}
