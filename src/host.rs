//! Host runtime: delivers events to the worker and watches connectivity.

use reqwest::Method;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::CacheResult;
use crate::error::FetchError;
use crate::net::{Fetch, Request, Response};
use crate::worker::EventHandler;

type FetchReply = oneshot::Sender<Result<CacheResult<Response>, FetchError>>;

/// Events the host delivers to the worker
#[derive(Debug)]
pub enum HostEvent {
  Install,
  Activate,
  Fetch { request: Request, reply: FetchReply },
  Sync { tag: String },
  Push { payload: Option<Vec<u8>> },
}

/// Cloneable handle for sending events to a running [`Host`].
#[derive(Clone)]
pub struct HostHandle {
  tx: mpsc::UnboundedSender<HostEvent>,
  /// Sync tags registered by the foreground, fired once online
  pending: Arc<Mutex<BTreeSet<String>>>,
}

impl HostHandle {
  /// Queue an event. Returns false once the host has stopped.
  pub fn dispatch(&self, event: HostEvent) -> bool {
    self.tx.send(event).is_ok()
  }

  /// Ask for a background sync the next time the network is reachable.
  pub fn register_sync(&self, tag: &str) {
    if let Ok(mut pending) = self.pending.lock() {
      pending.insert(tag.to_string());
    }
  }

  fn take_pending(&self) -> Vec<String> {
    self
      .pending
      .lock()
      .map(|mut pending| std::mem::take(&mut *pending).into_iter().collect())
      .unwrap_or_default()
  }

  /// Route a request through the worker and wait for its answer.
  pub async fn fetch(&self, request: Request) -> Result<CacheResult<Response>, FetchError> {
    let (reply, rx) = oneshot::channel();
    if !self.dispatch(HostEvent::Fetch { request, reply }) {
      return Err(FetchError::InvalidRequest("worker host is not running".to_string()));
    }
    rx.await
      .map_err(|_| FetchError::InvalidRequest("worker dropped the request".to_string()))?
  }
}

/// Delivers events to an [`EventHandler`].
///
/// Lifecycle events (install, activate) run one at a time in order. Fetch,
/// sync and push events run as tasks so a long sync pass never stalls
/// request handling. On shutdown the host waits for every in-flight event.
pub struct Host<H: EventHandler> {
  handler: Arc<H>,
  events: mpsc::UnboundedReceiver<HostEvent>,
  tasks: JoinSet<()>,
}

impl<H: EventHandler + 'static> Host<H> {
  pub fn new(handler: Arc<H>) -> (Self, HostHandle) {
    let (tx, events) = mpsc::unbounded_channel();
    let host = Self {
      handler,
      events,
      tasks: JoinSet::new(),
    };
    let handle = HostHandle {
      tx,
      pending: Arc::new(Mutex::new(BTreeSet::new())),
    };
    (host, handle)
  }

  /// Run until every handle is dropped, then wait for in-flight events.
  pub async fn run(mut self) {
    loop {
      tokio::select! {
        event = self.events.recv() => match event {
          Some(event) => self.dispatch(event).await,
          None => break,
        },
        Some(joined) = self.tasks.join_next() => {
          if let Err(e) = joined {
            error!(error = %e, "Event task failed");
          }
        }
      }
    }

    while let Some(joined) = self.tasks.join_next().await {
      if let Err(e) = joined {
        error!(error = %e, "Event task failed");
      }
    }
    info!("Host stopped");
  }

  async fn dispatch(&mut self, event: HostEvent) {
    match event {
      HostEvent::Install => match self.handler.install().await {
        Ok(stored) => info!(stored, "Install event complete"),
        Err(e) => error!(error = %e, "Install event failed, previous generation stays active"),
      },
      HostEvent::Activate => match self.handler.activate().await {
        Ok(pruned) => info!(?pruned, "Activate event complete"),
        Err(e) => warn!(error = %e, "Activate event failed"),
      },
      HostEvent::Fetch { request, reply } => {
        let handler = Arc::clone(&self.handler);
        self.tasks.spawn(async move {
          let result = handler.fetch(request).await;
          // The requester may have given up
          let _ = reply.send(result);
        });
      }
      HostEvent::Sync { tag } => {
        let handler = Arc::clone(&self.handler);
        self.tasks.spawn(async move {
          match handler.sync(&tag).await {
            Ok(Some(report)) if !report.is_complete() => {
              info!(tag = %tag, failed = report.failed.len(), "Sync finished with items left for next trigger")
            }
            Ok(_) => debug!(tag = %tag, "Sync event complete"),
            Err(e) => warn!(tag = %tag, error = %e, "Sync event failed, waiting for next trigger"),
          }
        });
      }
      HostEvent::Push { payload } => {
        let handler = Arc::clone(&self.handler);
        self.tasks.spawn(async move {
          let notification = handler.push(payload.as_deref()).await;
          info!(title = %notification.title, body = %notification.body, "Notification");
        });
      }
    }
  }
}

/// Tracks reachability and reports offline-to-online transitions.
#[derive(Debug, Default)]
pub struct Connectivity {
  online: bool,
}

impl Connectivity {
  /// Record a probe result. Returns true when connectivity was just restored.
  pub fn observe(&mut self, reachable: bool) -> bool {
    let restored = reachable && !self.online;
    if self.online && !reachable {
      info!("Connectivity lost");
    }
    self.online = reachable;
    restored
  }

  pub fn is_online(&self) -> bool {
    self.online
  }
}

/// Periodically probes the origin and fires background sync when online.
pub struct ConnectivityProbe<F: Fetch> {
  fetcher: Arc<F>,
  target: Url,
  interval: Duration,
  sync_tag: String,
}

impl<F: Fetch> ConnectivityProbe<F> {
  pub fn new(fetcher: Arc<F>, target: Url, interval: Duration, sync_tag: impl Into<String>) -> Self {
    Self {
      fetcher,
      target,
      interval,
      sync_tag: sync_tag.into(),
    }
  }

  /// Any response, whatever its status, means the network is reachable.
  async fn reachable(&self) -> bool {
    let mut request = Request::get(self.target.clone());
    request.method = Method::HEAD;
    self.fetcher.fetch(request).await.is_ok()
  }

  /// Probe once and fire pending syncs. Returns false once the host has stopped.
  pub async fn poll_once(&self, state: &mut Connectivity, host: &HostHandle) -> bool {
    if state.observe(self.reachable().await) {
      info!(tag = %self.sync_tag, "Connectivity restored");
      host.register_sync(&self.sync_tag);
    }

    if state.is_online() {
      for tag in host.take_pending() {
        if !host.dispatch(HostEvent::Sync { tag }) {
          return false;
        }
      }
    }
    true
  }

  /// Probe on every interval tick until the host stops.
  pub async fn run(self, host: HostHandle) {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut state = Connectivity::default();

    loop {
      ticker.tick().await;
      if !self.poll_once(&mut state, &host).await {
        break;
      }
    }
  }
}
