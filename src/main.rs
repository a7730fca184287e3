use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use food_alert_offline::cache::{AssetCache, CacheStorage, SqliteStorage};
use food_alert_offline::client::{Location, PostingClient, PostingForm, Session, Submitted};
use food_alert_offline::config::Config;
use food_alert_offline::db::{CACHE_DB, OUTBOX_DB};
use food_alert_offline::host::{ConnectivityProbe, Host, HostEvent, HostHandle};
use food_alert_offline::logging;
use food_alert_offline::net::{HttpFetcher, Request};
use food_alert_offline::outbox::{Outbox, SqliteOutbox};
use food_alert_offline::sync::SyncCoordinator;
use food_alert_offline::worker::{EventHandler, ServiceWorker};

type Worker = ServiceWorker<SqliteStorage, SqliteOutbox, HttpFetcher>;

#[derive(Parser, Debug)]
#[command(name = "food-alert")]
#[command(about = "Offline asset cache and background sync for Food Alert")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/food-alert/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Base URL of the Food Alert app
  #[arg(short, long)]
  origin: Option<String>,

  /// Directory for the cache and outbox databases
  #[arg(long)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch and store the asset manifest for the configured generation
  Install,
  /// Delete every cache generation except the configured one
  Activate,
  /// Answer a request the way the worker would (cache first)
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
  },
  /// Share food; queued for background sync when offline
  Post {
    #[arg(long)]
    user_id: u64,
    #[arg(long)]
    title: String,
    #[arg(long)]
    description: String,
    #[arg(long)]
    quantity: String,
    /// Deadline, e.g. 2026-10-20T18:00
    #[arg(long)]
    until: String,
    #[arg(long, allow_hyphen_values = true)]
    lat: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    lon: Option<f64>,
    /// If queued, keep running until the posting has synced
    #[arg(long)]
    wait: bool,
  },
  /// Run one background sync pass now
  Sync,
  /// Show the notification a push payload would produce
  Push {
    /// JSON {"title","body"} or plain text
    payload: Option<String>,
  },
  /// Show cache generations and pending postings
  Status,
  /// Install, activate, then sync whenever connectivity returns (Ctrl-C to stop)
  Run,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(data_dir) = args.data_dir {
    config.data_dir = Some(data_dir);
  }

  let data_dir = config.data_dir()?;
  let _log_guard = logging::init(&config.logging, &data_dir)?;

  let origin = config.origin_url()?;
  let fetcher = Arc::new(HttpFetcher::new(origin.clone())?);
  let cache = AssetCache::new(
    SqliteStorage::open(&data_dir.join(CACHE_DB))?,
    config.cache.generation.clone(),
    config.api.prefix.clone(),
  );
  let outbox = Outbox::new(SqliteOutbox::open(&data_dir.join(OUTBOX_DB))?);
  let coordinator = SyncCoordinator::new(outbox.clone(), Arc::clone(&fetcher), config.postings_url()?);
  let worker: Arc<Worker> = Arc::new(ServiceWorker::new(
    cache,
    coordinator,
    Arc::clone(&fetcher),
    config.asset_urls()?,
    config.sync.tag.clone(),
  ));

  match args.command {
    Command::Install => {
      let stored = worker.install().await?;
      println!("Installed {} assets into {}", stored, config.cache.generation);
    }
    Command::Activate => {
      let deleted = worker.activate().await?;
      if deleted.is_empty() {
        println!("{} active, nothing to prune", config.cache.generation);
      } else {
        println!("{} active, deleted {}", config.cache.generation, deleted.join(", "));
      }
    }
    Command::Fetch { url } => {
      let url = origin
        .join(&url)
        .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;
      let result = worker.fetch(Request::get(url)).await?;
      eprintln!("{} ({:?})", result.data.status, result.source);
      std::io::stdout().write_all(&result.data.body)?;
    }
    Command::Post {
      user_id,
      title,
      description,
      quantity,
      until,
      lat,
      lon,
      wait,
    } => {
      let default = Location::default();
      let session = Session::new(user_id).with_location(Location {
        lat: lat.unwrap_or(default.lat),
        lng: lon.unwrap_or(default.lng),
      });
      let form = PostingForm {
        title,
        description,
        quantity,
        available_until: until,
      };
      let (host, handle) = Host::new(Arc::clone(&worker));
      let client = PostingClient::new(
        Arc::clone(&fetcher),
        outbox.clone(),
        config.postings_url()?,
        config.sync.tag.clone(),
      )
      .with_host(handle.clone());

      let submitted = client.submit(&session, form).await?;
      match submitted {
        Submitted::Created(_) => println!("Food posted successfully"),
        Submitted::Queued(item) if wait => {
          println!("Offline: posting #{} queued, waiting for the network", item.id);
          let probe = ConnectivityProbe::new(
            Arc::clone(&fetcher),
            origin.clone(),
            config.probe_interval(),
            config.sync.tag.clone(),
          );
          let host_task = tokio::spawn(host.run());
          let probe_task = tokio::spawn(probe.run(handle.clone()));
          drop(client);

          let mut ticker = tokio::time::interval(Duration::from_secs(1));
          loop {
            tokio::select! {
              _ = tokio::signal::ctrl_c() => break,
              _ = ticker.tick() => {
                if outbox.is_empty()? {
                  println!("Posting synced");
                  break;
                }
              }
            }
          }

          stop(host_task, probe_task, handle).await?;
        }
        Submitted::Queued(item) => println!(
          "Offline: posting #{} will sync when you're back online",
          item.id
        ),
        Submitted::Rejected { status } => {
          return Err(eyre!("Server rejected the posting with status {}", status))
        }
      }
    }
    Command::Sync => match worker.sync(&config.sync.tag).await? {
      Some(report) => println!(
        "Delivered {}, still pending {}",
        report.delivered.len(),
        report.failed.len()
      ),
      None => println!("Nothing to sync"),
    },
    Command::Push { payload } => {
      let notification = worker.push(payload.as_deref().map(str::as_bytes)).await;
      println!("{}: {}", notification.title, notification.body);
    }
    Command::Status => {
      let storage = worker.cache().storage();
      for generation in storage.generations()? {
        println!(
          "generation {}{}{} ({} entries)",
          generation.name,
          if generation.installed { "" } else { " [incomplete]" },
          if generation.name == config.cache.generation { " *" } else { "" },
          storage.entry_count(&generation.name)?
        );
      }
      let pending = outbox.snapshot()?;
      println!("{} postings pending sync", pending.len());
      for item in pending {
        println!(
          "  #{} {} (queued {})",
          item.id,
          item.posting.title,
          item.enqueued_at.format("%Y-%m-%d %H:%M")
        );
      }
    }
    Command::Run => {
      let (host, handle) = Host::new(Arc::clone(&worker));
      handle.dispatch(HostEvent::Install);
      handle.dispatch(HostEvent::Activate);

      let probe = ConnectivityProbe::new(
        Arc::clone(&fetcher),
        origin.clone(),
        config.probe_interval(),
        config.sync.tag.clone(),
      );
      let host_task = tokio::spawn(host.run());
      let probe_task = tokio::spawn(probe.run(handle.clone()));

      info!(origin = %origin, "Watching connectivity, Ctrl-C to stop");
      tokio::signal::ctrl_c().await?;

      stop(host_task, probe_task, handle).await?;
    }
  }

  Ok(())
}

/// Stop probing, then let the host finish in-flight events.
async fn stop(host_task: JoinHandle<()>, probe_task: JoinHandle<()>, handle: HostHandle) -> Result<()> {
  probe_task.abort();
  let _ = probe_task.await;
  drop(handle);
  host_task.await?;
  Ok(())
}
