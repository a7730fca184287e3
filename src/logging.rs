//! Tracing setup: stderr always, plus an optional daily-rolling file.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

const DEFAULT_DIRECTIVE: &str = "food_alert_offline=info,food_alert=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
///
/// Keep the returned guard alive for the life of the process or buffered file
/// output is lost.
pub fn init(config: &LoggingConfig, data_dir: &Path) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
  let stderr = fmt::layer().with_writer(std::io::stderr).with_target(false);
  let registry = tracing_subscriber::registry().with(filter).with(stderr);

  if !config.file {
    registry
      .try_init()
      .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
    return Ok(None);
  }

  let appender = tracing_appender::rolling::daily(data_dir.join("logs"), "food-alert.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  registry
    .with(fmt::layer().with_ansi(false).with_writer(writer))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(Some(guard))
}
