use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL of the Food Alert app; same-origin responses are cacheable
  pub origin: String,
  /// Where cache.db, outbox.db and logs live (defaults to $XDG_DATA_HOME/food-alert)
  pub data_dir: Option<PathBuf>,
  pub cache: CacheConfig,
  pub api: ApiConfig,
  pub sync: SyncConfig,
  pub logging: LoggingConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:5000".to_string(),
      data_dir: None,
      cache: CacheConfig::default(),
      api: ApiConfig::default(),
      sync: SyncConfig::default(),
      logging: LoggingConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Generation tag; bump it on every deploy
  pub generation: String,
  /// Asset manifest, relative to `origin` or absolute
  pub assets: Vec<String>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      generation: "food-alert-v1".to_string(),
      assets: [
        "/",
        "/static/app.js",
        "/static/manifest.json",
        "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css",
        "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.4.0/css/all.min.css",
        "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css",
        "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/js/bootstrap.bundle.min.js",
        "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js",
      ]
      .into_iter()
      .map(String::from)
      .collect(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Path fragment that marks a request as an API call (never cached)
  #[serde(deserialize_with = "deserialize_path_prefix")]
  pub prefix: String,
  /// Write endpoint for new postings
  pub postings_path: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      prefix: "/api/".to_string(),
      postings_path: "/api/food-postings".to_string(),
    }
  }
}

/// Normalize to a path fragment with leading and trailing slashes.
fn deserialize_path_prefix<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let raw = String::deserialize(deserializer)?;
  let trimmed = raw.trim().trim_matches('/');
  if trimmed.is_empty() {
    return Err(serde::de::Error::custom("api prefix must not be empty"));
  }
  Ok(format!("/{}/", trimmed))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Background-sync tag the worker answers to
  pub tag: String,
  /// How often the host probes connectivity
  pub probe_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "sync-food-postings".to_string(),
      probe_interval_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Also write a daily-rolling log file under `<data_dir>/logs`
  pub file: bool,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./food-alert.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/food-alert/config.yaml
  ///
  /// Built-in defaults are used when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("food-alert.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("food-alert").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.origin_url()?;
    Ok(config)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve the asset manifest against the origin.
  pub fn asset_urls(&self) -> Result<Vec<Url>> {
    let origin = self.origin_url()?;
    self
      .cache
      .assets
      .iter()
      .map(|asset| {
        origin
          .join(asset)
          .map_err(|e| eyre!("Invalid asset URL '{}': {}", asset, e))
      })
      .collect()
  }

  pub fn postings_url(&self) -> Result<Url> {
    self
      .origin_url()?
      .join(&self.api.postings_path)
      .map_err(|e| eyre!("Invalid postings path '{}': {}", self.api.postings_path, e))
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.sync.probe_interval_secs.max(1))
  }

  /// Data directory, falling back to the platform data dir.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("food-alert"))
  }
}
