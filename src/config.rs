use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::DEFAULT_TTL_HOURS;
use crate::db::LocalStore;
use crate::queue::QueueSettings;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  /// SQLite file (defaults to the user data directory)
  pub database_path: Option<PathBuf>,
  pub monitor: MonitorConfig,
  pub queue: QueueConfig,
  pub cache: CacheConfig,
  pub store: StoreConfig,
  pub server: ServerConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
  /// Seconds between reachability probes
  pub interval_secs: u64,
  /// Generic external URL; any answer below 500 counts as online
  pub external_url: String,
  pub external_timeout_secs: u64,
  /// Timeout of the document store health check
  pub internal_timeout_secs: u64,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      interval_secs: 30,
      external_url: "https://www.google.com".to_string(),
      external_timeout_secs: 3,
      internal_timeout_secs: 5,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  pub batch_size: usize,
  /// Pause between replayed items, in milliseconds
  pub item_delay_ms: u64,
  /// Completed items older than this are reaped
  pub retention_days: i64,
  /// Seconds between maintenance sweeps (expired cache rows, reaping)
  pub maintenance_interval_secs: u64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      batch_size: 50,
      item_delay_ms: 100,
      retention_days: 7,
      maintenance_interval_secs: 3600,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub default_ttl_hours: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_hours: DEFAULT_TTL_HOURS,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Base URL of the remote document store
  pub base_url: String,
  pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      base_url: "http://127.0.0.1:8080".to_string(),
      request_timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub bind: SocketAddr,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind: SocketAddr::from(([127, 0, 0, 1], 8700)),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Directory for daily rolling log files; stderr only when unset
  pub directory: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./bimo-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/bimo-offline/config.yaml
  /// 4. Built-in defaults
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("bimo-offline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("bimo-offline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  fn validate(&self) -> Result<()> {
    self.external_url()?;
    self.store_url()?;
    if self.monitor.interval_secs == 0 {
      return Err(eyre!("monitor.interval_secs must be positive"));
    }
    if self.queue.batch_size == 0 {
      return Err(eyre!("queue.batch_size must be positive"));
    }
    if self.cache.default_ttl_hours <= 0 {
      return Err(eyre!("cache.default_ttl_hours must be positive"));
    }
    if self.queue.retention_days <= 0 {
      return Err(eyre!("queue.retention_days must be positive"));
    }
    Ok(())
  }

  pub fn external_url(&self) -> Result<Url> {
    Url::parse(&self.monitor.external_url)
      .map_err(|e| eyre!("Invalid monitor.external_url '{}': {}", self.monitor.external_url, e))
  }

  pub fn store_url(&self) -> Result<Url> {
    Url::parse(&self.store.base_url)
      .map_err(|e| eyre!("Invalid store.base_url '{}': {}", self.store.base_url, e))
  }

  /// Configured database path, else the per-user default.
  pub fn database_path(&self) -> Result<PathBuf> {
    self
      .database_path
      .clone()
      .or_else(LocalStore::default_path)
      .ok_or_else(|| eyre!("Could not determine data directory; set database_path"))
  }

  pub fn queue_settings(&self) -> QueueSettings {
    QueueSettings {
      batch_size: self.queue.batch_size,
      item_delay: Duration::from_millis(self.queue.item_delay_ms),
    }
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.monitor.interval_secs)
  }

  pub fn default_ttl(&self) -> chrono::Duration {
    chrono::Duration::hours(self.cache.default_ttl_hours)
  }

  pub fn retention(&self) -> chrono::Duration {
    chrono::Duration::days(self.queue.retention_days)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_file_gives_defaults() {
    let config = Config::from_yaml("{}").unwrap();
    config.validate().unwrap();
    assert_eq!(config.queue.batch_size, 50);
    assert_eq!(config.queue_settings().item_delay, Duration::from_millis(100));
    assert_eq!(config.default_ttl(), chrono::Duration::hours(24));
    assert_eq!(config.retention(), chrono::Duration::days(7));
  }

  #[test]
  fn partial_sections_keep_other_defaults() {
    let config = Config::from_yaml(
      "database_path: /tmp/bimo/offline.db\n\
       monitor:\n  interval_secs: 5\n\
       store:\n  base_url: https://docs.example.com/v1\n\
       server:\n  bind: 0.0.0.0:9000\n",
    )
    .unwrap();
    config.validate().unwrap();

    assert_eq!(config.probe_interval(), Duration::from_secs(5));
    assert_eq!(config.monitor.external_timeout_secs, 3);
    assert_eq!(config.store_url().unwrap().path(), "/v1");
    assert_eq!(config.server.bind.port(), 9000);
    assert_eq!(
      config.database_path().unwrap(),
      PathBuf::from("/tmp/bimo/offline.db")
    );
  }

  #[test]
  fn rejects_bad_urls_and_zero_values() {
    let config = Config::from_yaml("store:\n  base_url: not a url\n").unwrap();
    assert!(config.validate().is_err());

    let config = Config::from_yaml("queue:\n  batch_size: 0\n").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn missing_explicit_path_is_an_error() {
    let dir = tempfile::TempDir::new().unwrap();
    assert!(Config::load(Some(&dir.path().join("nope.yaml"))).is_err());
  }

  #[test]
  fn explicit_path_is_loaded() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("bimo.yaml");
    std::fs::write(&path, "cache:\n  default_ttl_hours: 6\n").unwrap();
    assert_eq!(
      Config::load(Some(&path)).unwrap().default_ttl(),
      chrono::Duration::hours(6)
    );
  }
}
