//! Read-through cache that picks its strategy from the network status.

use chrono::Duration;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::keys::CacheKey;
use super::storage::CacheStorage;
use super::traits::CacheResult;
use crate::db::LocalStore;
use crate::error::{CacheError, RemoteError, StoreResult};
use crate::network::{NetworkMonitor, NetworkStatus};

pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Cache layer that sits between callers and a remote fetch.
///
/// - offline: serve the cache, never fetch
/// - online (or forced): fetch and store, falling back to the cache on failure
/// - unknown: serve the cache, fetching only on a miss
pub struct CacheService<S: CacheStorage = LocalStore> {
  storage: Arc<S>,
  monitor: Arc<NetworkMonitor>,
  default_ttl: Duration,
}

impl<S: CacheStorage> CacheService<S> {
  pub fn new(storage: Arc<S>, monitor: Arc<NetworkMonitor>) -> Self {
    Self {
      storage,
      monitor,
      default_ttl: Duration::hours(DEFAULT_TTL_HOURS),
    }
  }

  /// TTL used by callers that do not pick one per read.
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  pub async fn get_or_fetch<F, Fut>(
    &self,
    key: &CacheKey,
    fetch: F,
    ttl: Duration,
    force_refresh: bool,
  ) -> Result<CacheResult<Value>, CacheError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, RemoteError>>,
  {
    let status = self.monitor.status();

    if !force_refresh && status == NetworkStatus::Offline {
      return match self.storage.load(key)? {
        Some(data) => {
          debug!(%key, "offline, serving cache");
          Ok(CacheResult::offline(data))
        }
        None => Err(CacheError::OfflineUnavailable {
          key: key.to_string(),
        }),
      };
    }

    if force_refresh || status == NetworkStatus::Online {
      return match fetch().await {
        Ok(data) => {
          self.save(key, &data, ttl);
          Ok(CacheResult::from_network(data))
        }
        Err(source) => self.fall_back(key, source),
      };
    }

    // Unknown: cache first, then one fetch attempt.
    if let Some(data) = self.storage.load(key)? {
      return Ok(CacheResult::from_cache(data));
    }
    match fetch().await {
      Ok(data) => {
        self.save(key, &data, ttl);
        Ok(CacheResult::from_network(data))
      }
      Err(source) => Err(CacheError::Fetch {
        key: key.to_string(),
        source,
      }),
    }
  }

  /// Serve a cached copy after a failed fetch, else surface the fetch error.
  fn fall_back(&self, key: &CacheKey, source: RemoteError) -> Result<CacheResult<Value>, CacheError> {
    match self.storage.load(key) {
      Ok(Some(data)) => {
        warn!(%key, error = %source, "fetch failed, serving cached copy");
        return Ok(CacheResult::stale_fallback(data));
      }
      Ok(None) => {}
      Err(e) => warn!(%key, error = %e, "cache lookup failed during fallback"),
    }
    Err(CacheError::Fetch {
      key: key.to_string(),
      source,
    })
  }

  /// Cache writes never fail the read.
  fn save(&self, key: &CacheKey, data: &Value, ttl: Duration) {
    if let Err(e) = self.storage.store(key, data, ttl) {
      warn!(%key, error = %e, "failed to cache value");
    }
  }

  pub fn invalidate(&self, key: &CacheKey) -> StoreResult<usize> {
    let removed = self.storage.invalidate(key)?;
    debug!(%key, removed, "invalidated cache entry");
    Ok(removed)
  }

  /// Sweep expired rows. Live entries are kept.
  pub fn clear_all(&self) -> StoreResult<usize> {
    self.storage.clear_expired()
  }
}

impl<S: CacheStorage> Clone for CacheService<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      monitor: Arc::clone(&self.monitor),
      default_ttl: self.default_ttl,
    }
  }
}
