//! Result types for the caching system.

use serde::Serialize;

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  /// Fresh data from the network.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  /// Unexpired cached data served without a fetch.
  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }

  /// Cached data served because the monitor reports offline.
  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
    }
  }

  /// Cached data served after a failed fetch.
  pub fn stale_fallback(data: T) -> Self {
    Self {
      data,
      source: CacheSource::StaleFallback,
    }
  }

  pub fn into_data(self) -> T {
    self.data
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Cache hit while connectivity was unknown
  Cache,
  /// Offline mode - network unavailable, serving cached data
  Offline,
  /// Fetch failed, serving the last cached copy
  StaleFallback,
}
