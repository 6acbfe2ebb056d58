//! Error types shared by the offline core.

use thiserror::Error;

/// Result alias for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures raised by the embedded SQLite store.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("failed to prepare database directory {path}: {source}")]
  Directory {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to open database at {path}: {source}")]
  Open {
    path: String,
    #[source]
    source: rusqlite::Error,
  },

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("failed to (de)serialize stored value: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("corrupt row in {table}: {message}")]
  Corrupt { table: &'static str, message: String },

  #[error("ttl must be positive, got {seconds}s")]
  InvalidTtl { seconds: i64 },

  #[error("{namespace} cache expects {expected}")]
  UnexpectedShape {
    namespace: &'static str,
    expected: &'static str,
  },
}

/// Failures reported by a remote collaborator (fetch or apply).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
  #[error("remote unreachable: {0}")]
  Unreachable(String),

  #[error("remote rejected request ({status}): {message}")]
  Rejected { status: u16, message: String },

  #[error("invalid mutation: {0}")]
  InvalidMutation(String),

  #[error("{0}")]
  Other(String),
}

impl RemoteError {
  pub fn other(message: impl Into<String>) -> Self {
    RemoteError::Other(message.into())
  }
}

impl From<reqwest::Error> for RemoteError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_timeout() || err.is_connect() {
      RemoteError::Unreachable(err.to_string())
    } else {
      RemoteError::Other(err.to_string())
    }
  }
}

/// Failures of the read-through cache.
#[derive(Error, Debug)]
pub enum CacheError {
  /// Read requested while offline and nothing usable is cached.
  #[error("{key} is not available offline")]
  OfflineUnavailable { key: String },

  /// Live fetch failed and no cached copy exists.
  #[error("fetch for {key} failed: {source}")]
  Fetch {
    key: String,
    #[source]
    source: RemoteError,
  },

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Failures of the write path that reach the caller.
#[derive(Error, Debug)]
pub enum QueueError {
  /// The mutation can never be replayed (e.g. an update without a document id).
  #[error("invalid mutation: {0}")]
  InvalidMutation(String),

  #[error(transparent)]
  Store(#[from] StoreError),
}
