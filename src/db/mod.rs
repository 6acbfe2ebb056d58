//! Embedded SQLite store backing the offline core.
//!
//! Every operation opens its own short-lived connection, so callers never
//! share a handle and never need a cross-call lock. Mutating operations run
//! inside a transaction that is committed on success and rolled back on error.

mod cached;
mod flights;
mod queue;
pub mod schema;

pub use flights::{is_flight_collection, FlightRecord};
pub use queue::{Operation, QueueItem, QueueStats, QueueStatus};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};

/// How long a connection waits on a locked database file.
const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// File-backed local store.
pub struct LocalStore {
  path: PathBuf,
  clock: Arc<dyn Clock>,
}

impl LocalStore {
  /// Open (or create) the store at `path` using the wall clock.
  pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
    Self::open_with_clock(path, Arc::new(SystemClock))
  }

  /// Open (or create) the store with an explicit time source.
  pub fn open_with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> StoreResult<Self> {
    let path = path.into();

    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent).map_err(|source| StoreError::Directory {
        path: parent.display().to_string(),
        source,
      })?;
    }

    let store = Self { path, clock };
    store.init()?;
    Ok(store)
  }

  /// Default database location under the user data directory.
  pub fn default_path() -> Option<PathBuf> {
    let data_dir = dirs::data_dir().or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))?;
    Some(data_dir.join("bimo-offline").join("offline.db"))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Current time according to the store's clock.
  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  /// Create tables, indexes and any columns added since the file was made.
  ///
  /// Safe to call any number of times.
  pub fn init(&self) -> StoreResult<()> {
    self.write("init", |tx| {
      for (table, key_column) in schema::REKEYED_CACHE_TABLES {
        drop_if_keyed_differently(tx, table, key_column)?;
      }
      tx.execute_batch(schema::SCHEMA)?;
      for (table, column, decl) in schema::ADDED_COLUMNS {
        ensure_column(tx, table, column, decl)?;
      }
      for (legacy, current) in schema::LEGACY_QUEUE_STATUSES {
        let mapped = tx.execute(
          "UPDATE sync_queue SET status = ?2 WHERE status = ?1",
          [legacy, current],
        )?;
        if mapped > 0 {
          debug!(mapped, from = legacy, to = current, "mapped legacy queue status");
        }
      }
      Ok(())
    })?;
    debug!(path = %self.path.display(), "local store initialized");
    Ok(())
  }

  /// Delete every TTL-bearing row whose `expires_at` has passed.
  ///
  /// Returns the number of rows removed. Never scheduled internally.
  pub fn clear_expired(&self) -> StoreResult<usize> {
    let now = format_ts(self.now());
    let removed = self.write("clear_expired", |tx| {
      let mut removed = 0;
      for table in schema::TTL_TABLES {
        removed += tx.execute(
          &format!("DELETE FROM {table} WHERE expires_at <= ?1"),
          [&now],
        )?;
      }
      Ok(removed)
    })?;
    debug!(removed, "cleared expired cache rows");
    Ok(removed)
  }

  /// Open a fresh connection for a single operation.
  pub(crate) fn connect(&self) -> StoreResult<Connection> {
    let conn = Connection::open(&self.path).map_err(|source| StoreError::Open {
      path: self.path.display().to_string(),
      source,
    })?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
  }

  /// Run `f` inside a transaction on a fresh connection.
  pub(crate) fn write<T, F>(&self, op: &'static str, f: F) -> StoreResult<T>
  where
    F: FnOnce(&Transaction<'_>) -> StoreResult<T>,
  {
    let mut conn = self.connect()?;
    let tx = conn.transaction()?;
    match f(&tx) {
      Ok(value) => {
        tx.commit()?;
        Ok(value)
      }
      Err(e) => {
        if let Err(rollback) = tx.rollback() {
          warn!(op, error = %rollback, "rollback failed");
        }
        warn!(op, error = %e, "store write rolled back");
        Err(e)
      }
    }
  }

  /// `now + ttl` formatted for storage; rejects non-positive TTLs.
  pub(crate) fn expiry(&self, ttl: Duration) -> StoreResult<(String, String)> {
    if ttl <= Duration::zero() {
      return Err(StoreError::InvalidTtl {
        seconds: ttl.num_seconds(),
      });
    }
    let now = self.now();
    Ok((format_ts(now), format_ts(now + ttl)))
  }
}

/// Add `column` to `table` unless it already exists.
fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> StoreResult<()> {
  let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
  let exists = stmt
    .query_map([], |row| row.get::<_, String>(1))?
    .filter_map(|r| r.ok())
    .any(|name| name == column);

  if !exists {
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
    debug!(table, column, "added column");
  }
  Ok(())
}

/// Drop `table` when it exists without `key_column` in its primary key.
fn drop_if_keyed_differently(conn: &Connection, table: &str, key_column: &str) -> StoreResult<()> {
  let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
  let columns = stmt
    .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, i64>(5)?)))?
    .collect::<Result<Vec<_>, _>>()?;

  let keyed = columns.iter().any(|(name, pk)| name == key_column && *pk > 0);
  if !columns.is_empty() && !keyed {
    conn.execute_batch(&format!("DROP TABLE {table}"))?;
    debug!(table, "dropped cache table with outdated key");
  }
  Ok(())
}

/// Fixed-width UTC timestamps, so lexical order matches time order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
  ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(table: &'static str, s: &str) -> StoreResult<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StoreError::Corrupt {
      table,
      message: format!("bad timestamp '{}': {}", s, e),
    })
}
