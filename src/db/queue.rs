//! The durable mutation queue table.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::{format_ts, parse_ts, LocalStore};
use crate::error::{StoreError, StoreResult};

/// Kind of mutation replayed against the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
  Create,
  Update,
  Delete,
}

impl Operation {
  pub fn as_str(&self) -> &'static str {
    match self {
      Operation::Create => "create",
      Operation::Update => "update",
      Operation::Delete => "delete",
    }
  }
}

impl fmt::Display for Operation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Operation {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "create" => Ok(Operation::Create),
      "update" => Ok(Operation::Update),
      "delete" => Ok(Operation::Delete),
      other => Err(format!("unknown operation '{}'", other)),
    }
  }
}

/// Lifecycle state of a queue row.
///
/// `Completed` is terminal. A failed attempt goes back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
  Pending,
  Processing,
  Completed,
}

impl QueueStatus {
  pub const ALL: [QueueStatus; 3] = [
    QueueStatus::Pending,
    QueueStatus::Processing,
    QueueStatus::Completed,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      QueueStatus::Pending => "pending",
      QueueStatus::Processing => "processing",
      QueueStatus::Completed => "completed",
    }
  }
}

impl FromStr for QueueStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(QueueStatus::Pending),
      "processing" => Ok(QueueStatus::Processing),
      "completed" => Ok(QueueStatus::Completed),
      other => Err(format!("unknown status '{}'", other)),
    }
  }
}

/// A persisted mutation awaiting (or done with) replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
  pub id: i64,
  pub operation: Operation,
  pub collection: String,
  pub document_id: Option<String>,
  pub payload: Value,
  pub owner_id: String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub retry_count: u32,
  pub status: QueueStatus,
  pub last_error: Option<String>,
}

/// Live per-status counts of the queue table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
  pub pending: usize,
  pub processing: usize,
  pub completed: usize,
  pub total: usize,
}

const ITEM_COLUMNS: &str = "id, operation, collection, document_id, payload, owner_id, created_at,
   COALESCE(updated_at, created_at), retry_count, status, last_error";

impl LocalStore {
  /// Persist a new pending row and return its id.
  pub fn insert_queue_item(
    &self,
    operation: Operation,
    collection: &str,
    owner_id: &str,
    payload: &Value,
    document_id: Option<&str>,
  ) -> StoreResult<i64> {
    let now = format_ts(self.now());
    let payload = serde_json::to_string(payload)?;

    self.write("insert_queue_item", |tx| {
      tx.execute(
        "INSERT INTO sync_queue
           (operation, collection, document_id, payload, owner_id, created_at, updated_at, retry_count, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, 0, ?7)",
        params![
          operation.as_str(),
          collection,
          document_id,
          payload,
          owner_id,
          now,
          QueueStatus::Pending.as_str()
        ],
      )?;
      Ok(tx.last_insert_rowid())
    })
  }

  /// Ids of pending rows, oldest first.
  pub fn pending_queue_ids(&self, limit: usize) -> StoreResult<Vec<i64>> {
    let conn = self.connect()?;
    let mut stmt = conn.prepare(
      "SELECT id FROM sync_queue WHERE status = ?1
       ORDER BY created_at ASC, id ASC LIMIT ?2",
    )?;
    let ids = stmt
      .query_map(params![QueueStatus::Pending.as_str(), limit as i64], |row| row.get(0))?
      .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
  }

  /// Pending rows, oldest first.
  pub fn pending_queue_items(&self, limit: usize) -> StoreResult<Vec<QueueItem>> {
    let conn = self.connect()?;
    let mut stmt = conn.prepare(&format!(
      "SELECT {ITEM_COLUMNS} FROM sync_queue WHERE status = ?1
       ORDER BY created_at ASC, id ASC LIMIT ?2"
    ))?;
    let rows = stmt
      .query_map(
        params![QueueStatus::Pending.as_str(), limit as i64],
        RawQueueRow::from_row,
      )?
      .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(RawQueueRow::into_item).collect()
  }

  pub fn get_queue_item(&self, id: i64) -> StoreResult<Option<QueueItem>> {
    let conn = self.connect()?;
    let raw = conn
      .query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM sync_queue WHERE id = ?1"),
        params![id],
        RawQueueRow::from_row,
      )
      .optional()?;
    raw.map(RawQueueRow::into_item).transpose()
  }

  /// Move a pending row to processing, selecting and flipping it in one
  /// transaction. Returns `None` if the row is gone or no longer pending.
  pub fn claim_queue_item(&self, id: i64) -> StoreResult<Option<QueueItem>> {
    let now = format_ts(self.now());

    self.write("claim_queue_item", |tx| {
      let raw = tx
        .query_row(
          &format!("SELECT {ITEM_COLUMNS} FROM sync_queue WHERE id = ?1 AND status = ?2"),
          params![id, QueueStatus::Pending.as_str()],
          RawQueueRow::from_row,
        )
        .optional()?;

      let Some(raw) = raw else {
        return Ok(None);
      };

      tx.execute(
        "UPDATE sync_queue SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, QueueStatus::Processing.as_str(), now],
      )?;

      let mut item = raw.into_item()?;
      item.status = QueueStatus::Processing;
      item.updated_at = parse_ts("sync_queue", &now)?;
      Ok(Some(item))
    })
  }

  /// processing -> completed.
  pub fn complete_queue_item(&self, id: i64) -> StoreResult<bool> {
    let now = format_ts(self.now());
    self.write("complete_queue_item", |tx| {
      let updated = tx.execute(
        "UPDATE sync_queue SET status = ?2, updated_at = ?3, last_error = NULL
         WHERE id = ?1 AND status = ?4",
        params![
          id,
          QueueStatus::Completed.as_str(),
          now,
          QueueStatus::Processing.as_str()
        ],
      )?;
      Ok(updated > 0)
    })
  }

  /// processing -> pending, bumping `retry_count` and recording `error`.
  pub fn release_queue_item(&self, id: i64, error: &str) -> StoreResult<bool> {
    let now = format_ts(self.now());
    self.write("release_queue_item", |tx| {
      let updated = tx.execute(
        "UPDATE sync_queue
         SET status = ?2, retry_count = retry_count + 1, last_error = ?3, updated_at = ?4
         WHERE id = ?1 AND status = ?5",
        params![
          id,
          QueueStatus::Pending.as_str(),
          error,
          now,
          QueueStatus::Processing.as_str()
        ],
      )?;
      Ok(updated > 0)
    })
  }

  /// Return every processing row to pending without touching `retry_count`.
  pub fn requeue_processing(&self) -> StoreResult<usize> {
    let now = format_ts(self.now());
    self.write("requeue_processing", |tx| {
      Ok(tx.execute(
        "UPDATE sync_queue SET status = ?1, updated_at = ?2 WHERE status = ?3",
        params![
          QueueStatus::Pending.as_str(),
          now,
          QueueStatus::Processing.as_str()
        ],
      )?)
    })
  }

  /// Delete completed rows whose completion is older than `older_than`.
  pub fn reap_completed(&self, older_than: Duration) -> StoreResult<usize> {
    let cutoff = format_ts(self.now() - older_than);
    self.write("reap_completed", |tx| {
      Ok(tx.execute(
        "DELETE FROM sync_queue
         WHERE status = ?1 AND COALESCE(updated_at, created_at) < ?2",
        params![QueueStatus::Completed.as_str(), cutoff],
      )?)
    })
  }

  /// Count rows per status, straight from the table.
  pub fn queue_stats(&self) -> StoreResult<QueueStats> {
    let conn = self.connect()?;
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")?;
    let counts = stmt
      .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
      .collect::<Result<Vec<_>, _>>()?;

    let mut stats = QueueStats::default();
    for (status, count) in counts {
      let count = count as usize;
      stats.total += count;
      match status.parse::<QueueStatus>() {
        Ok(QueueStatus::Pending) => stats.pending += count,
        Ok(QueueStatus::Processing) => stats.processing += count,
        Ok(QueueStatus::Completed) => stats.completed += count,
        Err(_) => {}
      }
    }
    Ok(stats)
  }
}

struct RawQueueRow {
  id: i64,
  operation: String,
  collection: String,
  document_id: Option<String>,
  payload: String,
  owner_id: String,
  created_at: String,
  updated_at: String,
  retry_count: i64,
  status: String,
  last_error: Option<String>,
}

impl RawQueueRow {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      operation: row.get(1)?,
      collection: row.get(2)?,
      document_id: row.get(3)?,
      payload: row.get(4)?,
      owner_id: row.get(5)?,
      created_at: row.get(6)?,
      updated_at: row.get(7)?,
      retry_count: row.get(8)?,
      status: row.get(9)?,
      last_error: row.get(10)?,
    })
  }

  fn into_item(self) -> StoreResult<QueueItem> {
    let corrupt = |message: String| StoreError::Corrupt {
      table: "sync_queue",
      message,
    };

    Ok(QueueItem {
      id: self.id,
      operation: self.operation.parse().map_err(corrupt)?,
      status: self.status.parse().map_err(corrupt)?,
      payload: serde_json::from_str(&self.payload)?,
      created_at: parse_ts("sync_queue", &self.created_at)?,
      updated_at: parse_ts("sync_queue", &self.updated_at)?,
      retry_count: u32::try_from(self.retry_count).unwrap_or(u32::MAX),
      collection: self.collection,
      document_id: self.document_id,
      owner_id: self.owner_id,
      last_error: self.last_error,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::test_support::test_store;
  use serde_json::json;

  fn insert(store: &LocalStore, owner: &str) -> i64 {
    store
      .insert_queue_item(Operation::Create, "flights", owner, &json!({"x": 1}), None)
      .unwrap()
  }

  #[test]
  fn insert_assigns_increasing_ids() {
    let t = test_store();
    let a = insert(&t.store, "u1");
    let b = insert(&t.store, "u1");
    assert!(b > a);

    let item = t.store.get_queue_item(a).unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.retry_count, 0);
    assert_eq!(item.payload, json!({"x": 1}));
    assert_eq!(item.operation, Operation::Create);
  }

  #[test]
  fn pending_ids_are_oldest_first() {
    let t = test_store();
    let first = insert(&t.store, "u1");
    t.clock.advance(Duration::seconds(1));
    let second = insert(&t.store, "u2");
    t.clock.advance(Duration::seconds(1));
    let third = insert(&t.store, "u1");

    assert_eq!(t.store.pending_queue_ids(10).unwrap(), vec![first, second, third]);
    assert_eq!(t.store.pending_queue_ids(2).unwrap(), vec![first, second]);
  }

  #[test]
  fn claim_only_takes_pending_rows_once() {
    let t = test_store();
    let id = insert(&t.store, "u1");

    let claimed = t.store.claim_queue_item(id).unwrap().unwrap();
    assert_eq!(claimed.status, QueueStatus::Processing);
    assert!(t.store.claim_queue_item(id).unwrap().is_none());
    assert!(t.store.pending_queue_ids(10).unwrap().is_empty());
  }

  #[test]
  fn release_bumps_retry_and_records_error() {
    let t = test_store();
    let id = insert(&t.store, "u1");
    t.store.claim_queue_item(id).unwrap();
    assert!(t.store.release_queue_item(id, "boom").unwrap());

    let item = t.store.get_queue_item(id).unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Pending);
    assert_eq!(item.retry_count, 1);
    assert_eq!(item.last_error.as_deref(), Some("boom"));

    // Not processing any more, so a second release is a no-op.
    assert!(!t.store.release_queue_item(id, "again").unwrap());
  }

  #[test]
  fn completed_is_terminal() {
    let t = test_store();
    let id = insert(&t.store, "u1");
    t.store.claim_queue_item(id).unwrap();
    assert!(t.store.complete_queue_item(id).unwrap());

    assert!(t.store.claim_queue_item(id).unwrap().is_none());
    assert!(!t.store.release_queue_item(id, "late").unwrap());
    assert!(!t.store.complete_queue_item(id).unwrap());
    assert_eq!(t.store.requeue_processing().unwrap(), 0);
    assert_eq!(
      t.store.get_queue_item(id).unwrap().unwrap().status,
      QueueStatus::Completed
    );
  }

  #[test]
  fn reap_only_removes_old_completed_rows() {
    let t = test_store();
    let done = insert(&t.store, "u1");
    let pending = insert(&t.store, "u1");
    t.store.claim_queue_item(done).unwrap();
    t.store.complete_queue_item(done).unwrap();

    t.clock.advance(Duration::days(3));
    assert_eq!(t.store.reap_completed(Duration::days(7)).unwrap(), 0);

    t.clock.advance(Duration::days(5));
    assert_eq!(t.store.reap_completed(Duration::days(7)).unwrap(), 1);
    assert!(t.store.get_queue_item(done).unwrap().is_none());
    assert!(t.store.get_queue_item(pending).unwrap().is_some());
  }

  #[test]
  fn stats_count_each_status() {
    let t = test_store();
    let a = insert(&t.store, "u1");
    let b = insert(&t.store, "u1");
    insert(&t.store, "u2");
    t.store.claim_queue_item(a).unwrap();
    t.store.complete_queue_item(a).unwrap();
    t.store.claim_queue_item(b).unwrap();

    assert_eq!(
      t.store.queue_stats().unwrap(),
      QueueStats {
        pending: 1,
        processing: 1,
        completed: 1,
        total: 3,
      }
    );
  }

  #[test]
  fn parses_operations_case_insensitively() {
    assert_eq!("CREATE".parse::<Operation>().unwrap(), Operation::Create);
    assert!("upsert".parse::<Operation>().is_err());
    // Legacy values are rewritten at init, never parsed.
    assert!("failed".parse::<QueueStatus>().is_err());
  }
}
