//! Per-owner flight records.
//!
//! Rows written by a successful remote write are `synced`; rows written while
//! offline are local shadows (`synced = 0`) until their queued mutation lands.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;
use tracing::debug;

use super::{format_ts, parse_ts, LocalStore};
use crate::error::StoreResult;

/// Collection names whose documents are mirrored into `my_flights`.
const FLIGHT_COLLECTIONS: &[&str] = &["flights", "myFlights", "my_flights", "users/{userId}/myFlights"];

pub fn is_flight_collection(collection: &str) -> bool {
  FLIGHT_COLLECTIONS.contains(&collection)
}

/// A stored flight row.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightRecord {
  pub id: String,
  pub owner_id: String,
  pub data: Value,
  pub synced: bool,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

fn text_field(data: &Value, field: &str) -> String {
  data
    .get(field)
    .and_then(Value::as_str)
    .unwrap_or_default()
    .to_string()
}

const UPSERT_FLIGHT: &str = "INSERT INTO my_flights
     (id, owner_id, flight_number, airline_code, departure_time, status, data, created_at, updated_at, synced)
   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)
   ON CONFLICT(owner_id, id) DO UPDATE SET
     flight_number = excluded.flight_number,
     airline_code = excluded.airline_code,
     departure_time = excluded.departure_time,
     status = excluded.status,
     data = excluded.data,
     updated_at = excluded.updated_at,
     synced = excluded.synced";

impl LocalStore {
  /// Insert or update one flight for `owner_id`.
  pub fn save_flight(&self, owner_id: &str, flight_id: &str, flight: &Value, synced: bool) -> StoreResult<()> {
    let now = format_ts(self.now());
    let data = serde_json::to_string(flight)?;

    self.write("save_flight", |tx| {
      tx.execute(
        UPSERT_FLIGHT,
        params![
          flight_id,
          owner_id,
          text_field(flight, "flightNumber"),
          text_field(flight, "airlineCode"),
          text_field(flight, "departureTime"),
          flight
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("scheduled"),
          data,
          now,
          synced
        ],
      )?;
      Ok(())
    })
  }

  /// All flights for `owner_id`, latest departure first.
  pub fn get_flights(&self, owner_id: &str) -> StoreResult<Vec<Value>> {
    Ok(
      self
        .flight_records(owner_id)?
        .into_iter()
        .map(|record| record.data)
        .collect(),
    )
  }

  pub fn flight_records(&self, owner_id: &str) -> StoreResult<Vec<FlightRecord>> {
    let conn = self.connect()?;
    let mut stmt = conn.prepare(
      "SELECT id, owner_id, data, synced, created_at, updated_at FROM my_flights
       WHERE owner_id = ?1
       ORDER BY departure_time DESC, id",
    )?;
    let rows = stmt
      .query_map(params![owner_id], RawFlight::from_row)?
      .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(RawFlight::into_record).collect()
  }

  pub fn get_flight(&self, owner_id: &str, flight_id: &str) -> StoreResult<Option<FlightRecord>> {
    let conn = self.connect()?;
    let raw = conn
      .query_row(
        "SELECT id, owner_id, data, synced, created_at, updated_at FROM my_flights
         WHERE owner_id = ?1 AND id = ?2",
        params![owner_id, flight_id],
        RawFlight::from_row,
      )
      .optional()?;
    raw.map(RawFlight::into_record).transpose()
  }

  pub fn delete_flight(&self, owner_id: &str, flight_id: &str) -> StoreResult<bool> {
    self.write("delete_flight", |tx| {
      let removed = tx.execute(
        "DELETE FROM my_flights WHERE owner_id = ?1 AND id = ?2",
        params![owner_id, flight_id],
      )?;
      Ok(removed > 0)
    })
  }

  /// Flag the flight as synced unless a queued mutation for it is still
  /// pending or processing. Returns false when nothing was flagged.
  pub fn mark_flight_synced(&self, owner_id: &str, flight_id: &str) -> StoreResult<bool> {
    let now = format_ts(self.now());
    let collections = FLIGHT_COLLECTIONS
      .iter()
      .map(|c| format!("'{}'", c))
      .collect::<Vec<_>>()
      .join(", ");

    self.write("mark_flight_synced", |tx| {
      let updated = tx.execute(
        &format!(
          "UPDATE my_flights SET synced = 1, updated_at = ?3
           WHERE owner_id = ?1 AND id = ?2
             AND NOT EXISTS (
               SELECT 1 FROM sync_queue
               WHERE owner_id = ?1 AND document_id = ?2
                 AND status IN ('pending', 'processing')
                 AND collection IN ({collections})
             )"
        ),
        params![owner_id, flight_id, now],
      )?;
      Ok(updated > 0)
    })
  }

  /// Drop the synced flights of `owner_id`, keeping local shadows.
  pub fn delete_synced_flights(&self, owner_id: &str) -> StoreResult<usize> {
    self.write("delete_synced_flights", |tx| {
      Ok(tx.execute(
        "DELETE FROM my_flights WHERE owner_id = ?1 AND synced = 1",
        params![owner_id],
      )?)
    })
  }

  /// Replace the synced flights of `owner_id` with a fresh remote listing.
  ///
  /// Unsynced local shadows are kept, including over a remote row with the
  /// same id: the pending mutation is newer than what the remote returned.
  pub fn replace_synced_flights(&self, owner_id: &str, flights: &[Value]) -> StoreResult<usize> {
    let now = format_ts(self.now());

    self.write("replace_synced_flights", |tx| {
      tx.execute(
        "DELETE FROM my_flights WHERE owner_id = ?1 AND synced = 1",
        params![owner_id],
      )?;

      let mut insert = tx.prepare(
        "INSERT OR IGNORE INTO my_flights
           (id, owner_id, flight_number, airline_code, departure_time, status, data, created_at, updated_at, synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, 1)",
      )?;

      let mut stored = 0;
      for flight in flights {
        let Some(id) = flight.get("id").and_then(Value::as_str) else {
          debug!(owner_id, "skipping flight without id");
          continue;
        };
        stored += insert.execute(params![
          id,
          owner_id,
          text_field(flight, "flightNumber"),
          text_field(flight, "airlineCode"),
          text_field(flight, "departureTime"),
          flight
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("scheduled"),
          serde_json::to_string(flight)?,
          now
        ])?;
      }
      Ok(stored)
    })
  }
}

struct RawFlight {
  id: String,
  owner_id: String,
  data: String,
  synced: bool,
  created_at: String,
  updated_at: String,
}

impl RawFlight {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      owner_id: row.get(1)?,
      data: row.get(2)?,
      synced: row.get(3)?,
      created_at: row.get(4)?,
      updated_at: row.get(5)?,
    })
  }

  fn into_record(self) -> StoreResult<FlightRecord> {
    Ok(FlightRecord {
      data: serde_json::from_str(&self.data)?,
      created_at: parse_ts("my_flights", &self.created_at)?,
      updated_at: parse_ts("my_flights", &self.updated_at)?,
      id: self.id,
      owner_id: self.owner_id,
      synced: self.synced,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::test_support::test_store;
  use chrono::Duration;
  use serde_json::json;

  #[test]
  fn flights_are_listed_latest_departure_first() {
    let t = test_store();
    t.store
      .save_flight("u1", "f1", &json!({"id": "f1", "departureTime": "2026-01-01T09:00"}), true)
      .unwrap();
    t.store
      .save_flight("u1", "f2", &json!({"id": "f2", "departureTime": "2026-03-01T09:00"}), true)
      .unwrap();
    t.store
      .save_flight("u2", "f3", &json!({"id": "f3"}), true)
      .unwrap();

    let ids: Vec<_> = t
      .store
      .get_flights("u1")
      .unwrap()
      .into_iter()
      .map(|f| f["id"].as_str().unwrap().to_string())
      .collect();
    assert_eq!(ids, vec!["f2", "f1"]);
  }

  #[test]
  fn save_flight_keeps_created_at_on_update() {
    let t = test_store();
    t.store.save_flight("u1", "f1", &json!({"v": 1}), false).unwrap();
    let first = t.store.get_flight("u1", "f1").unwrap().unwrap();

    t.clock.advance(Duration::minutes(5));
    t.store.save_flight("u1", "f1", &json!({"v": 2}), false).unwrap();
    let second = t.store.get_flight("u1", "f1").unwrap().unwrap();

    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.updated_at - first.updated_at, Duration::minutes(5));
    assert_eq!(second.data, json!({"v": 2}));
  }

  #[test]
  fn mark_synced_and_delete() {
    let t = test_store();
    t.store.save_flight("u1", "f1", &json!({}), false).unwrap();
    assert!(t.store.mark_flight_synced("u1", "f1").unwrap());
    assert!(t.store.get_flight("u1", "f1").unwrap().unwrap().synced);
    assert!(!t.store.mark_flight_synced("u2", "f1").unwrap());

    assert!(t.store.delete_flight("u1", "f1").unwrap());
    assert!(!t.store.delete_flight("u1", "f1").unwrap());
  }

  #[test]
  fn shadow_stays_unsynced_while_mutations_are_queued() {
    use crate::db::Operation;

    let t = test_store();
    t.store.save_flight("u1", "f1", &json!({"id": "f1"}), false).unwrap();
    let update = t
      .store
      .insert_queue_item(Operation::Update, "myFlights", "u1", &json!({"gate": "7"}), Some("f1"))
      .unwrap();
    // Same id in a non-flight collection does not hold the shadow back.
    t.store
      .insert_queue_item(Operation::Update, "plans", "u1", &json!({}), Some("f1"))
      .unwrap();

    assert!(!t.store.mark_flight_synced("u1", "f1").unwrap());
    assert!(!t.store.get_flight("u1", "f1").unwrap().unwrap().synced);

    t.store.claim_queue_item(update).unwrap();
    assert!(!t.store.mark_flight_synced("u1", "f1").unwrap());

    t.store.complete_queue_item(update).unwrap();
    assert!(t.store.mark_flight_synced("u1", "f1").unwrap());
    assert!(t.store.get_flight("u1", "f1").unwrap().unwrap().synced);
  }

  #[test]
  fn replace_synced_keeps_local_shadows() {
    let t = test_store();
    t.store.save_flight("u1", "old", &json!({"id": "old"}), true).unwrap();
    t.store
      .save_flight("u1", "local-1", &json!({"id": "local-1", "note": "mine"}), false)
      .unwrap();

    let stored = t
      .store
      .replace_synced_flights(
        "u1",
        &[
          json!({"id": "new"}),
          json!({"id": "local-1", "note": "remote"}),
          json!({"no_id": true}),
        ],
      )
      .unwrap();
    assert_eq!(stored, 1);

    assert!(t.store.get_flight("u1", "old").unwrap().is_none());
    assert!(t.store.get_flight("u1", "new").unwrap().unwrap().synced);
    let shadow = t.store.get_flight("u1", "local-1").unwrap().unwrap();
    assert!(!shadow.synced);
    assert_eq!(shadow.data["note"], "mine");
  }

  #[test]
  fn recognizes_flight_collections() {
    assert!(is_flight_collection("flights"));
    assert!(is_flight_collection("myFlights"));
    assert!(is_flight_collection("users/{userId}/myFlights"));
    assert!(!is_flight_collection("reviews"));
  }
}
