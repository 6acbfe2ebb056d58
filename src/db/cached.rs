//! TTL-bearing cache tables: reviews, plans and profiles.
//!
//! Reads never return a row whose `expires_at` has passed, even before
//! `clear_expired` has swept it.

use chrono::Duration;
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use super::{format_ts, LocalStore};
use crate::error::StoreResult;

impl LocalStore {
  // ===== Reviews (partitioned by collection code) =====

  /// Replace the cached reviews for `collection_code`.
  pub fn cache_reviews(&self, collection_code: &str, reviews: &[Value], ttl: Duration) -> StoreResult<()> {
    let (cached_at, expires_at) = self.expiry(ttl)?;

    self.write("cache_reviews", |tx| {
      tx.execute(
        "DELETE FROM reviews_cache WHERE collection_code = ?1",
        params![collection_code],
      )?;

      let mut insert = tx.prepare(
        "INSERT INTO reviews_cache
           (collection_code, review_id, position, data, cached_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      )?;
      for (position, review) in reviews.iter().enumerate() {
        let review_id = match review.get("id") {
          Some(Value::String(id)) => Some(id.clone()),
          Some(other) if !other.is_null() => Some(other.to_string()),
          _ => None,
        };
        let data = serde_json::to_string(review)?;
        insert.execute(params![
          collection_code,
          review_id,
          position as i64,
          data,
          cached_at,
          expires_at
        ])?;
      }
      Ok(())
    })
  }

  /// Unexpired reviews for `collection_code`, in the order they were cached.
  pub fn get_cached_reviews(&self, collection_code: &str) -> StoreResult<Option<Vec<Value>>> {
    let conn = self.connect()?;
    let now = format_ts(self.now());

    let mut stmt = conn.prepare(
      "SELECT data FROM reviews_cache
       WHERE collection_code = ?1 AND expires_at > ?2
       ORDER BY position",
    )?;
    let rows = stmt
      .query_map(params![collection_code, now], |row| row.get::<_, String>(0))?
      .collect::<Result<Vec<_>, _>>()?;

    if rows.is_empty() {
      return Ok(None);
    }

    let reviews = rows
      .iter()
      .map(|data| serde_json::from_str(data))
      .collect::<Result<Vec<Value>, _>>()?;
    Ok(Some(reviews))
  }

  pub fn delete_reviews(&self, collection_code: &str) -> StoreResult<usize> {
    self.write("delete_reviews", |tx| {
      Ok(tx.execute(
        "DELETE FROM reviews_cache WHERE collection_code = ?1",
        params![collection_code],
      )?)
    })
  }

  // ===== Plans (owner + plan key) =====

  pub fn save_plan(&self, owner_id: &str, plan_key: &str, plan: &Value, ttl: Duration) -> StoreResult<()> {
    let (cached_at, expires_at) = self.expiry(ttl)?;
    let data = serde_json::to_string(plan)?;

    self.write("save_plan", |tx| {
      tx.execute(
        "INSERT OR REPLACE INTO plans_cache (owner_id, plan_key, data, cached_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![owner_id, plan_key, data, cached_at, expires_at],
      )?;
      Ok(())
    })
  }

  pub fn get_plan(&self, owner_id: &str, plan_key: &str) -> StoreResult<Option<Value>> {
    self.get_single(
      "SELECT data FROM plans_cache
       WHERE owner_id = ?1 AND plan_key = ?2 AND expires_at > ?3",
      &[owner_id, plan_key],
    )
  }

  pub fn delete_plan(&self, owner_id: &str, plan_key: &str) -> StoreResult<usize> {
    self.write("delete_plan", |tx| {
      Ok(tx.execute(
        "DELETE FROM plans_cache WHERE owner_id = ?1 AND plan_key = ?2",
        params![owner_id, plan_key],
      )?)
    })
  }

  // ===== Profiles (owner) =====

  pub fn cache_profile(&self, owner_id: &str, profile: &Value, ttl: Duration) -> StoreResult<()> {
    let (cached_at, expires_at) = self.expiry(ttl)?;
    let data = serde_json::to_string(profile)?;

    self.write("cache_profile", |tx| {
      tx.execute(
        "INSERT OR REPLACE INTO profiles_cache (owner_id, data, cached_at, expires_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![owner_id, data, cached_at, expires_at],
      )?;
      Ok(())
    })
  }

  pub fn get_cached_profile(&self, owner_id: &str) -> StoreResult<Option<Value>> {
    self.get_single(
      "SELECT data FROM profiles_cache WHERE owner_id = ?1 AND expires_at > ?2",
      &[owner_id],
    )
  }

  pub fn delete_profile(&self, owner_id: &str) -> StoreResult<usize> {
    self.write("delete_profile", |tx| {
      Ok(tx.execute(
        "DELETE FROM profiles_cache WHERE owner_id = ?1",
        params![owner_id],
      )?)
    })
  }

  /// Run a single-row lookup whose last parameter is "now".
  fn get_single(&self, sql: &str, keys: &[&str]) -> StoreResult<Option<Value>> {
    let conn = self.connect()?;
    let now = format_ts(self.now());

    let mut args: Vec<&dyn rusqlite::ToSql> = keys.iter().map(|k| k as &dyn rusqlite::ToSql).collect();
    args.push(&now);

    let data: Option<String> = conn
      .query_row(sql, args.as_slice(), |row| row.get(0))
      .optional()?;

    match data {
      Some(data) => Ok(Some(serde_json::from_str(&data)?)),
      None => Ok(None),
    }
  }
}
