//! Cache storage trait and its SQLite implementation.

use chrono::Duration;
use serde_json::Value;

use super::keys::CacheKey;
use crate::db::LocalStore;
use crate::error::{StoreError, StoreResult};

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Unexpired value stored under `key`.
  fn load(&self, key: &CacheKey) -> StoreResult<Option<Value>>;

  /// Store `value` under `key`, replacing any previous entry whole.
  fn store(&self, key: &CacheKey, value: &Value, ttl: Duration) -> StoreResult<()>;

  /// Remove the entry under `key`. Returns the number of rows removed.
  fn invalidate(&self, key: &CacheKey) -> StoreResult<usize>;

  /// Sweep rows past their expiry.
  fn clear_expired(&self) -> StoreResult<usize>;
}

fn expect_array<'a>(key: &CacheKey, value: &'a Value) -> StoreResult<&'a [Value]> {
  value
    .as_array()
    .map(Vec::as_slice)
    .ok_or(StoreError::UnexpectedShape {
      namespace: key.namespace(),
      expected: "a JSON array",
    })
}

fn expect_object(key: &CacheKey, value: &Value) -> StoreResult<()> {
  if value.is_object() {
    Ok(())
  } else {
    Err(StoreError::UnexpectedShape {
      namespace: key.namespace(),
      expected: "a JSON object",
    })
  }
}

impl CacheStorage for LocalStore {
  fn load(&self, key: &CacheKey) -> StoreResult<Option<Value>> {
    match key {
      CacheKey::Reviews { collection_code } => {
        Ok(self.get_cached_reviews(collection_code)?.map(Value::Array))
      }
      CacheKey::Plan { owner_id, plan_key } => self.get_plan(owner_id, plan_key),
      CacheKey::Profile { owner_id } => self.get_cached_profile(owner_id),
      CacheKey::Flights { owner_id } => {
        // Flights carry no TTL; an empty table is a miss.
        let flights = self.get_flights(owner_id)?;
        Ok((!flights.is_empty()).then_some(Value::Array(flights)))
      }
    }
  }

  fn store(&self, key: &CacheKey, value: &Value, ttl: Duration) -> StoreResult<()> {
    match key {
      CacheKey::Reviews { collection_code } => {
        self.cache_reviews(collection_code, expect_array(key, value)?, ttl)
      }
      CacheKey::Plan { owner_id, plan_key } => {
        expect_object(key, value)?;
        self.save_plan(owner_id, plan_key, value, ttl)
      }
      CacheKey::Profile { owner_id } => {
        expect_object(key, value)?;
        self.cache_profile(owner_id, value, ttl)
      }
      CacheKey::Flights { owner_id } => {
        self.replace_synced_flights(owner_id, expect_array(key, value)?)?;
        Ok(())
      }
    }
  }

  fn invalidate(&self, key: &CacheKey) -> StoreResult<usize> {
    match key {
      CacheKey::Reviews { collection_code } => self.delete_reviews(collection_code),
      CacheKey::Plan { owner_id, plan_key } => self.delete_plan(owner_id, plan_key),
      CacheKey::Profile { owner_id } => self.delete_profile(owner_id),
      CacheKey::Flights { owner_id } => self.delete_synced_flights(owner_id),
    }
  }

  fn clear_expired(&self) -> StoreResult<usize> {
    LocalStore::clear_expired(self)
  }
}
