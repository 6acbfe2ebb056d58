//! Entry point for collaborators: reads with cache fallback, writes that
//! never fail for connectivity reasons.

use chrono::Duration;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, CacheResult, CacheService};
use crate::db::{is_flight_collection, LocalStore, Operation, QueueStats};
use crate::error::{CacheError, QueueError, RemoteError, StoreResult};
use crate::network::{NetworkMonitor, NetworkStatus};
use crate::queue::{DrainOutcome, Mutation, SyncQueue};

/// Prefix of document ids minted for creates accepted offline.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// How a write was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteStatus {
  /// Applied to the remote store right away.
  Committed,
  /// Online, but deferred to the queue.
  Queued,
  /// Not online: shadowed locally and queued.
  OfflineSaved,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteOutcome {
  pub status: WriteStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub queue_id: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub document_id: Option<String>,
  /// Whatever the immediate remote apply returned.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<Value>,
}

/// Snapshot served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
  pub network_status: NetworkStatus,
  pub is_online: bool,
  pub queue_stats: QueueStats,
  pub pending_count: usize,
}

pub struct OfflineService {
  store: Arc<LocalStore>,
  monitor: Arc<NetworkMonitor>,
  queue: Arc<SyncQueue>,
  cache: CacheService,
}

impl OfflineService {
  pub fn new(
    store: Arc<LocalStore>,
    monitor: Arc<NetworkMonitor>,
    queue: Arc<SyncQueue>,
    cache: CacheService,
  ) -> Self {
    Self {
      store,
      monitor,
      queue,
      cache,
    }
  }

  pub fn monitor(&self) -> &Arc<NetworkMonitor> {
    &self.monitor
  }

  pub fn queue(&self) -> &Arc<SyncQueue> {
    &self.queue
  }

  pub fn cache(&self) -> &CacheService {
    &self.cache
  }

  /// Read through the cache without forcing a refresh.
  pub async fn read_with_fallback<F, Fut>(
    &self,
    key: &CacheKey,
    fetch: F,
    ttl: Duration,
  ) -> Result<CacheResult<Value>, CacheError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, RemoteError>>,
  {
    self.cache.get_or_fetch(key, fetch, ttl, false).await
  }

  /// [`read_with_fallback`](Self::read_with_fallback) with the cache's default TTL.
  pub async fn read<F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<CacheResult<Value>, CacheError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, RemoteError>>,
  {
    self.read_with_fallback(key, fetch, self.cache.default_ttl()).await
  }

  /// Apply `mutation` now if possible, otherwise queue it.
  ///
  /// Only a malformed mutation or a failure to persist the queue row is an
  /// error; connectivity problems always end in `Queued` or `OfflineSaved`.
  pub async fn write_with_queue(
    &self,
    mutation: Mutation,
    online_apply: Option<BoxFuture<'_, Result<Value, RemoteError>>>,
  ) -> Result<WriteOutcome, QueueError> {
    mutation.validate()?;

    match (self.monitor.status(), online_apply) {
      (NetworkStatus::Online, Some(apply)) => match apply.await {
        Ok(result) => {
          let document_id = result
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| mutation.document_id.clone());
          self.mirror(&mutation, document_id.as_deref(), true);
          Ok(WriteOutcome {
            status: WriteStatus::Committed,
            queue_id: None,
            document_id,
            result: Some(result),
          })
        }
        Err(e) => {
          info!(collection = %mutation.collection, error = %e, "remote write failed, queueing");
          let queue_id = self.queue.enqueue(&mutation)?;
          Ok(WriteOutcome {
            status: WriteStatus::Queued,
            queue_id: Some(queue_id),
            document_id: mutation.document_id,
            result: None,
          })
        }
      },
      (NetworkStatus::Online, None) => {
        let queue_id = self.queue.enqueue(&mutation)?;
        Ok(WriteOutcome {
          status: WriteStatus::Queued,
          queue_id: Some(queue_id),
          document_id: mutation.document_id,
          result: None,
        })
      }
      (status, _) => {
        let mut mutation = mutation;
        if mutation.document_id.is_none() {
          mutation.document_id = Some(local_document_id(&mutation, self.store.now()));
        }
        let queue_id = self.queue.enqueue(&mutation)?;
        self.mirror(&mutation, mutation.document_id.as_deref(), false);
        debug!(%status, queue_id, collection = %mutation.collection, "saved offline");
        Ok(WriteOutcome {
          status: WriteStatus::OfflineSaved,
          queue_id: Some(queue_id),
          document_id: mutation.document_id,
          result: None,
        })
      }
    }
  }

  /// Reflect a write into the flight table. Failures are logged only.
  fn mirror(&self, mutation: &Mutation, document_id: Option<&str>, synced: bool) {
    if !is_flight_collection(&mutation.collection) {
      return;
    }
    let Some(doc_id) = document_id else {
      debug!(collection = %mutation.collection, "no document id, skipping local mirror");
      return;
    };
    let owner = mutation.owner_id.as_str();

    let result = match mutation.operation {
      Operation::Delete => self.store.delete_flight(owner, doc_id).map(|_| ()),
      Operation::Create => {
        self
          .store
          .save_flight(owner, doc_id, &with_id(&mutation.payload, doc_id), synced)
      }
      Operation::Update => self.store.get_flight(owner, doc_id).and_then(|existing| {
        let merged = match existing {
          Some(record) => merge(record.data, &mutation.payload),
          None => mutation.payload.clone(),
        };
        self
          .store
          .save_flight(owner, doc_id, &with_id(&merged, doc_id), synced)
      }),
    };

    if let Err(e) = result {
      warn!(owner_id = owner, document_id = doc_id, error = %e, "failed to mirror flight locally");
    }
  }

  pub fn get_sync_status(&self) -> StoreResult<SyncStatus> {
    let queue_stats = self.queue.stats()?;
    let network_status = self.monitor.status();
    Ok(SyncStatus {
      network_status,
      is_online: network_status == NetworkStatus::Online,
      pending_count: queue_stats.pending,
      queue_stats,
    })
  }

  /// Drain now with the configured batch size.
  pub async fn sync_now(&self) -> StoreResult<DrainOutcome> {
    self.queue.drain(self.queue.settings().batch_size).await
  }
}

/// Deterministic id for an offline create, stable for the same input.
fn local_document_id(mutation: &Mutation, at: chrono::DateTime<chrono::Utc>) -> String {
  let mut hasher = Sha256::new();
  hasher.update(mutation.owner_id.as_bytes());
  hasher.update(b"\0");
  hasher.update(mutation.collection.as_bytes());
  hasher.update(b"\0");
  hasher.update(at.timestamp_micros().to_be_bytes());
  hasher.update(mutation.payload.to_string().as_bytes());
  let digest = hex::encode(hasher.finalize());
  format!("{}{}", LOCAL_ID_PREFIX, &digest[..16])
}

fn with_id(payload: &Value, doc_id: &str) -> Value {
  match payload {
    Value::Object(map) if !map.contains_key("id") => {
      let mut map = map.clone();
      map.insert("id".to_string(), Value::String(doc_id.to_string()));
      Value::Object(map)
    }
    other => other.clone(),
  }
}

/// Shallow merge of `patch` over `base`; non-objects replace outright.
fn merge(base: Value, patch: &Value) -> Value {
  match (base, patch) {
    (Value::Object(mut base), Value::Object(patch)) => {
      for (k, v) in patch {
        base.insert(k.clone(), v.clone());
      }
      Value::Object(base)
    }
    (_, patch) => patch.clone(),
  }
}
