//! Durable write queue with replay on reconnect.
//!
//! Mutations accepted while the remote store is unavailable are persisted in
//! `sync_queue` and replayed by [`SyncQueue::drain`]. A reconnect only drops a
//! token into a one-slot channel; a single worker task owns the drain loop, so
//! a burst of transitions collapses into at most one queued pass.

use chrono::Duration as ChronoDuration;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::{is_flight_collection, LocalStore, Operation, QueueItem, QueueStats};
use crate::error::{QueueError, RemoteError, StoreResult};
use crate::network::{ListenerHandle, NetworkMonitor};
use crate::remote::RemoteApply;

/// A mutation as submitted by a caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
  pub operation: Operation,
  pub collection: String,
  pub owner_id: String,
  pub payload: Value,
  pub document_id: Option<String>,
}

impl Mutation {
  pub fn new(
    operation: Operation,
    collection: impl Into<String>,
    owner_id: impl Into<String>,
    payload: Value,
  ) -> Self {
    Self {
      operation,
      collection: collection.into(),
      owner_id: owner_id.into(),
      payload,
      document_id: None,
    }
  }

  pub fn with_document_id(mut self, document_id: impl Into<String>) -> Self {
    self.document_id = Some(document_id.into());
    self
  }

  /// Updates and deletes must name their document.
  pub fn validate(&self) -> Result<(), QueueError> {
    if self.collection.trim().is_empty() {
      return Err(QueueError::InvalidMutation("collection is empty".into()));
    }
    if self.document_id.is_none() && self.operation != Operation::Create {
      return Err(QueueError::InvalidMutation(format!(
        "{} on {} requires a document id",
        self.operation, self.collection
      )));
    }
    Ok(())
  }
}

/// Counts for one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  pub total: usize,
  pub success: usize,
  pub failed: usize,
}

/// Result of a drain request. Contention and connectivity are outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DrainOutcome {
  AlreadySyncing,
  Offline,
  Drained(DrainReport),
}

/// Tuning for drain passes.
#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
  /// Upper bound of items per pass.
  pub batch_size: usize,
  /// Pause between two item applications.
  pub item_delay: Duration,
}

impl Default for QueueSettings {
  fn default() -> Self {
    Self {
      batch_size: 50,
      item_delay: Duration::from_millis(100),
    }
  }
}

pub struct SyncQueue {
  store: Arc<LocalStore>,
  monitor: Arc<NetworkMonitor>,
  remote: Arc<dyn RemoteApply>,
  settings: QueueSettings,
  syncing: AtomicBool,
  drain_tx: mpsc::Sender<()>,
  drain_rx: Mutex<Option<mpsc::Receiver<()>>>,
  listener: ListenerHandle,
}

impl SyncQueue {
  /// Build the queue and subscribe it to reconnects.
  ///
  /// Rows left in `processing` by an earlier process are returned to
  /// `pending` first.
  pub fn new(
    store: Arc<LocalStore>,
    monitor: Arc<NetworkMonitor>,
    remote: Arc<dyn RemoteApply>,
    settings: QueueSettings,
  ) -> StoreResult<Arc<Self>> {
    recover(&store)?;

    let (drain_tx, drain_rx) = mpsc::channel(1);
    let signal = drain_tx.clone();
    let listener = monitor.add_listener(move |change| {
      if change.is_reconnect() {
        debug!(from = %change.previous, "reconnected, requesting drain");
        // A full slot already means a pass is requested.
        let _ = signal.try_send(());
      }
    });

    Ok(Arc::new(Self {
      store,
      monitor,
      remote,
      settings,
      syncing: AtomicBool::new(false),
      drain_tx,
      drain_rx: Mutex::new(Some(drain_rx)),
      listener,
    }))
  }

  /// Return items stuck in `processing` to `pending`.
  ///
  /// Does nothing while a drain is running, since its items are live.
  pub fn recover_interrupted(&self) -> StoreResult<usize> {
    match DrainGuard::acquire(&self.syncing) {
      Some(_guard) => recover(&self.store),
      None => Ok(0),
    }
  }

  pub fn settings(&self) -> QueueSettings {
    self.settings
  }

  /// Persist `mutation` as a pending item and return its id.
  ///
  /// When online, a drain is requested without waiting for it.
  pub fn enqueue(&self, mutation: &Mutation) -> Result<i64, QueueError> {
    mutation.validate()?;
    let id = self.store.insert_queue_item(
      mutation.operation,
      &mutation.collection,
      &mutation.owner_id,
      &mutation.payload,
      mutation.document_id.as_deref(),
    )?;
    debug!(
      queue_id = id,
      operation = %mutation.operation,
      collection = %mutation.collection,
      owner_id = %mutation.owner_id,
      "enqueued mutation"
    );

    if self.monitor.is_online() {
      self.request_drain();
    }
    Ok(id)
  }

  /// Ask the worker for a pass. Never blocks.
  pub fn request_drain(&self) {
    let _ = self.drain_tx.try_send(());
  }

  /// Replay up to `max_items` pending items, oldest first.
  ///
  /// Each item in the pass is attempted once; a failed item goes back to
  /// `pending` with its retry count bumped and does not stop the pass.
  pub async fn drain(&self, max_items: usize) -> StoreResult<DrainOutcome> {
    let Some(_guard) = DrainGuard::acquire(&self.syncing) else {
      debug!("drain already running");
      return Ok(DrainOutcome::AlreadySyncing);
    };

    if self.monitor.is_offline() {
      debug!("offline, skipping drain");
      return Ok(DrainOutcome::Offline);
    }

    let ids = self.store.pending_queue_ids(max_items)?;
    let mut report = DrainReport {
      total: ids.len(),
      ..DrainReport::default()
    };

    for (n, id) in ids.into_iter().enumerate() {
      if n > 0 && !self.settings.item_delay.is_zero() {
        tokio::time::sleep(self.settings.item_delay).await;
      }

      if self.replay(id).await {
        report.success += 1;
      } else {
        report.failed += 1;
      }
    }

    if report.total > 0 {
      info!(
        total = report.total,
        success = report.success,
        failed = report.failed,
        "drain finished"
      );
    }
    Ok(DrainOutcome::Drained(report))
  }

  /// Claim, apply and settle one item. Returns true on success.
  async fn replay(&self, id: i64) -> bool {
    let item = match self.store.claim_queue_item(id) {
      Ok(Some(item)) => item,
      Ok(None) => {
        debug!(queue_id = id, "item no longer pending");
        return false;
      }
      Err(e) => {
        warn!(queue_id = id, error = %e, "failed to claim queue item");
        return false;
      }
    };

    match self.apply(&item).await {
      Ok(()) => match self.store.complete_queue_item(id) {
        Ok(_) => {
          self.mark_shadow_synced(&item);
          true
        }
        Err(e) => {
          warn!(queue_id = id, error = %e, "applied but failed to mark completed");
          false
        }
      },
      Err(e) => {
        debug!(queue_id = id, retry_count = item.retry_count + 1, error = %e, "replay failed");
        if let Err(store_err) = self.store.release_queue_item(id, &e.to_string()) {
          warn!(queue_id = id, error = %store_err, "failed to release queue item");
        }
        false
      }
    }
  }

  async fn apply(&self, item: &QueueItem) -> Result<(), RemoteError> {
    match AssertUnwindSafe(self.remote.apply(item)).catch_unwind().await {
      Ok(result) => result,
      Err(_) => Err(RemoteError::other("remote apply panicked")),
    }
  }

  fn mark_shadow_synced(&self, item: &QueueItem) {
    if item.operation == Operation::Delete || !is_flight_collection(&item.collection) {
      return;
    }
    let Some(doc_id) = item.document_id.as_deref() else {
      return;
    };
    match self.store.mark_flight_synced(&item.owner_id, doc_id) {
      Ok(true) => {}
      Ok(false) => debug!(queue_id = item.id, document_id = doc_id, "flight shadow still has queued mutations"),
      Err(e) => warn!(queue_id = item.id, error = %e, "failed to mark flight shadow synced"),
    }
  }

  /// Spawn the task that serves drain requests. Only the first call spawns.
  ///
  /// The task holds a weak reference and exits once the queue is dropped.
  pub fn spawn_worker(self: &Arc<Self>) -> Option<JoinHandle<()>> {
    let mut rx = self.drain_rx.lock().unwrap_or_else(|e| e.into_inner()).take()?;
    let queue = Arc::downgrade(self);

    Some(tokio::spawn(async move {
      while rx.recv().await.is_some() {
        let Some(queue) = queue.upgrade() else {
          break;
        };
        match queue.drain(queue.settings.batch_size).await {
          Ok(outcome) => debug!(?outcome, "background drain"),
          Err(e) => warn!(error = %e, "background drain failed"),
        }
      }
      debug!("sync worker exited");
    }))
  }

  /// Delete completed items older than `older_than`.
  pub fn reap(&self, older_than: ChronoDuration) -> StoreResult<usize> {
    let removed = self.store.reap_completed(older_than)?;
    if removed > 0 {
      info!(removed, "reaped completed queue items");
    }
    Ok(removed)
  }

  pub fn stats(&self) -> StoreResult<QueueStats> {
    self.store.queue_stats()
  }

  pub fn pending_items(&self, limit: usize) -> StoreResult<Vec<QueueItem>> {
    self.store.pending_queue_items(limit)
  }

  pub fn get(&self, id: i64) -> StoreResult<Option<QueueItem>> {
    self.store.get_queue_item(id)
  }

  pub fn is_syncing(&self) -> bool {
    self.syncing.load(Ordering::Acquire)
  }
}

impl Drop for SyncQueue {
  fn drop(&mut self) {
    self.monitor.remove_listener(self.listener);
  }
}

fn recover(store: &LocalStore) -> StoreResult<usize> {
  let recovered = store.requeue_processing()?;
  if recovered > 0 {
    info!(recovered, "returned interrupted queue items to pending");
  }
  Ok(recovered)
}

/// Holds the drain flag for the length of a pass.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| Self(flag))
  }
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}
