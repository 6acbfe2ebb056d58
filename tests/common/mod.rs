//! Shared wiring for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bimo_offline::cache::CacheService;
use bimo_offline::clock::ManualClock;
use bimo_offline::db::{LocalStore, QueueItem};
use bimo_offline::error::RemoteError;
use bimo_offline::network::{NetworkMonitor, NetworkStatus};
use bimo_offline::offline::OfflineService;
use bimo_offline::queue::{QueueSettings, SyncQueue};
use bimo_offline::remote::RemoteApply;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Remote that rejects payloads marked `"fail": true` and can be slowed down.
#[derive(Default)]
pub struct ScriptedRemote {
  pub delay: Mutex<Duration>,
  pub applied: Mutex<Vec<i64>>,
  pub calls: AtomicUsize,
}

impl ScriptedRemote {
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl RemoteApply for ScriptedRemote {
  async fn apply(&self, item: &QueueItem) -> Result<(), RemoteError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let delay = *self.delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    if item.payload.get("fail").and_then(|v| v.as_bool()) == Some(true) {
      return Err(RemoteError::Rejected {
        status: 500,
        message: "scripted failure".into(),
      });
    }
    self.applied.lock().unwrap().push(item.id);
    Ok(())
  }
}

pub struct World {
  pub store: Arc<LocalStore>,
  pub clock: Arc<ManualClock>,
  pub monitor: Arc<NetworkMonitor>,
  pub remote: Arc<ScriptedRemote>,
  pub queue: Arc<SyncQueue>,
  pub service: Arc<OfflineService>,
  _dir: TempDir,
}

pub fn world(status: NetworkStatus) -> World {
  let dir = TempDir::new().unwrap();
  let clock = Arc::new(ManualClock::default());
  let store = Arc::new(LocalStore::open_with_clock(dir.path().join("offline.db"), clock.clone()).unwrap());
  let monitor = Arc::new(NetworkMonitor::new(Vec::new()));
  monitor.set_status(status);
  let remote = Arc::new(ScriptedRemote::default());
  let queue = SyncQueue::new(
    store.clone(),
    monitor.clone(),
    remote.clone(),
    QueueSettings {
      batch_size: 50,
      item_delay: Duration::ZERO,
    },
  )
  .unwrap();
  let cache = CacheService::new(store.clone(), monitor.clone());
  let service = Arc::new(OfflineService::new(
    store.clone(),
    monitor.clone(),
    queue.clone(),
    cache,
  ));

  World {
    store,
    clock,
    monitor,
    remote,
    queue,
    service,
    _dir: dir,
  }
}
