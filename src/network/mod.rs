//! Network reachability monitoring.
//!
//! The monitor keeps a tri-state [`NetworkStatus`], refreshed by a periodic
//! probe, and notifies listeners only when the status actually changes.

mod checks;

pub use checks::{HttpCheck, ReachabilityCheck};

use futures::future::{join_all, FutureExt};
use serde::Serialize;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Connectivity as last observed by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
  Unknown,
  Online,
  Offline,
}

impl NetworkStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      NetworkStatus::Unknown => "unknown",
      NetworkStatus::Online => "online",
      NetworkStatus::Offline => "offline",
    }
  }
}

impl fmt::Display for NetworkStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A status transition delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
  pub previous: NetworkStatus,
  pub current: NetworkStatus,
}

impl StatusChange {
  /// True when connectivity came back.
  pub fn is_reconnect(&self) -> bool {
    self.current == NetworkStatus::Online && self.previous != NetworkStatus::Online
  }
}

/// Subscription returned by [`NetworkMonitor::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

type Listener = Arc<dyn Fn(StatusChange) + Send + Sync>;

pub struct NetworkMonitor {
  status: RwLock<NetworkStatus>,
  checks: Vec<Arc<dyn ReachabilityCheck>>,
  listeners: Mutex<Vec<(ListenerHandle, Listener)>>,
  next_listener: AtomicU64,
  shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl NetworkMonitor {
  /// Build a monitor over `checks`; the network counts as online when any
  /// one of them succeeds.
  pub fn new(checks: Vec<Arc<dyn ReachabilityCheck>>) -> Self {
    Self {
      status: RwLock::new(NetworkStatus::Unknown),
      checks,
      listeners: Mutex::new(Vec::new()),
      next_listener: AtomicU64::new(1),
      shutdown: Mutex::new(None),
    }
  }

  pub fn status(&self) -> NetworkStatus {
    *self.status.read().unwrap_or_else(|e| e.into_inner())
  }

  pub fn is_online(&self) -> bool {
    self.status() == NetworkStatus::Online
  }

  pub fn is_offline(&self) -> bool {
    self.status() == NetworkStatus::Offline
  }

  /// Register `listener` for status transitions.
  pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
  where
    F: Fn(StatusChange) + Send + Sync + 'static,
  {
    let handle = ListenerHandle(self.next_listener.fetch_add(1, Ordering::Relaxed));
    self
      .listeners
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push((handle, Arc::new(listener)));
    handle
  }

  /// Remove a listener. Returns false if it was already gone.
  pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
    let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
    let before = listeners.len();
    listeners.retain(|(h, _)| *h != handle);
    listeners.len() != before
  }

  pub fn listener_count(&self) -> usize {
    self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  /// Record `status`, notifying listeners if it differs from the current one.
  ///
  /// Returns true when a transition happened.
  pub fn set_status(&self, status: NetworkStatus) -> bool {
    let previous = {
      let mut current = self.status.write().unwrap_or_else(|e| e.into_inner());
      if *current == status {
        return false;
      }
      std::mem::replace(&mut *current, status)
    };

    info!(from = %previous, to = %status, "network status changed");
    self.notify(StatusChange {
      previous,
      current: status,
    });
    true
  }

  fn notify(&self, change: StatusChange) {
    // Snapshot so listeners may add or remove subscriptions while running.
    let snapshot: Vec<(ListenerHandle, Listener)> = self
      .listeners
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .iter()
      .map(|(h, l)| (*h, Arc::clone(l)))
      .collect();

    for (handle, listener) in snapshot {
      if std::panic::catch_unwind(AssertUnwindSafe(|| listener(change))).is_err() {
        warn!(listener = handle.0, "network listener panicked");
      }
    }
  }

  /// Run every check concurrently and record the result.
  pub async fn probe(&self) -> NetworkStatus {
    let results = join_all(self.checks.iter().map(|check| run_check(check.as_ref()))).await;
    let status = if results.into_iter().any(|ok| ok) {
      NetworkStatus::Online
    } else {
      NetworkStatus::Offline
    };

    self.set_status(status);
    status
  }

  /// Probe once, then keep probing every `interval` until [`stop`].
  ///
  /// Calling `start` on a running monitor does nothing.
  ///
  /// [`stop`]: NetworkMonitor::stop
  pub async fn start(self: &Arc<Self>, interval: Duration) {
    let mut stop_rx = {
      let mut shutdown = self.shutdown.lock().unwrap_or_else(|e| e.into_inner());
      if shutdown.is_some() {
        debug!("network monitor already running");
        return;
      }
      let (tx, rx) = watch::channel(false);
      *shutdown = Some(tx);
      rx
    };

    self.probe().await;

    let monitor = Arc::clone(self);
    tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = tokio::time::sleep(interval) => {
            // Not raced against shutdown: an in-flight probe runs to its own timeout.
            monitor.probe().await;
          }
          changed = stop_rx.changed() => {
            if changed.is_err() || *stop_rx.borrow() {
              break;
            }
          }
        }
      }
      debug!("network monitor loop exited");
    });

    info!(interval_secs = interval.as_secs_f64(), "network monitoring started");
  }

  /// Ask the probe loop to exit. Idempotent.
  pub fn stop(&self) {
    let sender = self.shutdown.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(sender) = sender {
      let _ = sender.send(true);
      info!("network monitoring stopped");
    }
  }

  pub fn is_running(&self) -> bool {
    self.shutdown.lock().unwrap_or_else(|e| e.into_inner()).is_some()
  }
}

/// One bounded check; failures, timeouts and panics all read as `false`.
async fn run_check(check: &dyn ReachabilityCheck) -> bool {
  let bounded = tokio::time::timeout(check.timeout(), AssertUnwindSafe(check.check()).catch_unwind());
  match bounded.await {
    Ok(Ok(Ok(()))) => true,
    Ok(Ok(Err(e))) => {
      debug!(check = check.name(), error = %e, "reachability check failed");
      false
    }
    Ok(Err(_)) => {
      warn!(check = check.name(), "reachability check panicked");
      false
    }
    Err(_) => {
      debug!(check = check.name(), "reachability check timed out");
      false
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::RemoteError;
  use async_trait::async_trait;
  use std::sync::atomic::{AtomicBool, AtomicUsize};

  /// Check whose outcome is flipped by the test.
  struct Toggle {
    up: AtomicBool,
    calls: AtomicUsize,
  }

  impl Toggle {
    fn new(up: bool) -> Arc<Self> {
      Arc::new(Self {
        up: AtomicBool::new(up),
        calls: AtomicUsize::new(0),
      })
    }
  }

  #[async_trait]
  impl ReachabilityCheck for Toggle {
    fn name(&self) -> &str {
      "toggle"
    }

    async fn check(&self) -> Result<(), RemoteError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.up.load(Ordering::SeqCst) {
        Ok(())
      } else {
        Err(RemoteError::Unreachable("down".into()))
      }
    }
  }

  struct Hangs;

  #[async_trait]
  impl ReachabilityCheck for Hangs {
    fn name(&self) -> &str {
      "hangs"
    }

    fn timeout(&self) -> Duration {
      Duration::from_millis(20)
    }

    async fn check(&self) -> Result<(), RemoteError> {
      tokio::time::sleep(Duration::from_secs(60)).await;
      Ok(())
    }
  }

  struct Panics;

  #[async_trait]
  impl ReachabilityCheck for Panics {
    fn name(&self) -> &str {
      "panics"
    }

    async fn check(&self) -> Result<(), RemoteError> {
      panic!("probe exploded");
    }
  }

  fn recorder(monitor: &NetworkMonitor) -> Arc<Mutex<Vec<StatusChange>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    monitor.add_listener(move |change| sink.lock().unwrap().push(change));
    seen
  }

  #[tokio::test]
  async fn online_if_any_check_succeeds() {
    let monitor = NetworkMonitor::new(vec![Toggle::new(false), Toggle::new(true)]);
    assert_eq!(monitor.status(), NetworkStatus::Unknown);
    assert_eq!(monitor.probe().await, NetworkStatus::Online);
  }

  #[tokio::test]
  async fn failures_timeouts_and_panics_count_as_offline() {
    let monitor = NetworkMonitor::new(vec![Arc::new(Hangs), Arc::new(Panics), Toggle::new(false)]);
    assert_eq!(monitor.probe().await, NetworkStatus::Offline);
  }

  #[tokio::test]
  async fn listeners_fire_only_on_transitions() {
    let check = Toggle::new(true);
    let monitor = NetworkMonitor::new(vec![check.clone()]);
    let seen = recorder(&monitor);

    monitor.probe().await;
    monitor.probe().await;
    check.up.store(false, Ordering::SeqCst);
    monitor.probe().await;
    monitor.probe().await;

    let seen = seen.lock().unwrap();
    assert_eq!(
      *seen,
      vec![
        StatusChange {
          previous: NetworkStatus::Unknown,
          current: NetworkStatus::Online
        },
        StatusChange {
          previous: NetworkStatus::Online,
          current: NetworkStatus::Offline
        },
      ]
    );
  }

  #[test]
  fn panicking_listener_does_not_stop_others() {
    let monitor = NetworkMonitor::new(Vec::new());
    monitor.add_listener(|_| panic!("listener bug"));
    let seen = recorder(&monitor);

    assert!(monitor.set_status(NetworkStatus::Offline));
    assert_eq!(seen.lock().unwrap().len(), 1);
  }

  #[test]
  fn removed_listener_is_not_called() {
    let monitor = NetworkMonitor::new(Vec::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handle = monitor.add_listener(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
    });

    monitor.set_status(NetworkStatus::Online);
    assert!(monitor.remove_listener(handle));
    assert!(!monitor.remove_listener(handle));
    monitor.set_status(NetworkStatus::Offline);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn listener_may_unsubscribe_itself() {
    let monitor = Arc::new(NetworkMonitor::new(Vec::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let handle_slot: Arc<Mutex<Option<ListenerHandle>>> = Arc::new(Mutex::new(None));

    let weak = Arc::downgrade(&monitor);
    let slot = Arc::clone(&handle_slot);
    let counter = Arc::clone(&calls);
    let handle = monitor.add_listener(move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
      if let (Some(monitor), Some(handle)) = (weak.upgrade(), *slot.lock().unwrap()) {
        monitor.remove_listener(handle);
      }
    });
    *handle_slot.lock().unwrap() = Some(handle);
    let others = recorder(&monitor);

    monitor.set_status(NetworkStatus::Online);
    monitor.set_status(NetworkStatus::Offline);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(others.lock().unwrap().len(), 2);
    assert_eq!(monitor.listener_count(), 1);
  }

  #[tokio::test]
  async fn start_probes_before_returning_and_stop_is_idempotent() {
    let check = Toggle::new(true);
    let monitor = Arc::new(NetworkMonitor::new(vec![check.clone()]));

    monitor.start(Duration::from_millis(10)).await;
    assert_eq!(monitor.status(), NetworkStatus::Online);
    assert!(monitor.is_running());

    // Second start is ignored.
    monitor.start(Duration::from_millis(10)).await;

    check.up.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(monitor.status(), NetworkStatus::Offline);

    monitor.stop();
    monitor.stop();
    assert!(!monitor.is_running());

    tokio::time::sleep(Duration::from_millis(30)).await;
    let calls = check.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(check.calls.load(Ordering::SeqCst), calls);
  }

  #[test]
  fn reconnect_detection() {
    let change = |previous, current| StatusChange { previous, current };
    assert!(change(NetworkStatus::Offline, NetworkStatus::Online).is_reconnect());
    assert!(change(NetworkStatus::Unknown, NetworkStatus::Online).is_reconnect());
    assert!(!change(NetworkStatus::Online, NetworkStatus::Offline).is_reconnect());
  }
}
