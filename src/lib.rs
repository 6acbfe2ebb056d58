//! Offline-first sync core: a reachability monitor, a durable write queue
//! replayed on reconnect, and a read-through cache over an embedded SQLite
//! store.

pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod network;
pub mod offline;
pub mod queue;
pub mod remote;
pub mod server;

pub use cache::{CacheKey, CacheResult, CacheService, CacheSource};
pub use db::LocalStore;
pub use error::{CacheError, QueueError, RemoteError, StoreError};
pub use network::{NetworkMonitor, NetworkStatus};
pub use offline::{OfflineService, WriteOutcome, WriteStatus};
pub use queue::{DrainOutcome, DrainReport, Mutation, SyncQueue};
