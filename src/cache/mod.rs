//! Read-through caching with offline support.
//!
//! This module provides:
//! - Typed keys addressing one namespace each (reviews, plans, profiles, flights)
//! - A storage trait, implemented by the local store
//! - A cache layer choosing between cache and network from the monitor's status

mod keys;
mod layer;
mod storage;
mod traits;

pub use keys::CacheKey;
pub use layer::{CacheService, DEFAULT_TTL_HOURS};
pub use storage::CacheStorage;
pub use traits::{CacheResult, CacheSource};
