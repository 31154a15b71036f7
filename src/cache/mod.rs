//! Response cache for offline support.
//!
//! This module provides:
//! - Named cache generations, each deleted as a unit
//! - Entries keyed by normalized request identity (method + URL)
//! - Network-first, cache-first and stale-while-revalidate strategies

mod layer;
mod storage;
mod traits;

pub use layer::{CacheLayer, Served};
pub use storage::{MemoryCacheStore, SqliteCacheStore};
pub use traits::{CacheEntry, CacheStore, RequestKey, ResponseSource};
