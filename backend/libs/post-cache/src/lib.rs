//! Version-gated post cache
//!
//! Every entry carries the version of the value it holds. Writers go through
//! [`VersionedCache::compare_and_set`], which stores the value only when the
//! key is absent or the incoming version is strictly greater than the stored
//! one. The comparison and the write happen as one atomic step on the
//! backend, so the stored version for a key never decreases no matter how
//! concurrent writers interleave.
//!
//! Backends:
//! - [`RedisVersionedCache`]: Redis hash per key, CAS via a Lua script
//! - [`InMemoryVersionedCache`]: process-local map, CAS under the entry lock

mod error;
mod keys;
mod memory;
mod metrics;
mod redis_backend;

pub use error::{CacheError, CacheResult};
pub use keys::{CacheKey, CACHE_VERSION};
pub use memory::InMemoryVersionedCache;
pub use metrics::CacheMetrics;
pub use redis_backend::{RedisVersionedCache, SharedRedis};

/// A cached value together with the version it was written at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub version: i64,
    pub value: String,
}

/// Core cache operations
#[async_trait::async_trait]
pub trait VersionedCache: Send + Sync {
    /// Read the entry stored under `key`.
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Atomically write `value` at `version` if `key` is absent or holds a
    /// strictly lower version.
    ///
    /// Returns `true` when the write was applied, `false` when a newer or
    /// equal version was already present.
    async fn compare_and_set(&self, key: &str, version: i64, value: &str) -> CacheResult<bool>;
}
