//! Process-local cache backend

use crate::{CacheEntry, CacheMetrics, CacheResult, VersionedCache};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// In-memory [`VersionedCache`].
///
/// The comparison and the write run while the shard lock for the key is held,
/// which gives the same atomicity as the Redis script.
#[derive(Clone, Default)]
pub struct InMemoryVersionedCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    metrics: CacheMetrics,
}

impl InMemoryVersionedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl VersionedCache for InMemoryVersionedCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        match self.entries.get(key) {
            Some(entry) => {
                self.metrics.record_hit(key);
                Ok(Some(entry.value().clone()))
            }
            None => {
                self.metrics.record_miss(key);
                Ok(None)
            }
        }
    }

    async fn compare_and_set(&self, key: &str, version: i64, value: &str) -> CacheResult<bool> {
        let written = match self.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    version,
                    value: value.to_string(),
                });
                true
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get().version < version {
                    occupied.insert(CacheEntry {
                        version,
                        value: value.to_string(),
                    });
                    true
                } else {
                    false
                }
            }
        };

        if written {
            self.metrics.record_write(key);
        } else {
            debug!(key = %key, version, "Rejected stale cache write");
            self.metrics.record_stale_write(key);
        }
        Ok(written)
    }
}
