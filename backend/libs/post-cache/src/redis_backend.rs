//! Redis cache backend

use crate::{CacheEntry, CacheError, CacheMetrics, CacheResult, VersionedCache};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Shared Redis connection manager
pub type SharedRedis = Arc<Mutex<ConnectionManager>>;

/// Stores `value` and `version` in the hash at KEYS[1] when the hash is
/// missing or its version is lower than ARGV[1]. Returns 1 when written.
const COMPARE_AND_SET_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if current == false or tonumber(current) < tonumber(ARGV[1]) then
  redis.call('HSET', KEYS[1], 'version', ARGV[1], 'value', ARGV[2])
  return 1
end
return 0
"#;

/// Redis-backed [`VersionedCache`].
///
/// Each key is a hash with `version` and `value` fields. Writes go through a
/// single server-side script, so no other command can observe or modify the
/// key between the version check and the write.
#[derive(Clone)]
pub struct RedisVersionedCache {
    redis: SharedRedis,
    script: Arc<Script>,
    metrics: CacheMetrics,
}

impl RedisVersionedCache {
    pub fn new(redis: SharedRedis) -> Self {
        Self {
            redis,
            script: Arc::new(Script::new(COMPARE_AND_SET_SCRIPT)),
            metrics: CacheMetrics::new(),
        }
    }

    /// Open a managed connection to `redis_url`.
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(Arc::new(Mutex::new(manager))))
    }
}

#[async_trait::async_trait]
impl VersionedCache for RedisVersionedCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let mut conn = self.redis.lock().await;

        let fields: Result<(Option<i64>, Option<String>), _> = redis::cmd("HMGET")
            .arg(key)
            .arg("version")
            .arg("value")
            .query_async(&mut *conn)
            .await;

        match fields {
            Ok((Some(version), Some(value))) => {
                debug!(key = %key, version, "Cache hit");
                self.metrics.record_hit(key);
                Ok(Some(CacheEntry { version, value }))
            }
            Ok((None, None)) => {
                debug!(key = %key, "Cache miss");
                self.metrics.record_miss(key);
                Ok(None)
            }
            Ok(_) => {
                warn!(key = %key, "Cache entry is missing a field");
                self.metrics.record_error(key, "partial_entry");
                Err(CacheError::InvalidData(format!(
                    "entry {key} has only one of version/value"
                )))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Redis get error");
                self.metrics.record_error(key, "redis");
                Err(CacheError::Redis(e))
            }
        }
    }

    async fn compare_and_set(&self, key: &str, version: i64, value: &str) -> CacheResult<bool> {
        let mut conn = self.redis.lock().await;

        let written: i32 = self
            .script
            .key(key)
            .arg(version)
            .arg(value)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| {
                self.metrics.record_error(key, "redis");
                CacheError::Redis(e)
            })?;

        if written == 1 {
            debug!(key = %key, version, "Cache write applied");
            self.metrics.record_write(key);
            Ok(true)
        } else {
            debug!(key = %key, version, "Cache write rejected, newer version stored");
            self.metrics.record_stale_write(key);
            Ok(false)
        }
    }
}
