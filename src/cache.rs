use std::time::Duration;

use deadpool_redis::{redis::AsyncCommands, Config as RedisConfig, Pool, Runtime};
use serde_json::json;
use tokio::time::timeout;

use crate::logging::logger;

/// Outcome of a cache read. An unavailable cache is treated exactly like a
/// miss at every call site; the distinction only exists for logging.
#[derive(Debug, PartialEq)]
pub enum CacheLookup {
    Hit(String),
    Miss,
    Unavailable,
}

/// Best-effort key/value cache in front of the document store. All
/// operations are bounded by a short timeout and never propagate errors;
/// a handle without a backing pool silently degrades every call.
#[derive(Clone)]
pub struct CacheHandle {
    redis: Option<Pool>,
    op_timeout: Duration,
}

impl CacheHandle {
    pub fn connect(redis_url: Option<&str>, op_timeout_ms: u64) -> Self {
        let redis = redis_url.and_then(|url| {
            match RedisConfig::from_url(url.to_string()).create_pool(Some(Runtime::Tokio1)) {
                Ok(pool) => Some(pool),
                Err(error) => {
                    logger().warn(
                        "cache.pool_error",
                        json!({ "error": error.to_string() }),
                    );
                    None
                }
            }
        });
        if redis.is_none() {
            logger().info("cache.disabled", json!({ "reason": "no usable redis configuration" }));
        }
        Self {
            redis,
            op_timeout: Duration::from_millis(op_timeout_ms.max(1)),
        }
    }

    pub fn disabled() -> Self {
        Self {
            redis: None,
            op_timeout: Duration::from_millis(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.redis.is_some()
    }

    pub async fn get(&self, key: &str) -> CacheLookup {
        let Some(pool) = &self.redis else {
            return CacheLookup::Unavailable;
        };
        let lookup = timeout(self.op_timeout, async {
            let mut conn = pool.get().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok::<_, anyhow::Error>(value)
        })
        .await;

        match lookup {
            Ok(Ok(Some(value))) => CacheLookup::Hit(value),
            Ok(Ok(None)) => CacheLookup::Miss,
            Ok(Err(error)) => {
                logger().warn(
                    "cache.read_error",
                    json!({ "key": key, "error": error.to_string() }),
                );
                CacheLookup::Unavailable
            }
            Err(_) => {
                logger().warn("cache.read_timeout", json!({ "key": key }));
                CacheLookup::Unavailable
            }
        }
    }

    pub async fn put(&self, key: &str, value: &str, ttl_seconds: u64) {
        let Some(pool) = &self.redis else {
            return;
        };
        let write = timeout(self.op_timeout, async {
            let mut conn = pool.get().await?;
            if ttl_seconds > 0 {
                conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
            } else {
                conn.set::<_, _, ()>(key, value).await?;
            }
            Ok::<_, anyhow::Error>(())
        })
        .await;

        match write {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                logger().warn(
                    "cache.write_error",
                    json!({ "key": key, "error": error.to_string() }),
                );
            }
            Err(_) => {
                logger().warn("cache.write_timeout", json!({ "key": key }));
            }
        }
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        let Some(pool) = &self.redis else {
            anyhow::bail!("cache disabled");
        };
        let mut conn = pool.get().await?;
        let _: () = conn.ping().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_handle_reports_unavailable() {
        let cache = CacheHandle::disabled();
        assert!(!cache.is_enabled());
        assert_eq!(cache.get("stations:page:1:limit:50").await, CacheLookup::Unavailable);
    }

    #[tokio::test]
    async fn disabled_handle_swallows_writes() {
        let cache = CacheHandle::disabled();
        cache.put("ads_config:global", "{\"ads_enabled\":true}", 60).await;
        assert!(cache.ping().await.is_err());
    }

    #[tokio::test]
    async fn missing_url_disables_the_handle() {
        let cache = CacheHandle::connect(None, 500);
        assert!(!cache.is_enabled());
        assert_eq!(cache.get("anything").await, CacheLookup::Unavailable);
    }
}
