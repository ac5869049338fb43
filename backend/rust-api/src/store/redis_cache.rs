use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::ResponseCache;
use crate::error::StoreError;
use crate::metrics::{record_cache_hit, record_cache_miss, track_cache_operation};

pub struct RedisResponseCache {
    redis: ConnectionManager,
}

impl RedisResponseCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl ResponseCache for RedisResponseCache {
    fn backend_tag(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        track_cache_operation("get", async {
            let cached: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            if cached.is_some() {
                record_cache_hit();
            } else {
                record_cache_miss();
            }
            Ok(cached)
        })
        .await
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_secs.max(1))
                .arg(value)
                .query_async::<()>(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }
}
