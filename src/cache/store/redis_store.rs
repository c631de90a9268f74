use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient, Script};

use super::{SharedStore, StoreError};
use crate::cache::models::{BucketConfig, TokenGrant};

/// 令牌桶脚本：在一个哈希 `{tokens, last_refill}` 上原子地补充并扣减
///
/// KEYS[1] 配额键
/// ARGV    容量, 每秒补充量, 本次消耗, 当前毫秒, 键过期毫秒
/// 返回    {是否放行, 剩余令牌}
const TOKEN_BUCKET_LUA: &str = r#"
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local state = redis.call('HMGET', KEYS[1], 'tokens', 'last_refill')
local tokens = tonumber(state[1])
local last = tonumber(state[2])
if tokens == nil or last == nil then
  tokens = capacity
  last = now
end

if now > last then
  tokens = math.min(capacity, tokens + (now - last) / 1000 * rate)
  last = now
end
if tokens < 0 then tokens = 0 end
if tokens > capacity then tokens = capacity end

local allowed = 0
if tokens >= cost then
  tokens = tokens - cost
  allowed = 1
end

redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'last_refill', tostring(last))
redis.call('PEXPIRE', KEYS[1], ttl)
return {allowed, tostring(tokens)}
"#;

/// 配额键最少保留 1 秒
const MIN_QUOTA_TTL_MS: u64 = 1_000;

pub struct RedisStore {
    redis: Arc<RedisClient>,
    bucket_script: Script,
}

impl RedisStore {
    pub fn new(redis: RedisClient) -> Self {
        Self {
            redis: Arc::new(redis),
            bucket_script: Script::new(TOKEN_BUCKET_LUA),
        }
    }

    pub fn open(redis_url: &str) -> Result<Self, StoreError> {
        Ok(Self::new(RedisClient::open(redis_url)?))
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        Ok(self.redis.get_multiplexed_async_connection().await?)
    }
}

/// 配额键的过期时间：两倍补满时间，空闲客户端的桶会自然消失
fn quota_ttl_ms(bucket: &BucketConfig) -> u64 {
    let full = bucket.full_refill().as_millis().min(u64::MAX as u128 / 2) as u64;
    full.saturating_mul(2).max(MIN_QUOTA_TTL_MS)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let _: () = conn.pset_ex(key, value, ttl_ms).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn take_tokens(
        &self,
        key: &str,
        bucket: &BucketConfig,
        cost: u32,
        now_ms: i64,
    ) -> Result<TokenGrant, StoreError> {
        let mut conn = self.conn().await?;
        let (allowed, tokens): (i64, String) = self
            .bucket_script
            .key(key)
            .arg(bucket.capacity)
            .arg(bucket.refill_per_sec)
            .arg(cost)
            .arg(now_ms)
            .arg(quota_ttl_ms(bucket))
            .invoke_async(&mut conn)
            .await?;

        let tokens: f64 = tokens.parse().map_err(|_| StoreError::Corrupt {
            key: key.to_string(),
            message: format!("令牌数无法解析: {}", tokens),
        })?;

        Ok(TokenGrant {
            allowed: allowed == 1,
            tokens,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_ttl_is_twice_full_refill() {
        assert_eq!(quota_ttl_ms(&BucketConfig::new(5, 1.0)), 10_000);
        assert_eq!(quota_ttl_ms(&BucketConfig::new(1, 100.0)), MIN_QUOTA_TTL_MS);
    }

    #[tokio::test]
    async fn test_unreachable_redis_reports_unavailable() {
        let store = RedisStore::open("redis://127.0.0.1:1/").unwrap();
        let err = store.ping().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    /// 需要真实 Redis：REDIS_URL=redis://127.0.0.1/ cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_lua_bucket_against_live_redis() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let store = RedisStore::open(&url).unwrap();
        let key = format!("quota:test:{}", uuid::Uuid::new_v4());
        let bucket = BucketConfig::new(5, 1.0);
        let now = 1_700_000_000_000;

        for i in 0..5 {
            let grant = store.take_tokens(&key, &bucket, 1, now).await.unwrap();
            assert!(grant.allowed, "request {i} should be admitted");
        }
        let rejected = store.take_tokens(&key, &bucket, 1, now).await.unwrap();
        assert!(!rejected.allowed);
        assert!(rejected.tokens < 1.0);

        // 一秒补回一个令牌
        assert!(store.take_tokens(&key, &bucket, 1, now + 1000).await.unwrap().allowed);
        assert!(!store.take_tokens(&key, &bucket, 1, now + 1000).await.unwrap().allowed);

        store.delete(&key).await.unwrap();
    }
}
