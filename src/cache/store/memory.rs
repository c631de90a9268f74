use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;

use super::{SharedStore, StoreError};
use crate::cache::models::{BucketConfig, QuotaState, TokenGrant};
use crate::utils::SharedClock;

/// 配额表超过这个大小时清理长期空闲的桶
const BUCKET_PRUNE_THRESHOLD: usize = 4096;

struct StoredValue {
    value: String,
    expires_at_ms: i64,
}

/// 单进程内存存储
///
/// 值放在容量受限的 LRU 里，各自带过期时间；令牌桶按键存放。
/// 两把锁都只在同步代码里短暂持有。
pub struct MemoryStore {
    values: Mutex<LruCache<String, StoredValue>>,
    buckets: Mutex<HashMap<String, QuotaState>>,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            values: Mutex::new(LruCache::new(capacity)),
            buckets: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.values.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("内存存储锁已损坏".into())
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_ms();
        let mut values = self.values.lock().map_err(poisoned)?;
        let expired = match values.get(key) {
            Some(stored) if now < stored.expires_at_ms => return Ok(Some(stored.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            values.pop(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let expires_at_ms = self
            .clock
            .now_ms()
            .saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64);
        let mut values = self.values.lock().map_err(poisoned)?;
        values.put(
            key.to_string(),
            StoredValue {
                value,
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.values.lock().map_err(poisoned)?.pop(key);
        Ok(())
    }

    async fn take_tokens(
        &self,
        key: &str,
        bucket: &BucketConfig,
        cost: u32,
        now_ms: i64,
    ) -> Result<TokenGrant, StoreError> {
        let mut buckets = self.buckets.lock().map_err(poisoned)?;

        if buckets.len() > BUCKET_PRUNE_THRESHOLD {
            // 空闲超过两倍补满时间的桶已经是满的，删掉等价于重建
            let idle_ms = bucket.full_refill().as_millis().min(i64::MAX as u128 / 2) as i64 * 2;
            buckets.retain(|_, state| now_ms - state.last_refill_ms < idle_ms);
        }

        let state = buckets
            .entry(key.to_string())
            .or_insert_with(|| QuotaState::full(key, bucket, now_ms));
        Ok(state.try_take(bucket, cost, now_ms))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::utils::ManualClock;

    fn store(capacity: usize) -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(0));
        let store = MemoryStore::new(capacity, clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_values_expire() {
        let (clock, store) = store(8);
        store
            .put("k", "v".into(), Duration::from_secs(60))
            .await
            .unwrap();

        clock.set(59_000);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        clock.set(61_000);
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_lru_evicts_oldest() {
        let (_clock, store) = store(2);
        let ttl = Duration::from_secs(60);
        store.put("a", "1".into(), ttl).await.unwrap();
        store.put("b", "2".into(), ttl).await.unwrap();
        store.get("a").await.unwrap();
        store.put("c", "3".into(), ttl).await.unwrap();

        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
        assert!(store.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete() {
        let (_clock, store) = store(2);
        store
            .put("a", "1".into(), Duration::from_secs(1))
            .await
            .unwrap();
        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_take_tokens_per_key() {
        let (_clock, store) = store(2);
        let bucket = BucketConfig::new(1, 1.0);
        assert!(store.take_tokens("a", &bucket, 1, 0).await.unwrap().allowed);
        assert!(!store.take_tokens("a", &bucket, 1, 0).await.unwrap().allowed);
        assert!(store.take_tokens("b", &bucket, 1, 0).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_concurrent_takes_never_overdraw() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new(8, clock));
        let bucket = BucketConfig::new(5, 1.0);

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.take_tokens("c", &bucket, 1, 0).await })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }
}
