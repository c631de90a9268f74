use serde::{Deserialize, Serialize};

/// 缓存条目
///
/// 时间戳都是毫秒。`expires_at_ms` 之后（含）不再返回该条目。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub stored_at_ms: i64,
    pub expires_at_ms: i64,
}

impl<V> CacheEntry<V> {
    pub fn new(key: impl Into<String>, value: V, now_ms: i64, ttl_ms: i64) -> Self {
        Self {
            key: key.into(),
            value,
            stored_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms.max(0)),
        }
    }

    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }

    /// 剩余存活时间，过期后为 0
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        (self.expires_at_ms - now_ms).max(0)
    }
}
