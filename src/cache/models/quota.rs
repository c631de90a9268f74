use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 令牌桶参数：容量 C，每秒补充 R 个令牌
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub capacity: u32,
    pub refill_per_sec: f64,
}

impl BucketConfig {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }

    /// 从空桶补满所需的时间
    pub fn full_refill(&self) -> Duration {
        if self.refill_per_sec <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64(self.capacity as f64 / self.refill_per_sec)
    }

    /// 当前有 `tokens` 个令牌时，凑够 `cost` 个还要等多久（向上取整到秒，至少 1 秒）
    pub fn retry_after_secs(&self, tokens: f64, cost: u32) -> u64 {
        let missing = (cost as f64 - tokens).max(0.0);
        if self.refill_per_sec <= 0.0 {
            return u64::MAX;
        }
        ((missing / self.refill_per_sec).ceil() as u64).max(1)
    }
}

/// 单个客户端的令牌桶状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaState {
    pub client_key: String,
    pub tokens: f64,
    pub last_refill_ms: i64,
}

/// 一次取令牌的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenGrant {
    pub allowed: bool,
    /// 扣减之后（拒绝时为当前）桶内剩余的令牌
    pub tokens: f64,
}

impl QuotaState {
    /// 新客户端从满桶开始
    pub fn full(client_key: impl Into<String>, bucket: &BucketConfig, now_ms: i64) -> Self {
        Self {
            client_key: client_key.into(),
            tokens: bucket.capacity as f64,
            last_refill_ms: now_ms,
        }
    }

    /// 按流逝时间补充令牌，封顶为容量；时钟回拨时不补充
    pub fn refill(&mut self, bucket: &BucketConfig, now_ms: i64) {
        let capacity = bucket.capacity as f64;
        let elapsed_ms = now_ms - self.last_refill_ms;
        if elapsed_ms > 0 {
            let added = elapsed_ms as f64 / 1000.0 * bucket.refill_per_sec;
            self.tokens = (self.tokens + added).min(capacity);
            self.last_refill_ms = now_ms;
        }
        self.tokens = self.tokens.clamp(0.0, capacity);
    }

    pub fn try_take(&mut self, bucket: &BucketConfig, cost: u32, now_ms: i64) -> TokenGrant {
        self.refill(bucket, now_ms);
        let cost = cost as f64;
        if self.tokens >= cost {
            self.tokens -= cost;
            TokenGrant {
                allowed: true,
                tokens: self.tokens,
            }
        } else {
            TokenGrant {
                allowed: false,
                tokens: self.tokens,
            }
        }
    }
}
