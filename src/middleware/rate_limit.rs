use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::{
    cache::{BucketConfig, SharedStore, keys::quota_key},
    config::{Config, StoreFailurePolicy},
    error::AppError,
    middleware::ClientKey,
    utils::SharedClock,
};

/// 一次配额检查的结果
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaDecision {
    /// `remaining` 在存储不可用而放行时为 None
    Allowed { remaining: Option<u32> },
    Rejected { retry_after_secs: u64, remaining: u32 },
    /// 存储不可用且配置为拒绝
    Unavailable(String),
}

impl QuotaDecision {
    pub fn into_result(self) -> Result<Option<u32>, AppError> {
        match self {
            QuotaDecision::Allowed { remaining } => Ok(remaining),
            QuotaDecision::Rejected {
                retry_after_secs,
                remaining,
            } => Err(AppError::QuotaExceeded {
                retry_after_secs,
                remaining,
            }),
            QuotaDecision::Unavailable(reason) => Err(AppError::StoreUnavailable(reason)),
        }
    }
}

/// 基于令牌桶的限流器
///
/// 状态全部在共享存储里，存储保证同一个键上的补充和扣减是原子的，
/// 所以多个实例共用一个 Redis 时配额依然准确。
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SharedStore>,
    bucket: BucketConfig,
    on_store_error: StoreFailurePolicy,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn SharedStore>,
        bucket: BucketConfig,
        on_store_error: StoreFailurePolicy,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            bucket,
            on_store_error,
            clock,
        }
    }

    pub fn from_config(store: Arc<dyn SharedStore>, config: &Config, clock: SharedClock) -> Self {
        Self::new(store, config.bucket(), config.rate_limit_on_store_error, clock)
    }

    pub fn bucket(&self) -> &BucketConfig {
        &self.bucket
    }

    pub async fn try_acquire(&self, client: &ClientKey, cost: u32) -> QuotaDecision {
        let key = quota_key(client.as_str());
        let now = self.clock.now_ms();

        match self.store.take_tokens(&key, &self.bucket, cost, now).await {
            Ok(grant) if grant.allowed => {
                debug!("放行 {} 剩余 {:.2}", client, grant.tokens);
                QuotaDecision::Allowed {
                    remaining: Some(grant.tokens.floor() as u32),
                }
            }
            Ok(grant) => {
                let retry_after_secs = self.bucket.retry_after_secs(grant.tokens, cost);
                debug!("拒绝 {}，{} 秒后重试", client, retry_after_secs);
                QuotaDecision::Rejected {
                    retry_after_secs,
                    remaining: grant.tokens.floor() as u32,
                }
            }
            Err(e) => match self.on_store_error {
                StoreFailurePolicy::Open => {
                    warn!("限流存储不可用，按配置放行 {}: {}", client, e);
                    QuotaDecision::Allowed { remaining: None }
                }
                StoreFailurePolicy::Closed => {
                    error!("限流存储不可用，按配置拒绝 {}: {}", client, e);
                    QuotaDecision::Unavailable(e.to_string())
                }
            },
        }
    }
}
