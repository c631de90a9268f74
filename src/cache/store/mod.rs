/// 共享存储
///
/// 缓存条目、限流配额和任务进度都放在这里，多实例部署时共用同一个 Redis。
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::models::{BucketConfig, TokenGrant};

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("共享存储不可用: {0}")]
    Unavailable(String),

    #[error("存储数据损坏 {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// 外部共享存储的接口
///
/// 值统一是 JSON 字符串，序列化由调用方负责。
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// 令牌桶的原子“补充+扣减”，同一个键上的并发调用串行生效
    async fn take_tokens(
        &self,
        key: &str,
        bucket: &BucketConfig,
        cost: u32,
        now_ms: i64,
    ) -> Result<TokenGrant, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
