// 缓存模块
// 包含共享存储、缓存数据结构和操作逻辑

pub mod keys;
pub mod models;
pub mod operations;
pub mod store;

// 重新导出常用类型，方便其他模块使用
pub use models::{BucketConfig, CacheEntry, QuotaState, TokenGrant};
pub use operations::{Fill, JobCacheOperations, Lookup, LookupSource, ResultCache};
pub use store::{MemoryStore, RedisStore, SharedStore, StoreError};
