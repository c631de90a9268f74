/// 缓存数据模型
/// 定义写入共享存储的数据结构

// 抓取结果缓存条目
pub mod entry;

// 令牌桶配额
pub mod quota;

pub use entry::CacheEntry;
pub use quota::{BucketConfig, QuotaState, TokenGrant};
