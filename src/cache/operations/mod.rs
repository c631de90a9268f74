/// 缓存操作
/// 在共享存储之上提供带类型的读写

// 抓取结果缓存（含并发去重）
pub mod result;

// 搜索任务进度
pub mod job;

pub use job::JobCacheOperations;
pub use result::{Fill, Lookup, LookupSource, ResultCache};
