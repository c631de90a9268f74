/// 缓存键模块
/// 所有写入共享存储的键都从这里生成

// 抓取结果缓存键
pub mod scrape_keys;

// 限流配额键
pub mod quota_keys;

// 搜索任务进度键
pub mod job_keys;

pub use job_keys::job_progress_key;
pub use quota_keys::quota_key;
pub use scrape_keys::scrape_result_key;
