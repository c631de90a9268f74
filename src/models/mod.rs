// 请求与任务的领域模型

pub mod job;
pub mod target;

pub use job::{JobProgress, JobStatus};
pub use target::{FetchTarget, TargetError};
