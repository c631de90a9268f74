use uuid::Uuid;

/// 搜索任务进度键前缀
const JOB_PREFIX: &str = "job:";

pub fn job_progress_key(job_id: &Uuid) -> String {
    format!("{}{}", JOB_PREFIX, job_id)
}
