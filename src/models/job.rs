use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Unknown,
}

/// 搜索任务进度，存放在共享存储中
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub percentage: u8, // 0 ~ 100
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    fn new(job_id: Uuid, status: JobStatus, percentage: u8, message: impl Into<String>) -> Self {
        Self {
            job_id,
            status,
            percentage: percentage.min(100),
            message: message.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn queued(job_id: Uuid) -> Self {
        Self::new(job_id, JobStatus::Queued, 0, "等待抓取中...")
    }

    pub fn in_progress(job_id: Uuid, percentage: u8, message: impl Into<String>) -> Self {
        Self::new(job_id, JobStatus::InProgress, percentage, message)
    }

    pub fn completed(job_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(job_id, JobStatus::Completed, 100, message)
    }

    pub fn failed(job_id: Uuid, message: impl Into<String>) -> Self {
        Self::new(job_id, JobStatus::Failed, 0, message)
    }

    pub fn unknown(job_id: Uuid) -> Self {
        Self::new(job_id, JobStatus::Unknown, 0, "未知的任务")
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_screaming_case() {
        let progress = JobProgress::in_progress(Uuid::nil(), 40, "x");
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["status"], "IN_PROGRESS");
        assert_eq!(json["percentage"], 40);
    }

    #[test]
    fn test_percentage_is_capped() {
        assert_eq!(JobProgress::in_progress(Uuid::nil(), 250, "x").percentage, 100);
        assert!(JobProgress::completed(Uuid::nil(), "done").is_finished());
        assert!(!JobProgress::queued(Uuid::nil()).is_finished());
    }
}
