use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::cache::keys::job_progress_key;
use crate::cache::store::{SharedStore, StoreError};
use crate::models::JobProgress;

/// 搜索任务进度的缓存操作
#[derive(Clone)]
pub struct JobCacheOperations {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
}

impl JobCacheOperations {
    pub fn new(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// 写入任务进度，每次写入都会刷新过期时间
    pub async fn save(&self, progress: &JobProgress) -> Result<(), StoreError> {
        let key = job_progress_key(&progress.job_id);
        let json = serde_json::to_string(progress).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            message: e.to_string(),
        })?;
        self.store.put(&key, json, self.ttl).await
    }

    pub async fn load(&self, job_id: &Uuid) -> Result<Option<JobProgress>, StoreError> {
        let key = job_progress_key(job_id);
        match self.store.get(&key).await? {
            Some(json) => {
                let progress = serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
                    key,
                    message: e.to_string(),
                })?;
                Ok(Some(progress))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use crate::models::JobStatus;
    use crate::utils::ManualClock;

    #[tokio::test]
    async fn test_save_and_load_progress() {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new(8, clock.clone()));
        let jobs = JobCacheOperations::new(store, Duration::from_secs(3600));

        let id = Uuid::new_v4();
        jobs.save(&JobProgress::in_progress(id, 50, "airping 완료"))
            .await
            .unwrap();
        let loaded = jobs.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::InProgress);
        assert_eq!(loaded.percentage, 50);

        clock.set(3_600_000);
        assert!(jobs.load(&id).await.unwrap().is_none());
        assert!(jobs.load(&Uuid::new_v4()).await.unwrap().is_none());
    }
}
