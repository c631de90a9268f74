//! 选手搜索任务
//!
//! 一次搜索对每个站点跑一遍流水线（不重复扣配额），进度写入共享存储。
//! 同一选手的搜索在运行中时直接返回已有任务。

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::Orchestrator;
use crate::{
    cache::JobCacheOperations,
    config::Config,
    error::AppError,
    middleware::ClientKey,
    models::JobProgress,
    parser::{AwardRecord, PlacingSummary, SiteProfile},
    utils::collapse_whitespace,
};

const MAX_PLAYER_NAME_CHARS: usize = 50;

/// 去掉多余空白；空名字或超长名字是参数错误
pub fn normalize_player_name(raw: &str) -> Result<String, AppError> {
    let name = collapse_whitespace(raw);
    if name.is_empty() {
        return Err(AppError::Validation("选手姓名不能为空".into()));
    }
    if name.chars().count() > MAX_PLAYER_NAME_CHARS {
        return Err(AppError::Validation(format!(
            "选手姓名不能超过{}个字符",
            MAX_PLAYER_NAME_CHARS
        )));
    }
    Ok(name)
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchTicket {
    pub job_id: Uuid,
    pub player_name: String,
    /// 是否复用了正在运行的任务
    pub reused: bool,
    pub remaining: Option<u32>,
}

/// 带站点标记的记录
#[derive(Debug, Clone, Serialize)]
pub struct SiteRecord {
    pub site: &'static str,
    pub site_name: &'static str,
    #[serde(flatten)]
    pub record: AwardRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub player_name: String,
    pub records: Vec<SiteRecord>,
    pub summary: PlacingSummary,
    /// 没有有效缓存的站点
    pub pending_sites: Vec<&'static str>,
}

type OngoingMap = Arc<Mutex<HashMap<String, Uuid>>>;

/// 任务结束（含 panic 和取消）时移除运行中登记
struct OngoingGuard {
    ongoing: OngoingMap,
    player_name: String,
    job_id: Uuid,
}

impl Drop for OngoingGuard {
    fn drop(&mut self) {
        if let Ok(mut ongoing) = self.ongoing.lock() {
            if ongoing.get(&self.player_name) == Some(&self.job_id) {
                ongoing.remove(&self.player_name);
            }
        }
    }
}

pub struct JobManager {
    orchestrator: Arc<Orchestrator>,
    progress: JobCacheOperations,
    slots: Arc<Semaphore>,
    slot_timeout: Duration,
    search_cost: u32,
    ongoing: OngoingMap,
}

impl JobManager {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        progress: JobCacheOperations,
        max_concurrent_jobs: usize,
        slot_timeout: Duration,
        search_cost: u32,
    ) -> Self {
        Self {
            orchestrator,
            progress,
            slots: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            slot_timeout,
            search_cost,
            ongoing: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(orchestrator: Arc<Orchestrator>, progress: JobCacheOperations, config: &Config) -> Self {
        Self::new(
            orchestrator,
            progress,
            config.max_concurrent_jobs,
            config.job_slot_timeout(),
            config.search_cost,
        )
    }

    pub fn ongoing_len(&self) -> usize {
        self.ongoing.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// 扣配额并启动（或复用）搜索任务
    pub async fn start_search(self: &Arc<Self>, client: &ClientKey, raw_name: &str) -> Result<SearchTicket, AppError> {
        let player_name = normalize_player_name(raw_name)?;
        let remaining = self
            .orchestrator
            .limiter()
            .try_acquire(client, self.search_cost)
            .await
            .into_result()?;

        let job_id = Uuid::new_v4();
        let guard = {
            let mut ongoing = self
                .ongoing
                .lock()
                .map_err(|_| AppError::Internal("任务表锁已损坏".into()))?;
            if let Some(existing) = ongoing.get(&player_name) {
                info!("复用进行中的任务 {} ({})", existing, player_name);
                return Ok(SearchTicket {
                    job_id: *existing,
                    player_name,
                    reused: true,
                    remaining,
                });
            }
            ongoing.insert(player_name.clone(), job_id);
            OngoingGuard {
                ongoing: self.ongoing.clone(),
                player_name: player_name.clone(),
                job_id,
            }
        };

        // 写入失败时 guard 在这里被丢弃，登记随之移除
        self.progress.save(&JobProgress::queued(job_id)).await?;

        info!("创建搜索任务 {} ({})", job_id, player_name);
        let this = self.clone();
        let name = player_name.clone();
        tokio::spawn(async move {
            let last = match AssertUnwindSafe(this.run(job_id, &name)).catch_unwind().await {
                Ok(last) => last,
                Err(_) => {
                    error!("搜索任务异常终止 {} ({})", job_id, name);
                    JobProgress::failed(job_id, "任务异常终止")
                }
            };
            // 先撤销登记再写终态，读到终态的调用方可以立即重新搜索
            drop(guard);
            this.save(last).await;
        });

        Ok(SearchTicket {
            job_id,
            player_name,
            reused: false,
            remaining,
        })
    }

    async fn save(&self, progress: JobProgress) {
        if let Err(e) = self.progress.save(&progress).await {
            warn!("写入任务进度失败 {}: {}", progress.job_id, e);
        }
    }

    /// 跑完所有站点，返回终态进度
    async fn run(&self, job_id: Uuid, player_name: &str) -> JobProgress {
        let _permit = match timeout(self.slot_timeout, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            _ => {
                warn!("等待任务槽超时 {}", job_id);
                return JobProgress::failed(job_id, "服务器繁忙，请稍后再试");
            }
        };

        self.save(JobProgress::in_progress(job_id, 0, "开始抓取..."))
            .await;

        let sites = self.orchestrator.sites().all();
        let total = sites.len().max(1);
        let finished = tokio::sync::Mutex::new(0usize);

        let runs = sites.iter().copied().map(|site| {
            let finished = &finished;
            async move {
                let result = self.run_site(site, player_name).await;

                // 串行写进度，保证百分比单调递增
                let mut done = finished.lock().await;
                *done += 1;
                let percentage = (*done * 100 / total) as u8;
                let message = match &result {
                    Ok(count) => format!("{} 完成 ({}条)", site.name, count),
                    Err(e) => format!("{} 失败: {}", site.name, e),
                };
                self.save(JobProgress::in_progress(job_id, percentage, message))
                    .await;
                (site.name, result)
            }
        });
        let results = join_all(runs).await;

        let failed: Vec<&str> = results
            .iter()
            .filter(|(_, r)| r.is_err())
            .map(|(name, _)| *name)
            .collect();
        let message = if failed.is_empty() {
            "抓取完成".to_string()
        } else {
            error!("任务 {} 部分站点失败: {:?}", job_id, failed);
            format!("抓取完成，失败的站点: {}", failed.join(", "))
        };
        info!("搜索任务完成 {} ({})", job_id, player_name);
        JobProgress::completed(job_id, message)
    }

    async fn run_site(&self, site: &'static SiteProfile, player_name: &str) -> Result<usize, AppError> {
        let target = site.search_target(player_name)?;
        let lookup = self.orchestrator.resolve(site, &target).await?;
        Ok(lookup.entry.value.records.len())
    }

    /// 任务进度；未知的任务返回 UNKNOWN
    pub async fn status(&self, job_id: Uuid) -> Result<JobProgress, AppError> {
        Ok(self
            .progress
            .load(&job_id)
            .await?
            .unwrap_or_else(|| JobProgress::unknown(job_id)))
    }

    /// 只读缓存，合并各站点结果，按日期倒序
    pub async fn results(&self, raw_name: &str) -> Result<SearchResults, AppError> {
        let player_name = normalize_player_name(raw_name)?;

        let mut records = Vec::new();
        let mut pending_sites = Vec::new();
        for site in self.orchestrator.sites().all() {
            let target = site.search_target(&player_name)?;
            match self.orchestrator.cached(&target).await {
                Some(entry) => records.extend(entry.value.records.into_iter().map(|record| SiteRecord {
                    site: site.id,
                    site_name: site.name,
                    record,
                })),
                None => pending_sites.push(site.id),
            }
        }

        // 没有日期的排在最后
        records.sort_by_key(|r| Reverse(r.record.tournament_date));
        let summary = PlacingSummary::from_records(records.iter().map(|r| &r.record));

        Ok(SearchResults {
            player_name,
            records,
            summary,
            pending_sites,
        })
    }
}
