//! 抓取流水线
//!
//! 每个请求依次经过：
//! CHECK_QUOTA → CHECK_CACHE → FETCH → PARSE → STORE_CACHE → RESPOND
//!
//! 任一步失败直接返回错误；配额被拒时不会发起任何抓取。
//! 缓存未命中时同一个键只会有一次抓取，其余请求等待它的结果。

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheEntry, Fill, Lookup, ResultCache, keys::scrape_result_key},
    error::AppError,
    fetcher::{Fetcher, FetcherSet},
    middleware::{ClientKey, RateLimiter},
    models::FetchTarget,
    parser::{self, ParsedPage, SiteProfile, SiteRegistry},
};

pub mod jobs;

pub use jobs::{JobManager, SearchResults, SearchTicket, SiteRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    CheckQuota,
    CheckCache,
    Fetch,
    Parse,
    StoreCache,
    Respond,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::CheckQuota => "CHECK_QUOTA",
            Stage::CheckCache => "CHECK_CACHE",
            Stage::Fetch => "FETCH",
            Stage::Parse => "PARSE",
            Stage::StoreCache => "STORE_CACHE",
            Stage::Respond => "RESPOND",
        };
        f.write_str(name)
    }
}

/// 一次抓取请求的结果
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub site: &'static SiteProfile,
    pub fingerprint: String,
    pub lookup: Lookup<ParsedPage>,
    /// 扣减后剩余的请求次数；存储不可用而放行时为 None
    pub remaining: Option<u32>,
}

pub struct Orchestrator {
    sites: SiteRegistry,
    fetchers: FetcherSet,
    cache: ResultCache<ParsedPage>,
    limiter: RateLimiter,
    scrape_cost: u32,
}

impl Orchestrator {
    pub fn new(
        sites: SiteRegistry,
        fetchers: FetcherSet,
        cache: ResultCache<ParsedPage>,
        limiter: RateLimiter,
        scrape_cost: u32,
    ) -> Self {
        Self {
            sites,
            fetchers,
            cache,
            limiter,
            scrape_cost,
        }
    }

    pub fn sites(&self) -> &SiteRegistry {
        &self.sites
    }

    pub fn fetchers(&self) -> &FetcherSet {
        &self.fetchers
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &ResultCache<ParsedPage> {
        &self.cache
    }

    /// 没有对应站点配置的目标一律拒绝
    pub fn site_for(&self, target: &FetchTarget) -> Result<&'static SiteProfile, AppError> {
        self.sites
            .for_target(target)
            .ok_or_else(|| AppError::UnsupportedSite(target.host().to_string()))
    }

    /// 完整流程：先扣配额，再走缓存或抓取
    pub async fn scrape(&self, client: &ClientKey, target: &FetchTarget) -> Result<ScrapeOutcome, AppError> {
        let site = self.site_for(target)?;

        debug!(stage = %Stage::CheckQuota, client = %client, "{}", target);
        let remaining = self
            .limiter
            .try_acquire(client, self.scrape_cost)
            .await
            .into_result()?;

        let lookup = self.resolve(site, target).await?;

        debug!(stage = %Stage::Respond, source = ?lookup.source, "{}", target);
        Ok(ScrapeOutcome {
            site,
            fingerprint: target.fingerprint(),
            lookup,
            remaining,
        })
    }

    /// 不扣配额的缓存/抓取，搜索任务内部使用
    pub async fn resolve(
        &self,
        site: &'static SiteProfile,
        target: &FetchTarget,
    ) -> Result<Lookup<ParsedPage>, AppError> {
        let key = scrape_result_key(&target.fingerprint());
        debug!(stage = %Stage::CheckCache, key = %key, "{}", target);

        let fetcher = self.fetchers.for_mode(site.mode).clone();
        let owned = target.clone();
        self.cache
            .get_or_load(&key, move || load_page(fetcher, site, owned))
            .await
    }

    /// 只读缓存，不抓取
    pub async fn cached(&self, target: &FetchTarget) -> Option<CacheEntry<ParsedPage>> {
        self.cache
            .get(&scrape_result_key(&target.fingerprint()))
            .await
    }

    /// 让缓存失效，和抓取一样扣配额，返回剩余令牌
    pub async fn invalidate(&self, client: &ClientKey, target: &FetchTarget) -> Result<Option<u32>, AppError> {
        self.site_for(target)?;
        let remaining = self
            .limiter
            .try_acquire(client, self.scrape_cost)
            .await
            .into_result()?;
        self.cache
            .invalidate(&scrape_result_key(&target.fingerprint()))
            .await?;
        info!(client = %client, "缓存已失效 {}", target);
        Ok(remaining)
    }
}

/// 抓取并解析一个目标
///
/// 解析失败返回带 `parse_error` 的空结果，且不写缓存。
pub async fn load_page(
    fetcher: Arc<dyn Fetcher>,
    site: &'static SiteProfile,
    target: FetchTarget,
) -> Result<Fill<ParsedPage>, AppError> {
    debug!(stage = %Stage::Fetch, fetcher = fetcher.name(), site = site.id, "{}", target);
    let raw = fetcher.fetch(&target, site.hints()).await?;

    debug!(stage = %Stage::Parse, bytes = raw.body.len(), "{}", target);
    match parser::parse(site, &raw.body) {
        Ok(page) => {
            if !page.missing.is_empty() {
                debug!("[{}] {} 个字段缺失 {}", site.id, page.missing.len(), target);
            }
            info!(
                stage = %Stage::StoreCache,
                "[{}] 解析出 {} 条记录 {}",
                site.id,
                page.records.len(),
                target
            );
            Ok(Fill::cacheable(page))
        }
        Err(e) => {
            warn!("[{}] 解析失败 {}: {}", site.id, target, e);
            Ok(Fill::transient(ParsedPage::failed(&e)))
        }
    }
}
