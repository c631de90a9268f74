use std::sync::Arc;

use config::Config;

use crate::{
    cache::{JobCacheOperations, ResultCache, SharedStore},
    fetcher::FetcherSet,
    middleware::RateLimiter,
    orchestrator::{JobManager, Orchestrator},
    parser::SiteRegistry,
    utils::SharedClock,
};

pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod middleware;
pub mod models;
pub mod orchestrator;
pub mod parser;
pub mod result;
pub mod router;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn SharedStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub jobs: Arc<JobManager>,
}

impl AppState {
    /// 用同一个存储和时钟组装限流、缓存和搜索任务
    pub fn build(
        config: Config,
        store: Arc<dyn SharedStore>,
        fetchers: FetcherSet,
        clock: SharedClock,
    ) -> Self {
        let limiter = RateLimiter::from_config(store.clone(), &config, clock.clone());
        let cache = ResultCache::new(store.clone(), clock, config.cache_ttl());
        let orchestrator = Arc::new(Orchestrator::new(
            SiteRegistry::builtin(),
            fetchers,
            cache,
            limiter,
            config.scrape_cost,
        ));
        let progress = JobCacheOperations::new(store.clone(), config.job_ttl());
        let jobs = Arc::new(JobManager::from_config(
            orchestrator.clone(),
            progress,
            &config,
        ));

        Self {
            config: Arc::new(config),
            store,
            orchestrator,
            jobs,
        }
    }
}
