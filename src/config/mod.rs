use std::collections::HashSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::BucketConfig;
use crate::fetcher::RetryPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("缺少环境变量: {0}")]
    Missing(&'static str),

    #[error("环境变量 {key} 的值无效: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("配置不合法: {0}")]
    Constraint(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(()),
        }
    }
}

/// 共享存储不可用时限流器的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreFailurePolicy {
    /// 拒绝请求（503）
    Closed,
    /// 放行请求
    Open,
}

impl FromStr for StoreFailurePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "closed" | "fail-closed" => Ok(StoreFailurePolicy::Closed),
            "open" | "fail-open" => Ok(StoreFailurePolicy::Open),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub redis_url: Option<String>,
    pub memory_store_capacity: usize,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub rate_limit_capacity: u32,
    pub rate_limit_refill_per_sec: f64,
    pub rate_limit_on_store_error: StoreFailurePolicy,
    pub scrape_cost: u32,
    pub search_cost: u32,
    pub cache_ttl_secs: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_max_retries: u32,
    pub fetch_backoff_base_ms: u64,
    pub fetch_backoff_max_ms: u64,
    pub fetch_max_concurrent: usize,
    pub fetch_max_per_host: usize,
    pub user_agent: String,
    pub webdriver_url: Option<String>,
    /// 登记过的 API key，只有这些 key 有独立的配额桶
    pub api_keys: HashSet<String>,
    pub max_concurrent_jobs: usize,
    pub job_slot_timeout_secs: u64,
    pub job_ttl_secs: u64,
}

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

impl Default for Config {
    /// 单进程内存存储的默认配置，测试和本地开发用
    fn default() -> Self {
        Self {
            store_backend: StoreBackend::Memory,
            redis_url: None,
            memory_store_capacity: 10_000,
            server_host: "::".into(),
            server_port: 3000,
            api_base_uri: "/api".into(),
            rate_limit_capacity: 5,
            rate_limit_refill_per_sec: 1.0,
            rate_limit_on_store_error: StoreFailurePolicy::Closed,
            scrape_cost: 1,
            search_cost: 1,
            cache_ttl_secs: 1800,
            fetch_timeout_secs: 20,
            fetch_max_retries: 3,
            fetch_backoff_base_ms: 200,
            fetch_backoff_max_ms: 5000,
            fetch_max_concurrent: 8,
            fetch_max_per_host: 2,
            user_agent: DEFAULT_USER_AGENT.into(),
            webdriver_url: None,
            api_keys: HashSet::new(),
            max_concurrent_jobs: 3,
            job_slot_timeout_secs: 30,
            job_ttl_secs: 3600,
        }
    }
}

/// 逗号分隔的列表，忽略空项
fn key_set(raw: Option<String>) -> HashSet<String> {
    raw.map(|v| {
        v.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// 读取一个可选变量；存在但解析失败是错误
fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源构造，便于测试
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Config::default();
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Config {
            store_backend: parsed(&lookup, "STORE_BACKEND", StoreBackend::Redis)?,
            redis_url: optional("REDIS_URL"),
            memory_store_capacity: parsed(&lookup, "MEMORY_STORE_CAPACITY", d.memory_store_capacity)?,
            server_host: optional("SERVER_HOST").unwrap_or(d.server_host),
            server_port: parsed(&lookup, "SERVER_PORT", d.server_port)?,
            api_base_uri: optional("API_BASE_URI").unwrap_or(d.api_base_uri),
            rate_limit_capacity: parsed(&lookup, "RATE_LIMIT_CAPACITY", d.rate_limit_capacity)?,
            rate_limit_refill_per_sec: parsed(
                &lookup,
                "RATE_LIMIT_REFILL_PER_SEC",
                d.rate_limit_refill_per_sec,
            )?,
            rate_limit_on_store_error: parsed(
                &lookup,
                "RATE_LIMIT_ON_STORE_ERROR",
                d.rate_limit_on_store_error,
            )?,
            scrape_cost: parsed(&lookup, "SCRAPE_COST", d.scrape_cost)?,
            search_cost: parsed(&lookup, "SEARCH_COST", d.search_cost)?,
            cache_ttl_secs: parsed(&lookup, "CACHE_TTL_SECS", d.cache_ttl_secs)?,
            fetch_timeout_secs: parsed(&lookup, "FETCH_TIMEOUT_SECS", d.fetch_timeout_secs)?,
            fetch_max_retries: parsed(&lookup, "FETCH_MAX_RETRIES", d.fetch_max_retries)?,
            fetch_backoff_base_ms: parsed(&lookup, "FETCH_BACKOFF_BASE_MS", d.fetch_backoff_base_ms)?,
            fetch_backoff_max_ms: parsed(&lookup, "FETCH_BACKOFF_MAX_MS", d.fetch_backoff_max_ms)?,
            fetch_max_concurrent: parsed(&lookup, "FETCH_MAX_CONCURRENT", d.fetch_max_concurrent)?,
            fetch_max_per_host: parsed(&lookup, "FETCH_MAX_PER_HOST", d.fetch_max_per_host)?,
            user_agent: optional("USER_AGENT").unwrap_or(d.user_agent),
            webdriver_url: optional("WEBDRIVER_URL"),
            api_keys: key_set(optional("API_KEYS")),
            max_concurrent_jobs: parsed(&lookup, "MAX_CONCURRENT_JOBS", d.max_concurrent_jobs)?,
            job_slot_timeout_secs: parsed(&lookup, "JOB_SLOT_TIMEOUT_SECS", d.job_slot_timeout_secs)?,
            job_ttl_secs: parsed(&lookup, "JOB_TTL_SECS", d.job_ttl_secs)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_backend == StoreBackend::Redis && self.redis_url.is_none() {
            return Err(ConfigError::Missing("REDIS_URL"));
        }
        if self.rate_limit_capacity < 1 {
            return Err(ConfigError::Constraint("RATE_LIMIT_CAPACITY 至少为 1".into()));
        }
        if !(self.rate_limit_refill_per_sec > 0.0 && self.rate_limit_refill_per_sec.is_finite()) {
            return Err(ConfigError::Constraint(
                "RATE_LIMIT_REFILL_PER_SEC 必须大于 0".into(),
            ));
        }
        for (key, cost) in [("SCRAPE_COST", self.scrape_cost), ("SEARCH_COST", self.search_cost)] {
            if cost < 1 || cost > self.rate_limit_capacity {
                return Err(ConfigError::Constraint(format!(
                    "{} 必须在 1 到 {} 之间",
                    key, self.rate_limit_capacity
                )));
            }
        }
        if !self.api_base_uri.starts_with('/') {
            return Err(ConfigError::Invalid {
                key: "API_BASE_URI",
                value: self.api_base_uri.clone(),
            });
        }
        if self.cache_ttl_secs == 0 {
            return Err(ConfigError::Constraint("CACHE_TTL_SECS 必须大于 0".into()));
        }
        if self.fetch_backoff_base_ms > self.fetch_backoff_max_ms {
            return Err(ConfigError::Constraint(
                "FETCH_BACKOFF_BASE_MS 不能大于 FETCH_BACKOFF_MAX_MS".into(),
            ));
        }
        Ok(())
    }

    pub fn bucket(&self) -> BucketConfig {
        BucketConfig::new(self.rate_limit_capacity, self.rate_limit_refill_per_sec)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.fetch_max_retries,
            base_delay: Duration::from_millis(self.fetch_backoff_base_ms),
            max_delay: Duration::from_millis(self.fetch_backoff_max_ms),
            attempt_timeout: self.fetch_timeout(),
        }
    }

    pub fn job_slot_timeout(&self) -> Duration {
        Duration::from_secs(self.job_slot_timeout_secs)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_with_redis_url() {
        let config = load(&[("REDIS_URL", "redis://127.0.0.1/")]).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Redis);
        assert_eq!(config.rate_limit_capacity, 5);
        assert_eq!(config.cache_ttl(), Duration::from_secs(1800));
        assert_eq!(config.rate_limit_on_store_error, StoreFailurePolicy::Closed);
        assert_eq!(config.api_base_uri, "/api");
        assert!(config.webdriver_url.is_none());
        assert!(config.api_keys.is_empty());
    }

    #[test]
    fn test_redis_backend_requires_url() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("REDIS_URL"))));
        let config = load(&[("STORE_BACKEND", "memory")]).unwrap();
        assert_eq!(config.store_backend, StoreBackend::Memory);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let err = load(&[("STORE_BACKEND", "memory"), ("RATE_LIMIT_CAPACITY", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "RATE_LIMIT_CAPACITY", .. }));

        let err = load(&[("STORE_BACKEND", "memory"), ("RATE_LIMIT_REFILL_PER_SEC", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Constraint(_)));

        let err = load(&[("STORE_BACKEND", "memory"), ("SCRAPE_COST", "9")]).unwrap_err();
        assert!(matches!(err, ConfigError::Constraint(_)));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("STORE_BACKEND", "memory"),
            ("RATE_LIMIT_CAPACITY", "10"),
            ("RATE_LIMIT_REFILL_PER_SEC", "0.5"),
            ("RATE_LIMIT_ON_STORE_ERROR", "open"),
            ("FETCH_MAX_RETRIES", "1"),
            ("WEBDRIVER_URL", "http://localhost:9515"),
            ("API_KEYS", " partner-a, ,partner-b "),
        ])
        .unwrap();
        assert_eq!(config.bucket(), BucketConfig::new(10, 0.5));
        assert_eq!(config.rate_limit_on_store_error, StoreFailurePolicy::Open);
        assert_eq!(config.retry_policy().max_retries, 1);
        assert_eq!(config.webdriver_url.as_deref(), Some("http://localhost:9515"));
        assert_eq!(config.api_keys.len(), 2);
        assert!(config.api_keys.contains("partner-b"));
    }
}
