//! 抓取层
//!
//! 对外只有 [`Fetcher`] 一个接口，纯 HTTP 和浏览器驱动两种实现可以互换，
//! 重试和并发限制通过 [`ResilientFetcher`] 包装在任意实现之外。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::{config::Config, models::FetchTarget};

pub mod browser;
pub mod http;
pub mod limit;
pub mod retry;

pub use browser::{BrowserFetcher, BrowserOptions};
pub use http::HttpFetcher;
pub use limit::{HostLimits, HostPermit};
pub use retry::{ResilientFetcher, RetryPolicy};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("请求超时: {url}")]
    Timeout { url: String },

    #[error("连接失败 {url}: {message}")]
    Connect { url: String, message: String },

    #[error("HTTP {status}: {url}")]
    Status { url: String, status: u16 },

    #[error("不支持的内容类型 {content_type}: {url}")]
    UnsupportedContent { url: String, content_type: String },

    #[error("浏览器驱动错误: {message}")]
    Browser { message: String, transient: bool },

    #[error("重试{attempts}次后仍然失败 {url}: {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// 超时、连接失败、5xx/408/429 可以重试；其余 4xx 和内容不兼容不重试
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Connect { .. } => true,
            FetchError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            FetchError::Browser { transient, .. } => *transient,
            FetchError::UnsupportedContent { .. } | FetchError::RetriesExhausted { .. } => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::Timeout { .. } => true,
            FetchError::RetriesExhausted { last, .. } => last.is_timeout(),
            _ => false,
        }
    }
}

/// 抓取到的原始内容
#[derive(Debug, Clone, Serialize)]
pub struct RawContent {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Http,
    Browser,
}

/// 需要在页面上填写并提交的搜索表单
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchForm {
    /// 输入框选择器
    pub input: &'static str,
    /// 提交按钮选择器
    pub submit: &'static str,
    /// 输入内容取自目标的哪个查询参数
    pub param: &'static str,
}

/// 翻页按钮；按钮带有 `disabled_class` 时表示已是最后一页
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    pub next: &'static str,
    pub disabled_class: &'static str,
    /// 每页的结果行，翻页后等待第一行失效
    pub rows: &'static str,
}

/// 站点相关的抓取提示，纯 HTTP 实现会忽略它们
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchHints {
    /// 等待出现的元素
    pub wait_for: Option<&'static str>,
    pub search_form: Option<SearchForm>,
    /// 提交搜索前已经存在的结果行，提交后要等它失效才算拿到新结果
    pub stale_after_submit: Option<&'static str>,
    /// 反复点击直到消失的“加载更多”按钮
    pub expand: Option<&'static str>,
    pub paginate: Option<Paginator>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, target: &FetchTarget, hints: FetchHints)
    -> Result<RawContent, FetchError>;
}

/// 按抓取方式选择实现；没有配置浏览器时退回纯 HTTP
#[derive(Clone)]
pub struct FetcherSet {
    http: Arc<dyn Fetcher>,
    browser: Option<Arc<dyn Fetcher>>,
}

impl FetcherSet {
    pub fn new(http: Arc<dyn Fetcher>, browser: Option<Arc<dyn Fetcher>>) -> Self {
        Self { http, browser }
    }

    /// 所有方式都用同一个实现，测试里常用
    pub fn single(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            http: fetcher.clone(),
            browser: Some(fetcher),
        }
    }

    pub fn for_mode(&self, mode: FetchMode) -> &Arc<dyn Fetcher> {
        match (mode, &self.browser) {
            (FetchMode::Browser, Some(browser)) => browser,
            _ => &self.http,
        }
    }

    pub fn has_browser(&self) -> bool {
        self.browser.is_some()
    }

    /// 按配置组装抓取器：两种实现共用同一组并发限制，各自包一层重试
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let limits = Arc::new(HostLimits::new(
            config.fetch_max_concurrent,
            config.fetch_max_per_host,
        ));
        let policy = config.retry_policy();

        let http = HttpFetcher::new(&config.user_agent, config.fetch_timeout())?;
        let http: Arc<dyn Fetcher> = Arc::new(ResilientFetcher::new(
            Arc::new(http),
            policy,
            limits.clone(),
        ));

        let browser = match &config.webdriver_url {
            Some(url) => {
                let options = BrowserOptions {
                    user_agent: config.user_agent.clone(),
                    wait_timeout: config.fetch_timeout(),
                    ..Default::default()
                };
                let fetcher = BrowserFetcher::new(url, config.fetch_timeout(), options)?;
                // 浏览器一次抓取包含等待和多次展开，单次尝试给更长的时间
                let policy = RetryPolicy {
                    attempt_timeout: policy.attempt_timeout * 3,
                    ..policy
                };
                Some(Arc::new(ResilientFetcher::new(Arc::new(fetcher), policy, limits)) as Arc<dyn Fetcher>)
            }
            None => None,
        };

        Ok(Self::new(http, browser))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let url = "http://a/".to_string();
        assert!(FetchError::Timeout { url: url.clone() }.is_transient());
        assert!(
            FetchError::Status {
                url: url.clone(),
                status: 503
            }
            .is_transient()
        );
        assert!(
            FetchError::Status {
                url: url.clone(),
                status: 429
            }
            .is_transient()
        );
        assert!(
            !FetchError::Status {
                url: url.clone(),
                status: 404
            }
            .is_transient()
        );
        assert!(
            !FetchError::UnsupportedContent {
                url: url.clone(),
                content_type: "image/png".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_exhausted_timeout_is_timeout() {
        let err = FetchError::RetriesExhausted {
            url: "http://a/".into(),
            attempts: 4,
            last: Box::new(FetchError::Timeout {
                url: "http://a/".into(),
            }),
        };
        assert!(err.is_timeout());
        assert!(!err.is_transient());
    }
}
