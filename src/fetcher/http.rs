use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header::CONTENT_TYPE};
use tracing::debug;

use super::{FetchError, FetchHints, Fetcher, RawContent};
use crate::models::FetchTarget;

/// 可以交给解析器的内容类型
const ACCEPTED_CONTENT: [&str; 4] = ["text/html", "application/xhtml+xml", "text/xml", "text/plain"];

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self { client })
    }
}

pub(crate) fn map_reqwest_error(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Connect {
            url: url.to_string(),
            message: err.to_string(),
        }
    }
}

fn is_accepted(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ACCEPTED_CONTENT.contains(&mime.as_str())
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, target: &FetchTarget, _hints: FetchHints) -> Result<RawContent, FetchError> {
        let url = target.canonical();
        debug!("HTTP 抓取 {}", url);

        let response = self
            .client
            .get(target.url())
            .send()
            .await
            .map_err(|e| map_reqwest_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(ct) = &content_type {
            if !is_accepted(ct) {
                return Err(FetchError::UnsupportedContent {
                    url,
                    content_type: ct.clone(),
                });
            }
        }

        // 按响应头里的 charset 解码，部分站点仍是 EUC-KR
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(&url, e))?;

        Ok(RawContent {
            url,
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
