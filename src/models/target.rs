use std::fmt;

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TargetError {
    #[error("无效的URL: {0}")]
    Invalid(String),

    #[error("不支持的协议: {0}")]
    Scheme(String),

    #[error("URL缺少主机名")]
    NoHost,
}

/// 抓取目标：规范化后的URL和排序后的查询参数
///
/// 构造后不可变。规范化规则：
/// - 协议和主机名小写，去掉默认端口（由 `url` 完成）
/// - 丢弃片段和用户信息
/// - 查询参数按 (key, value) 排序
///
/// 所以参数顺序不同的两个URL得到同一个 [`fingerprint`](Self::fingerprint)。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchTarget {
    base: Url,
    params: Vec<(String, String)>,
}

impl FetchTarget {
    pub fn parse(raw: &str) -> Result<Self, TargetError> {
        let url = Url::parse(raw.trim()).map_err(|e| TargetError::Invalid(e.to_string()))?;
        let params = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self::from_parts(url, params)
    }

    pub fn from_parts(mut base: Url, mut params: Vec<(String, String)>) -> Result<Self, TargetError> {
        match base.scheme() {
            "http" | "https" => {}
            other => return Err(TargetError::Scheme(other.to_string())),
        }
        if base.host_str().is_none_or(str::is_empty) {
            return Err(TargetError::NoHost);
        }

        base.set_query(None);
        base.set_fragment(None);
        // http(s) URL 一定可以清除用户信息
        let _ = base.set_username("");
        let _ = base.set_password(None);

        params.sort();
        Ok(Self { base, params })
    }

    pub fn host(&self) -> &str {
        self.base.host_str().unwrap_or_default()
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// 带查询参数的完整URL
    pub fn url(&self) -> Url {
        let mut url = self.base.clone();
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.params);
        }
        url
    }

    pub fn canonical(&self) -> String {
        self.url().to_string()
    }

    /// 规范化URL的 SHA-256，作为缓存键
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.canonical().as_bytes()))
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
