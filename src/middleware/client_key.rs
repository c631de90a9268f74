use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{HeaderMap, Request, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::{AppState, error::AppError};

pub const API_KEY_HEADER: &str = "x-api-key";

/// 限流用的客户端标识，形如 `key:<api key>` 或 `ip:<地址>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 优先登记过的 API key，其次代理头里的真实IP，最后是连接地址
    ///
    /// 未登记的 key 按 IP 计数，换 key 不能绕过配额。
    pub fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>, api_keys: &HashSet<String>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|h| h.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        match header(API_KEY_HEADER) {
            Some(key) if api_keys.contains(key) => return ClientKey(format!("key:{}", key)),
            Some(_) => debug!("未登记的 API key，按 IP 限流"),
            None => {}
        }

        let remote_ip = peer.map(|addr| addr.ip().to_string());
        let ip = header("x-real-ip")
            .or_else(|| {
                header("x-forwarded-for")
                    .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()))
            })
            .or(remote_ip.as_deref())
            .unwrap_or("unknown");
        ClientKey(format!("ip:{}", ip))
    }
}

impl From<&str> for ClientKey {
    fn from(value: &str) -> Self {
        ClientKey(value.to_string())
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 解析客户端标识并放进请求扩展
pub async fn client_key(State(state): State<AppState>, mut req: Request<Body>, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let key = ClientKey::resolve(req.headers(), peer, &state.config.api_keys);
    req.extensions_mut().insert(key);
    next.run(req).await
}

impl<S: Send + Sync> FromRequestParts<S> for ClientKey {
    type Rejection = AppError;

    /// 没经过 `client_key` 中间件时拿不到登记的 key，只按 IP 识别
    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<ClientKey>()
            .cloned()
            .unwrap_or_else(|| {
                let peer = parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ci| ci.0);
                ClientKey::resolve(&parts.headers, peer, &HashSet::new())
            }))
    }
}
