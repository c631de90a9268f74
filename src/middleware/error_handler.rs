use axum::{
    body::{Body, to_bytes},
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};

use crate::middleware::ClientKey;

/// 记录 5xx 响应体和 429 拒绝
pub async fn log_errors(req: Request, next: Next) -> Response {
    let client = req
        .extensions()
        .get::<ClientKey>()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".into());
    let path = req.uri().path().to_string();

    let response = next.run(req).await;
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        warn!("请求被限流 - Client: {}, Path: {}", client, path);
        return response;
    }

    if status.is_server_error() {
        let (mut parts, body) = response.into_parts();
        let bytes = match to_bytes(body, 1024).await {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to read error response body: {}", e);
                return Response::from_parts(parts, Body::empty());
            }
        };
        let body_str = String::from_utf8_lossy(&bytes);

        error!(
            "Server error occurred - Status: {}, Client: {}, Path: {}, Body: {}",
            parts.status, client, path, body_str
        );

        // 重置body以便重新构建响应
        parts.headers.remove(axum::http::header::CONTENT_LENGTH);
        Response::from_parts(parts, Body::from(bytes))
    } else {
        response
    }
}
