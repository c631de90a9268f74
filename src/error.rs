use std::time::Duration;

use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::{TypedHeader, headers::RetryAfter};
use serde::Serialize;
use thiserror::Error;

use crate::{
    cache::store::StoreError,
    fetcher::FetchError,
    models::target::TargetError,
    result::ApiResponse,
    utils::error_codes,
};

/// 请求级错误
///
/// 会在去重等待者之间共享，所以必须是 `Clone`。
#[derive(Error, Debug, Clone)]
pub enum AppError {
    #[error("请求过于频繁，请在{retry_after_secs}秒后重试")]
    QuotaExceeded {
        retry_after_secs: u64,
        remaining: u32,
    },

    #[error("抓取失败: {0}")]
    Fetch(#[from] FetchError),

    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    #[error("不支持的站点: {0}")]
    UnsupportedSite(String),

    #[error("参数错误: {0}")]
    Validation(String),

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::StoreUnavailable(err.to_string())
    }
}

impl From<TargetError> for AppError {
    fn from(err: TargetError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Fetch(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            AppError::Fetch(_) => StatusCode::BAD_GATEWAY,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::UnsupportedSite(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            AppError::QuotaExceeded { .. } => error_codes::RATE_LIMIT,
            AppError::Fetch(e) if e.is_timeout() => error_codes::UPSTREAM_TIMEOUT,
            AppError::Fetch(_) => error_codes::UPSTREAM_ERROR,
            AppError::StoreUnavailable(_) => error_codes::STORE_UNAVAILABLE,
            AppError::UnsupportedSite(_) => error_codes::UNSUPPORTED_SITE,
            AppError::Validation(_) => error_codes::VALIDATION_ERROR,
            AppError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }
}

#[derive(Serialize)]
struct QuotaBody {
    retry_after_secs: u64,
    remaining_requests: u32,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let msg = self.to_string();

        match self {
            AppError::QuotaExceeded {
                retry_after_secs,
                remaining,
            } => {
                let body = Json(ApiResponse {
                    code,
                    msg,
                    resp_data: Some(QuotaBody {
                        retry_after_secs,
                        remaining_requests: remaining,
                    }),
                });
                let retry_after = RetryAfter::delay(Duration::from_secs(retry_after_secs));
                (status, TypedHeader(retry_after), body).into_response()
            }
            _ => {
                let body = Json(ApiResponse::<()> {
                    code,
                    msg,
                    resp_data: None,
                });
                (status, body).into_response()
            }
        }
    }
}
