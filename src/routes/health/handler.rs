use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use tracing::warn;

use crate::{
    AppState,
    config::StoreBackend,
    result::ApiResponse,
    utils::{error_codes, success_to_api_response},
};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store_backend: StoreBackend,
    pub store_ok: bool,
    pub browser_enabled: bool,
    pub version: &'static str,
}

// 存储不可用时返回 503
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let store_ok = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("健康检查：存储不可用: {}", e);
            false
        }
    };

    let body = HealthResponse {
        status: if store_ok { "ok" } else { "degraded" },
        store_backend: state.config.store_backend,
        store_ok,
        browser_enabled: state.orchestrator.fetchers().has_browser(),
        version: env!("CARGO_PKG_VERSION"),
    };

    if store_ok {
        (StatusCode::OK, success_to_api_response(body))
    } else {
        let Json(mut resp) = success_to_api_response(body);
        resp.code = error_codes::STORE_UNAVAILABLE;
        resp.msg = "存储不可用".into();
        (StatusCode::SERVICE_UNAVAILABLE, Json(resp))
    }
}
