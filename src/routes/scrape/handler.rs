use axum::{
    Json,
    extract::{Query, State},
};

use crate::{
    AppState,
    error::AppError,
    middleware::ClientKey,
    models::FetchTarget,
    result::ApiResponse,
    routes::scrape::model::{InvalidateResponse, ScrapeQuery, ScrapeResponse},
    utils::success_to_api_response,
};

fn target_from(query: ScrapeQuery) -> Result<FetchTarget, AppError> {
    let url = query
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| AppError::Validation("缺少url参数".into()))?;
    Ok(FetchTarget::parse(url.trim())?)
}

// 抓取单个目标，走完整流水线
pub async fn scrape(
    State(state): State<AppState>,
    client: ClientKey,
    Query(query): Query<ScrapeQuery>,
) -> Result<Json<ApiResponse<ScrapeResponse>>, AppError> {
    let target = target_from(query)?;
    let outcome = state.orchestrator.scrape(&client, &target).await?;
    Ok(success_to_api_response(outcome.into()))
}

// 让目标的缓存失效，和抓取一样扣配额
pub async fn invalidate(
    State(state): State<AppState>,
    client: ClientKey,
    Query(query): Query<ScrapeQuery>,
) -> Result<Json<ApiResponse<InvalidateResponse>>, AppError> {
    let target = target_from(query)?;
    let remaining = state.orchestrator.invalidate(&client, &target).await?;
    Ok(success_to_api_response(InvalidateResponse {
        fingerprint: target.fingerprint(),
        invalidated: true,
        remaining_requests: remaining,
    }))
}
