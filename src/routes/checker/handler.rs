use axum::{
    Json,
    extract::{Query, State},
};
use uuid::Uuid;

use crate::{
    AppState,
    error::AppError,
    middleware::ClientKey,
    models::JobProgress,
    orchestrator::SearchResults,
    result::ApiResponse,
    routes::checker::model::{ResultsQuery, SearchRequest, SearchResponse, StatusQuery},
    utils::success_to_api_response,
};

// 发起选手搜索任务
pub async fn search(
    State(state): State<AppState>,
    client: ClientKey,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<ApiResponse<SearchResponse>>, AppError> {
    let ticket = state
        .jobs
        .start_search(&client, &payload.player_name)
        .await?;
    Ok(success_to_api_response(ticket.into()))
}

// 查询任务进度
pub async fn status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ApiResponse<JobProgress>>, AppError> {
    let raw = query
        .job_id
        .ok_or_else(|| AppError::Validation("缺少job_id参数".into()))?;
    let job_id = Uuid::parse_str(raw.trim())
        .map_err(|_| AppError::Validation(format!("无效的job_id: {}", raw)))?;
    let progress = state.jobs.status(job_id).await?;
    Ok(success_to_api_response(progress))
}

// 读取已缓存的搜索结果
pub async fn results(
    State(state): State<AppState>,
    Query(query): Query<ResultsQuery>,
) -> Result<Json<ApiResponse<SearchResults>>, AppError> {
    let player_name = query
        .player_name
        .ok_or_else(|| AppError::Validation("缺少player_name参数".into()))?;
    let results = state.jobs.results(&player_name).await?;
    Ok(success_to_api_response(results))
}
