use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{
    AppState,
    middleware::{client_key, log_errors},
    routes,
};

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // 单个目标抓取
        .route(
            "/scrape",
            get(routes::scrape::scrape).delete(routes::scrape::invalidate),
        )
        // 选手搜索任务
        .route("/checker/search", post(routes::checker::search))
        .route("/checker/status", get(routes::checker::status))
        .route("/checker/results", get(routes::checker::results))
        .route("/health", get(routes::health::health));

    // axum 不允许嵌套在根路径上
    let base = state.config.api_base_uri.trim_end_matches('/');
    let router = if base.is_empty() {
        api_routes
    } else {
        Router::new().nest(base, api_routes)
    };

    // client_key 在最外层，log_errors 才能拿到客户端标识
    let router = router
        .layer(axum::middleware::from_fn(log_errors))
        .layer(axum::middleware::from_fn_with_state(state.clone(), client_key))
        .layer(TraceLayer::new_for_http());

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(tower_http::cors::CorsLayer::permissive())
    };

    router.with_state(state)
}
