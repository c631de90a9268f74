use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use scrape_backend::{
    AppState,
    cache::{MemoryStore, RedisStore, SharedStore},
    config::{Config, StoreBackend},
    fetcher::FetcherSet,
    router::create_router,
    utils::{SharedClock, SystemClock},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env().expect("Failed to load configuration");

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    let clock: SharedClock = Arc::new(SystemClock);

    // 设置共享存储
    let store: Arc<dyn SharedStore> = match config.store_backend {
        StoreBackend::Redis => {
            let url = config.redis_url.as_deref().expect("REDIS_URL is required");
            let store = RedisStore::open(url).expect("Failed to create Redis client");
            if let Err(e) = store.ping().await {
                tracing::warn!("Redis is not reachable yet: {}", e);
            }
            Arc::new(store)
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-process memory store, quota is not shared between instances");
            Arc::new(MemoryStore::new(config.memory_store_capacity, clock.clone()))
        }
    };

    // 设置抓取器
    let fetchers = FetcherSet::from_config(&config).expect("Failed to create HTTP client");
    if !fetchers.has_browser() {
        tracing::warn!("WEBDRIVER_URL not set, browser sites fall back to plain HTTP");
    }

    let state = AppState::build(config, store, fetchers, clock);
    let addr = SocketAddr::new(
        state.config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        state.config.server_port,
    );
    let app = create_router(state);

    // 启动服务器
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Failed to start server");
}
