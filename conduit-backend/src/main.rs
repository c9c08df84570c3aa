use conduit_backend::{AppState, RateLimitConfig, bus, config::Config, create_app};
use conduit_store::{Database, MemoryStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting Conduit bridge...");

    // Load configuration from environment variables or use defaults
    let config = Config::from_env();
    tracing::info!(
        "Configuration: port={}, db_path={}, body_limit={}KB, timeout={}s, session_ttl={}s",
        config.port,
        config.database_path,
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
        config.session_ttl.as_secs(),
    );
    tracing::info!(
        "OAuth: enabled={}, poll_interval={}s, poll_timeout={}s, device_code_wait={}s",
        config.oauth.enabled,
        config.oauth.polling_interval.as_secs(),
        config.oauth.polling_timeout.as_secs(),
        config.oauth.device_code_wait.as_secs(),
    );

    let db = Database::open(&config.database_path).await.unwrap();
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(db.clone(), store, &config);

    // Bridge inbound game-server packets into the registry and chat relay.
    tokio::spawn(bus::packet_pump(
        state.bus.clone(),
        state.registry.clone(),
        state.chat.clone(),
        db,
    ));

    let rate_limit = RateLimitConfig {
        oauth_per_min: config.rate_limit_oauth_per_min,
        oauth_burst: config.rate_limit_oauth_burst,
        general_per_sec: config.rate_limit_general_per_sec,
        general_burst: config.rate_limit_general_burst,
    };
    let app = create_app(
        state,
        config.request_body_limit,
        config.request_timeout,
        Some(rate_limit),
    );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await.unwrap();
    tracing::info!("Server listening on {}", addr);

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!("Axum server error: {}", e);
    }
}
