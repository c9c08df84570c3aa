pub mod bus;
pub mod chat;
pub mod config;
pub mod device_flow;
mod error;
pub mod helpers;
pub mod msauth;
pub mod protocol;
pub mod registry;
mod routes;
mod validation;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::bus::MessageBus;
use crate::chat::ChatRelay;
use crate::config::Config;
use crate::msauth::MinecraftAuthService;
use crate::registry::SessionRegistry;
use conduit_store::KeyValueStore;

pub struct AppState {
    pub db: conduit_store::Database,
    pub store: Arc<dyn KeyValueStore>,
    pub bus: Arc<MessageBus>,
    pub registry: Arc<SessionRegistry>,
    pub chat: Arc<ChatRelay>,
    pub auth: Arc<MinecraftAuthService>,
    pub oauth_config: config::OAuthConfig,
}

impl AppState {
    /// Wire the bridge components around the injected store capability.
    pub fn new(
        db: conduit_store::Database,
        store: Arc<dyn KeyValueStore>,
        config: &Config,
    ) -> Arc<Self> {
        let bus = Arc::new(MessageBus::new());
        let registry = Arc::new(SessionRegistry::new(store.clone(), config.session_ttl));
        let chat = Arc::new(ChatRelay::new(store.clone(), bus.clone(), db.clone()));
        let auth = MinecraftAuthService::new(config.oauth.clone(), store.clone(), db.clone());

        Arc::new(Self {
            db,
            store,
            bus,
            registry,
            chat,
            auth,
            oauth_config: config.oauth.clone(),
        })
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests per minute for OAuth mutation endpoints
    pub oauth_per_min: u64,
    /// Burst size for OAuth mutation endpoints
    pub oauth_burst: u32,
    /// Requests per second for general endpoints
    pub general_per_sec: u64,
    /// Burst size for general endpoints
    pub general_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            oauth_per_min: 10,
            oauth_burst: 3,
            general_per_sec: 10,
            general_burst: 20,
        }
    }
}

/// Create the application router with the given state and configuration.
/// Rate limiting is optional so router-level tests can drive requests
/// without connection info.
pub fn create_app(
    state: Arc<AppState>,
    request_body_limit: usize,
    request_timeout: Duration,
    rate_limit: Option<RateLimitConfig>,
) -> Router {
    // OAuth mutations are sensitive: each device-flow start spawns a
    // background authorization worker.
    let oauth_routes = Router::new()
        .route("/oauth/device/start", post(routes::start_device_flow))
        .route("/oauth/code", post(routes::stash_authorization_code))
        .route("/oauth/bind", post(routes::bind_microsoft_account));

    let general_routes = Router::new()
        .route("/oauth/device/poll", post(routes::poll_device_flow))
        .route("/oauth/config", get(routes::oauth_config))
        .route("/chat/send", post(routes::send_chat))
        .route("/chat/history", get(routes::chat_history))
        .route("/chat/channels", get(routes::chat_channels))
        .route("/chat/worlds", get(routes::chat_worlds))
        .route("/servers", get(routes::servers));

    let (oauth_routes, general_routes) = match rate_limit {
        Some(rate_limit) => {
            let oauth_governor = GovernorConfigBuilder::default()
                .per_second(rate_limit.oauth_per_min / 60 + 1) // Convert per-min to per-sec, min 1
                .burst_size(rate_limit.oauth_burst)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .unwrap();

            let general_governor = GovernorConfigBuilder::default()
                .per_second(rate_limit.general_per_sec)
                .burst_size(rate_limit.general_burst)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .unwrap();

            (
                oauth_routes.layer(GovernorLayer::new(oauth_governor)),
                general_routes.layer(GovernorLayer::new(general_governor)),
            )
        }
        None => (oauth_routes, general_routes),
    };

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .merge(oauth_routes)
        .merge(general_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(request_body_limit))
        .with_state(state)
}
