use std::env::var;
use std::time::Duration;

use dotenvy::dotenv;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 1048576 = 1MB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Database file path
    /// Env: DATABASE_PATH (default: "conduit.db")
    pub database_path: String,

    /// Seconds without a heartbeat before a live session is evicted
    /// Env: SESSION_TTL_SECS (default: 90)
    pub session_ttl: Duration,

    /// Rate limit for OAuth mutation endpoints (requests per minute)
    /// Env: RATE_LIMIT_OAUTH_PER_MIN (default: 10)
    /// Strict: each start spawns a background authorization worker
    pub rate_limit_oauth_per_min: u64,

    /// Burst size for OAuth mutation endpoints
    /// Env: RATE_LIMIT_OAUTH_BURST (default: 3)
    pub rate_limit_oauth_burst: u32,

    /// Rate limit for general endpoints (requests per second)
    /// Env: RATE_LIMIT_GENERAL_PER_SEC (default: 10)
    pub rate_limit_general_per_sec: u64,

    /// Burst size for general endpoints
    /// Env: RATE_LIMIT_GENERAL_BURST (default: 20)
    pub rate_limit_general_burst: u32,

    /// Microsoft OAuth settings
    pub oauth: OAuthConfig,
}

/// Microsoft OAuth device-flow settings and identity endpoints
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Env: MS_OAUTH_ENABLED (default: true)
    pub enabled: bool,

    /// Env: MS_CLIENT_ID (default: empty, required in production)
    pub client_id: String,

    /// Env: MS_SCOPE (default: "XboxLive.signin offline_access")
    pub scope: String,

    /// Env: MS_DEVICE_CODE_ENDPOINT
    pub device_code_endpoint: String,

    /// Env: MS_TOKEN_ENDPOINT
    pub token_endpoint: String,

    /// Env: XBOX_AUTH_ENDPOINT
    pub xbox_auth_endpoint: String,

    /// Env: XSTS_AUTH_ENDPOINT
    pub xsts_auth_endpoint: String,

    /// Env: MINECRAFT_AUTH_ENDPOINT
    pub minecraft_auth_endpoint: String,

    /// Env: MINECRAFT_PROFILE_ENDPOINT
    pub minecraft_profile_endpoint: String,

    /// Seconds between device-token polls
    /// Env: POLLING_INTERVAL_SECS (default: 5)
    pub polling_interval: Duration,

    /// Overall device-flow lifetime
    /// Env: POLLING_TIMEOUT_SECS (default: 900)
    pub polling_timeout: Duration,

    /// Bound on the synchronous wait for a device code
    /// Env: DEVICE_CODE_WAIT_SECS (default: 10)
    pub device_code_wait: Duration,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        Self {
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", 1024 * 1024),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            port: env_or_default("PORT", 3000),
            database_path: env_or_default_string("DATABASE_PATH", "conduit.db"),
            session_ttl: Duration::from_secs(env_or_default("SESSION_TTL_SECS", 90)),
            rate_limit_oauth_per_min: env_or_default("RATE_LIMIT_OAUTH_PER_MIN", 10),
            rate_limit_oauth_burst: env_or_default("RATE_LIMIT_OAUTH_BURST", 3),
            rate_limit_general_per_sec: env_or_default("RATE_LIMIT_GENERAL_PER_SEC", 10),
            rate_limit_general_burst: env_or_default("RATE_LIMIT_GENERAL_BURST", 20),
            oauth: OAuthConfig::from_env(),
        }
    }

    /// Create configuration with all default values
    pub fn default() -> Self {
        Self {
            request_body_limit: 1024 * 1024, // 1 MB
            request_timeout: Duration::from_secs(30),
            port: 3000,
            database_path: "conduit.db".to_string(),
            session_ttl: Duration::from_secs(90),
            rate_limit_oauth_per_min: 10,
            rate_limit_oauth_burst: 3,
            rate_limit_general_per_sec: 10,
            rate_limit_general_burst: 20,
            oauth: OAuthConfig::default(),
        }
    }
}

impl OAuthConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: env_or_default("MS_OAUTH_ENABLED", true),
            client_id: env_or_default_string("MS_CLIENT_ID", ""),
            scope: env_or_default_string("MS_SCOPE", "XboxLive.signin offline_access"),
            device_code_endpoint: env_or_default_string(
                "MS_DEVICE_CODE_ENDPOINT",
                "https://login.microsoftonline.com/consumers/oauth2/v2.0/devicecode",
            ),
            token_endpoint: env_or_default_string(
                "MS_TOKEN_ENDPOINT",
                "https://login.microsoftonline.com/consumers/oauth2/v2.0/token",
            ),
            xbox_auth_endpoint: env_or_default_string(
                "XBOX_AUTH_ENDPOINT",
                "https://user.auth.xboxlive.com/user/authenticate",
            ),
            xsts_auth_endpoint: env_or_default_string(
                "XSTS_AUTH_ENDPOINT",
                "https://xsts.auth.xboxlive.com/xsts/authorize",
            ),
            minecraft_auth_endpoint: env_or_default_string(
                "MINECRAFT_AUTH_ENDPOINT",
                "https://api.minecraftservices.com/authentication/login_with_xbox",
            ),
            minecraft_profile_endpoint: env_or_default_string(
                "MINECRAFT_PROFILE_ENDPOINT",
                "https://api.minecraftservices.com/minecraft/profile",
            ),
            polling_interval: Duration::from_secs(env_or_default("POLLING_INTERVAL_SECS", 5)),
            polling_timeout: Duration::from_secs(env_or_default("POLLING_TIMEOUT_SECS", 900)),
            device_code_wait: Duration::from_secs(env_or_default("DEVICE_CODE_WAIT_SECS", 10)),
        }
    }

    pub fn default() -> Self {
        Self {
            enabled: true,
            client_id: String::new(),
            scope: "XboxLive.signin offline_access".to_string(),
            device_code_endpoint:
                "https://login.microsoftonline.com/consumers/oauth2/v2.0/devicecode".to_string(),
            token_endpoint: "https://login.microsoftonline.com/consumers/oauth2/v2.0/token"
                .to_string(),
            xbox_auth_endpoint: "https://user.auth.xboxlive.com/user/authenticate".to_string(),
            xsts_auth_endpoint: "https://xsts.auth.xboxlive.com/xsts/authorize".to_string(),
            minecraft_auth_endpoint:
                "https://api.minecraftservices.com/authentication/login_with_xbox".to_string(),
            minecraft_profile_endpoint: "https://api.minecraftservices.com/minecraft/profile"
                .to_string(),
            polling_interval: Duration::from_secs(5),
            polling_timeout: Duration::from_secs(900),
            device_code_wait: Duration::from_secs(10),
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
