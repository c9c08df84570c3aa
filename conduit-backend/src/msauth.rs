//! Microsoft -> Xbox Live -> XSTS -> Minecraft token-exchange chain, plus
//! the background worker that drives a device-code authorization from
//! issuance to a terminal device-flow state.
//!
//! The chain is a strict, ordered pipeline with no retries: each hop
//! consumes the previous hop's output, and the first failure aborts the
//! whole attempt with an error naming the failing hop. No partial binding
//! is ever persisted.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::OAuthConfig;
use crate::device_flow::{DeviceFlowService, DeviceFlowState, DeviceFlowStatus, StatusExtras};
use conduit_store::{Database, DbError, KeyValueStore, StoreError};

/// Single-use authorization codes, keyed by the initiating user.
pub const OAUTH_CODE_KEY_PREFIX: &str = "conduit:oauth:code:";

/// Stashed authorization codes live this long before eviction.
const OAUTH_CODE_TTL: Duration = Duration::from_secs(300);

// =============================================================================
// ERRORS
// =============================================================================

/// The hops of the exchange pipeline, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthHop {
    /// Step 0: device-code issuance
    DeviceCode,
    /// Step 1: authorization -> Microsoft access token
    MicrosoftToken,
    /// Step 2: Microsoft token -> Xbox Live token + user hash
    XboxLive,
    /// Step 3: Xbox Live token -> XSTS token
    Xsts,
    /// Step 4: user hash + XSTS -> Minecraft access token
    MinecraftToken,
    /// Step 5: Minecraft token -> profile
    Profile,
}

impl AuthHop {
    pub fn number(self) -> u8 {
        match self {
            AuthHop::DeviceCode => 0,
            AuthHop::MicrosoftToken => 1,
            AuthHop::XboxLive => 2,
            AuthHop::Xsts => 3,
            AuthHop::MinecraftToken => 4,
            AuthHop::Profile => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AuthHop::DeviceCode => "device code issuance",
            AuthHop::MicrosoftToken => "Microsoft token exchange",
            AuthHop::XboxLive => "Xbox Live authentication",
            AuthHop::Xsts => "XSTS authorization",
            AuthHop::MinecraftToken => "Minecraft authentication",
            AuthHop::Profile => "Minecraft profile lookup",
        }
    }
}

/// A failure at one hop of the chain, attributable precisely.
#[derive(Debug, Error)]
#[error("{} failed (hop {}): {message}", .hop.name(), .hop.number())]
pub struct AuthChainError {
    pub hop: AuthHop,
    pub message: String,
}

impl AuthChainError {
    fn new(hop: AuthHop, message: impl Into<String>) -> Self {
        Self {
            hop,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StartFlowError {
    #[error("Microsoft OAuth is not enabled")]
    Disabled,

    #[error("timed out acquiring a device code")]
    Timeout,

    #[error("device flow worker terminated unexpectedly")]
    WorkerGone,

    #[error(transparent)]
    Chain(#[from] AuthChainError),
}

#[derive(Debug, Error)]
pub enum BindError {
    #[error("authorization code not found or expired")]
    CodeMissing,

    #[error(transparent)]
    Chain(#[from] AuthChainError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// ENDPOINT RESPONSES
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XboxAuthResponse {
    pub token: String,
    pub display_claims: DisplayClaims,
}

#[derive(Debug, Deserialize)]
pub struct DisplayClaims {
    pub xui: Vec<XuiClaim>,
}

#[derive(Debug, Deserialize)]
pub struct XuiClaim {
    pub uhs: String,
}

#[derive(Debug, Deserialize)]
pub struct MinecraftAuthResponse {
    pub access_token: String,
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct MinecraftProfile {
    /// UUID without dashes, as the profile endpoint returns it
    pub id: String,
    pub name: String,
}

/// One device-token poll outcome.
#[derive(Debug)]
pub enum DevicePoll {
    Authorized(OAuthTokenResponse),
    Pending,
    SlowDown,
    Declined,
    Expired,
}

/// Everything the chain yields for a successful bind.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    pub microsoft_access_token: String,
    pub minecraft_uuid: String,
    pub minecraft_username: String,
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

/// Thin client over the fixed identity endpoints.
pub struct MsAuthClient {
    http: reqwest::Client,
    config: OAuthConfig,
}

impl MsAuthClient {
    pub fn new(config: OAuthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Step 0: ask for a device code and user code.
    pub async fn request_device_code(&self) -> Result<DeviceCodeResponse, AuthChainError> {
        let hop = AuthHop::DeviceCode;
        let resp = self
            .http
            .post(&self.config.device_code_endpoint)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthChainError::new(hop, e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AuthChainError::new(
                hop,
                format!("endpoint returned {}", resp.status()),
            ));
        }

        resp.json::<DeviceCodeResponse>()
            .await
            .map_err(|e| AuthChainError::new(hop, e.to_string()))
    }

    /// Poll the token endpoint for the result of a device authorization.
    pub async fn poll_device_token(&self, device_code: &str) -> Result<DevicePoll, AuthChainError> {
        let hop = AuthHop::MicrosoftToken;
        let resp = self
            .http
            .post(&self.config.token_endpoint)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("device_code", device_code),
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
            ])
            .send()
            .await
            .map_err(|e| AuthChainError::new(hop, e.to_string()))?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AuthChainError::new(hop, e.to_string()))?;

        if let Some(error) = body.get("error").and_then(|v| v.as_str()) {
            return match error {
                "authorization_pending" => Ok(DevicePoll::Pending),
                "slow_down" => Ok(DevicePoll::SlowDown),
                "authorization_declined" => Ok(DevicePoll::Declined),
                "expired_token" => Ok(DevicePoll::Expired),
                other => {
                    let description = body
                        .get("error_description")
                        .and_then(|v| v.as_str())
                        .unwrap_or(other);
                    Err(AuthChainError::new(hop, description.to_string()))
                }
            };
        }

        serde_json::from_value::<OAuthTokenResponse>(body)
            .map(DevicePoll::Authorized)
            .map_err(|e| AuthChainError::new(hop, e.to_string()))
    }

    /// Hop 1: exchange an authorization code for Microsoft tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<OAuthTokenResponse, AuthChainError> {
        let hop = AuthHop::MicrosoftToken;
        let resp = self
            .http
            .post(&self.config.token_endpoint)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scope.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AuthChainError::new(hop, e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AuthChainError::new(
                hop,
                format!("endpoint returned {}", resp.status()),
            ));
        }

        resp.json::<OAuthTokenResponse>()
            .await
            .map_err(|e| AuthChainError::new(hop, e.to_string()))
    }

    /// Hop 2: Microsoft access token -> Xbox Live token + user hash.
    pub async fn xbox_live_token(
        &self,
        ms_access_token: &str,
    ) -> Result<(String, String), AuthChainError> {
        let hop = AuthHop::XboxLive;
        let body = serde_json::json!({
            "Properties": {
                "AuthMethod": "RPS",
                "SiteName": "user.auth.xboxlive.com",
                "RpsTicket": format!("d={ms_access_token}"),
            },
            "RelyingParty": "http://auth.xboxlive.com",
            "TokenType": "JWT",
        });

        let resp = self
            .post_xbox(&self.config.xbox_auth_endpoint, &body, hop)
            .await?;

        let user_hash = resp
            .display_claims
            .xui
            .first()
            .map(|claim| claim.uhs.clone())
            .ok_or_else(|| AuthChainError::new(hop, "response carried no display claims"))?;
        Ok((resp.token, user_hash))
    }

    /// Hop 3: Xbox Live token -> XSTS token, scoped to game services.
    pub async fn xsts_token(&self, xbox_token: &str) -> Result<String, AuthChainError> {
        let hop = AuthHop::Xsts;
        let body = serde_json::json!({
            "Properties": {
                "SandboxId": "RETAIL",
                "UserTokens": [xbox_token],
            },
            "RelyingParty": "rp://api.minecraftservices.com/",
            "TokenType": "JWT",
        });

        let resp = self
            .post_xbox(&self.config.xsts_auth_endpoint, &body, hop)
            .await?;
        Ok(resp.token)
    }

    async fn post_xbox(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
        hop: AuthHop,
    ) -> Result<XboxAuthResponse, AuthChainError> {
        let resp = self
            .http
            .post(endpoint)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| AuthChainError::new(hop, e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AuthChainError::new(
                hop,
                format!("endpoint returned {}", resp.status()),
            ));
        }

        resp.json::<XboxAuthResponse>()
            .await
            .map_err(|e| AuthChainError::new(hop, e.to_string()))
    }

    /// Hop 4: user hash + XSTS token -> Minecraft access token.
    pub async fn minecraft_token(
        &self,
        user_hash: &str,
        xsts_token: &str,
    ) -> Result<MinecraftAuthResponse, AuthChainError> {
        let hop = AuthHop::MinecraftToken;
        let body = serde_json::json!({
            "identityToken": format!("XBL3.0 x={user_hash};{xsts_token}"),
        });

        let resp = self
            .http
            .post(&self.config.minecraft_auth_endpoint)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthChainError::new(hop, e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AuthChainError::new(
                hop,
                format!("endpoint returned {}", resp.status()),
            ));
        }

        resp.json::<MinecraftAuthResponse>()
            .await
            .map_err(|e| AuthChainError::new(hop, e.to_string()))
    }

    /// Hop 5: Minecraft access token -> profile.
    pub async fn minecraft_profile(
        &self,
        mc_access_token: &str,
    ) -> Result<MinecraftProfile, AuthChainError> {
        let hop = AuthHop::Profile;
        let resp = self
            .http
            .get(&self.config.minecraft_profile_endpoint)
            .bearer_auth(mc_access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| AuthChainError::new(hop, e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AuthChainError::new(
                hop,
                "no game profile for this Microsoft account",
            ));
        }
        if !resp.status().is_success() {
            return Err(AuthChainError::new(
                hop,
                format!("endpoint returned {}", resp.status()),
            ));
        }

        resp.json::<MinecraftProfile>()
            .await
            .map_err(|e| AuthChainError::new(hop, e.to_string()))
    }

    /// Hops 2-5, from a Microsoft access token to a verified profile.
    pub async fn complete_chain(
        &self,
        ms_access_token: &str,
    ) -> Result<ChainOutcome, AuthChainError> {
        let (xbox_token, user_hash) = self.xbox_live_token(ms_access_token).await?;
        let xsts_token = self.xsts_token(&xbox_token).await?;
        let mc_token = self.minecraft_token(&user_hash, &xsts_token).await?;
        let profile = self.minecraft_profile(&mc_token.access_token).await?;

        Ok(ChainOutcome {
            microsoft_access_token: ms_access_token.to_string(),
            minecraft_uuid: profile.id,
            minecraft_username: profile.name,
        })
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// Orchestrates device flows and code binds on top of the client.
pub struct MinecraftAuthService {
    client: MsAuthClient,
    flows: DeviceFlowService,
    db: Database,
    store: Arc<dyn KeyValueStore>,
    config: OAuthConfig,
}

impl MinecraftAuthService {
    pub fn new(
        config: OAuthConfig,
        store: Arc<dyn KeyValueStore>,
        db: Database,
    ) -> Arc<Self> {
        Arc::new(Self {
            client: MsAuthClient::new(config.clone()),
            flows: DeviceFlowService::new(
                store.clone(),
                config.polling_timeout,
                config.polling_interval,
            ),
            db,
            store,
            config,
        })
    }

    /// Start a device flow for a user.
    ///
    /// A background worker requests the device code and hands it back over a
    /// single-resolution channel; this caller waits a bounded 10 seconds and
    /// then fails with a timeout while the worker carries on. Everything the
    /// worker does afterwards is visible only through the persisted state.
    pub async fn start_device_flow(
        self: &Arc<Self>,
        user_id: i64,
    ) -> Result<DeviceFlowState, StartFlowError> {
        if !self.config.enabled {
            return Err(StartFlowError::Disabled);
        }

        let (bridge_tx, bridge_rx) = oneshot::channel();
        let service = Arc::clone(self);
        tokio::spawn(async move {
            service.run_device_flow(user_id, bridge_tx).await;
        });

        match timeout(self.config.device_code_wait, bridge_rx).await {
            Ok(Ok(result)) => Ok(result?),
            // The worker dropped its sender without resolving; treat the
            // flow as failed to start.
            Ok(Err(_)) => Err(StartFlowError::WorkerGone),
            Err(_) => Err(StartFlowError::Timeout),
        }
    }

    /// Poll a device flow. Always yields a status object, never an error,
    /// once a code was issued; unknown codes read as synthetic EXPIRED.
    pub async fn poll_device_flow(&self, device_code: &str) -> DeviceFlowState {
        self.flows.get(device_code).await
    }

    /// Stash an authorization code for the user, single-use, short TTL.
    pub async fn stash_authorization_code(
        &self,
        user_id: i64,
        code: String,
    ) -> Result<(), BindError> {
        let key = format!("{OAUTH_CODE_KEY_PREFIX}{user_id}");
        self.store.put(&key, code, Some(OAUTH_CODE_TTL)).await?;
        Ok(())
    }

    /// Run the bind chain from the stashed code. The code is deleted on
    /// first read, so invoking bind twice cannot replay the exchange.
    pub async fn bind_stashed_code(&self, user_id: i64) -> Result<ChainOutcome, BindError> {
        let key = format!("{OAUTH_CODE_KEY_PREFIX}{user_id}");
        let code = self
            .store
            .take(&key)
            .await?
            .ok_or(BindError::CodeMissing)?;

        let tokens = self.client.exchange_code(&code).await?;
        let outcome = self.client.complete_chain(&tokens.access_token).await?;

        self.db
            .bind_minecraft_account(
                user_id,
                outcome.minecraft_uuid.clone(),
                outcome.minecraft_username.clone(),
            )
            .await?;

        info!(user_id, minecraft_username = %outcome.minecraft_username, "bound game account via code exchange");
        Ok(outcome)
    }

    /// Background worker: issue the device code, resolve the bridge, then
    /// follow the user's out-of-band authorization to a terminal state.
    async fn run_device_flow(
        &self,
        user_id: i64,
        bridge: oneshot::Sender<Result<DeviceFlowState, AuthChainError>>,
    ) {
        let device = match self.client.request_device_code().await {
            Ok(device) => device,
            Err(e) => {
                error!(error = %e, "device code request failed");
                let _ = bridge.send(Err(e));
                return;
            }
        };

        let complete_uri = device.verification_uri_complete.clone().unwrap_or_else(|| {
            format!("{}?user_code={}", device.verification_uri, device.user_code)
        });
        let state = match self
            .flows
            .create(
                device.user_code.clone(),
                device.device_code.clone(),
                device.verification_uri.clone(),
                complete_uri,
                Some(user_id),
            )
            .await
        {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "failed to persist device flow state");
                let _ = bridge.send(Err(AuthChainError::new(
                    AuthHop::DeviceCode,
                    e.to_string(),
                )));
                return;
            }
        };

        // The oneshot can resolve exactly once; sending consumes it. A
        // failed send only means the caller stopped waiting.
        if bridge.send(Ok(state)).is_err() {
            warn!(device_code = %device.device_code, "caller gave up waiting; authorization continues in the background");
        }

        self.drive_authorization(user_id, device).await;
    }

    /// Poll the token endpoint until the user authorizes, declines, or the
    /// flow times out, then run the chain and record the terminal state.
    async fn drive_authorization(&self, user_id: i64, device: DeviceCodeResponse) {
        let device_code = device.device_code.as_str();
        let deadline = tokio::time::Instant::now() + self.config.polling_timeout;
        let mut interval = Duration::from_secs(
            device
                .interval
                .unwrap_or(self.config.polling_interval.as_secs())
                .max(1),
        );

        loop {
            tokio::time::sleep(interval).await;
            if tokio::time::Instant::now() >= deadline {
                self.finish(device_code, DeviceFlowStatus::Expired, StatusExtras::default())
                    .await;
                return;
            }

            match self.client.poll_device_token(device_code).await {
                Ok(DevicePoll::Pending) => continue,
                Ok(DevicePoll::SlowDown) => {
                    interval += Duration::from_secs(5);
                    continue;
                }
                Ok(DevicePoll::Declined) => {
                    self.finish(device_code, DeviceFlowStatus::Denied, StatusExtras::default())
                        .await;
                    return;
                }
                Ok(DevicePoll::Expired) => {
                    self.finish(device_code, DeviceFlowStatus::Expired, StatusExtras::default())
                        .await;
                    return;
                }
                Ok(DevicePoll::Authorized(tokens)) => {
                    let _ = self
                        .flows
                        .update_status(
                            device_code,
                            DeviceFlowStatus::Authorized,
                            StatusExtras::default(),
                        )
                        .await;
                    let _ = self
                        .flows
                        .update_status(
                            device_code,
                            DeviceFlowStatus::Processing,
                            StatusExtras::default(),
                        )
                        .await;
                    self.complete_bind(user_id, device_code, tokens).await;
                    return;
                }
                Err(e) => {
                    error!(device_code, error = %e, "device token poll failed");
                    self.finish(
                        device_code,
                        DeviceFlowStatus::Error,
                        StatusExtras {
                            error_message: Some(e.to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                    return;
                }
            }
        }
    }

    /// Hops 2-5 plus the binding write. Any hop failure lands in ERROR with
    /// a hop-tagged message; no partial binding is persisted.
    async fn complete_bind(&self, user_id: i64, device_code: &str, tokens: OAuthTokenResponse) {
        let outcome = match self.client.complete_chain(&tokens.access_token).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(device_code, error = %e, "token-exchange chain failed");
                self.finish(
                    device_code,
                    DeviceFlowStatus::Error,
                    StatusExtras {
                        error_message: Some(e.to_string()),
                        ..Default::default()
                    },
                )
                .await;
                return;
            }
        };

        if let Err(e) = self
            .db
            .bind_minecraft_account(
                user_id,
                outcome.minecraft_uuid.clone(),
                outcome.minecraft_username.clone(),
            )
            .await
        {
            error!(device_code, error = %e, "failed to persist game-account binding");
            self.finish(
                device_code,
                DeviceFlowStatus::Error,
                StatusExtras {
                    error_message: Some(e.to_string()),
                    ..Default::default()
                },
            )
            .await;
            return;
        }

        self.finish(
            device_code,
            DeviceFlowStatus::Completed,
            StatusExtras {
                microsoft_access_token: Some(outcome.microsoft_access_token),
                minecraft_uuid: Some(outcome.minecraft_uuid),
                minecraft_username: Some(outcome.minecraft_username),
                ..Default::default()
            },
        )
        .await;
        info!(device_code, user_id, "device flow completed");
    }

    async fn finish(&self, device_code: &str, status: DeviceFlowStatus, extras: StatusExtras) {
        if self
            .flows
            .update_status(device_code, status, extras)
            .await
            .is_none()
        {
            warn!(device_code, ?status, "terminal state lost: device flow state missing");
        }
    }
}
