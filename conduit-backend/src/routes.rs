use crate::AppState;
use crate::chat::{ChatHistoryQuery, SendChatMessage};
use crate::device_flow::DeviceFlowState;
use crate::error::AppError;
use crate::validation;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::TypedHeader;
use axum_macros::debug_handler;
use headers::Authorization;
use headers::authorization::Bearer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub(crate) struct PollRequest {
    device_code: String,
}

#[derive(Deserialize)]
pub(crate) struct CodeRequest {
    code: String,
}

#[derive(Serialize)]
pub(crate) struct BindResponse {
    status: &'static str,
    minecraft_uuid: String,
    minecraft_username: String,
}

#[derive(Serialize)]
pub(crate) struct OAuthConfigResponse {
    enabled: bool,
    client_id: String,
    scope: String,
    polling_interval_secs: u64,
    polling_timeout_secs: u64,
}

#[derive(Serialize)]
pub(crate) struct CatalogEntry {
    id: &'static str,
    name: &'static str,
}

/// Resolve the bearer token to a platform user.
async fn authed_user(
    state: &AppState,
    auth: &Authorization<Bearer>,
) -> Result<conduit_store::User, AppError> {
    let hash = crate::helpers::hash_api_token(auth.token());
    state
        .db
        .user_by_token_hash(hash)
        .await?
        .ok_or(AppError::Unauthorized)
}

#[debug_handler]
pub(crate) async fn start_device_flow(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<impl IntoResponse, AppError> {
    let user = authed_user(&state, &auth).await?;

    let flow: DeviceFlowState = state.auth.start_device_flow(user.user_id).await?;
    Ok((StatusCode::OK, Json(flow)))
}

#[debug_handler]
pub(crate) async fn poll_device_flow(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PollRequest>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_device_code(&payload.device_code)?;

    // Polling always yields a status object once a code was issued; an
    // unknown or evicted code reads as a synthetic EXPIRED state.
    let flow = state.auth.poll_device_flow(&payload.device_code).await;
    Ok((StatusCode::OK, Json(flow)))
}

#[debug_handler]
pub(crate) async fn stash_authorization_code(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(payload): Json<CodeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = authed_user(&state, &auth).await?;
    validation::validate_authorization_code(&payload.code)?;

    state
        .auth
        .stash_authorization_code(user.user_id, payload.code)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

#[debug_handler]
pub(crate) async fn bind_microsoft_account(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<impl IntoResponse, AppError> {
    let user = authed_user(&state, &auth).await?;

    let outcome = state.auth.bind_stashed_code(user.user_id).await?;
    Ok((
        StatusCode::OK,
        Json(BindResponse {
            status: "success",
            minecraft_uuid: outcome.minecraft_uuid,
            minecraft_username: outcome.minecraft_username,
        }),
    ))
}

#[debug_handler]
pub(crate) async fn oauth_config(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let oauth = &state.oauth_config;
    Ok((
        StatusCode::OK,
        Json(OAuthConfigResponse {
            enabled: oauth.enabled,
            client_id: oauth.client_id.clone(),
            scope: oauth.scope.clone(),
            polling_interval_secs: oauth.polling_interval.as_secs(),
            polling_timeout_secs: oauth.polling_timeout.as_secs(),
        }),
    ))
}

#[debug_handler]
pub(crate) async fn send_chat(
    State(state): State<Arc<AppState>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(payload): Json<SendChatMessage>,
) -> Result<impl IntoResponse, AppError> {
    let user = authed_user(&state, &auth).await?;
    validation::validate_server_name(&payload.server_name)?;
    validation::validate_chat_content(&payload.content)?;

    let message = state.chat.send_chat_message(payload, user.user_id).await?;
    Ok((StatusCode::OK, Json(message)))
}

#[debug_handler]
pub(crate) async fn chat_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatHistoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    validation::validate_server_name(&query.server_name)?;

    let history = state.chat.get_chat_history(query).await;
    Ok((StatusCode::OK, Json(history)))
}

#[debug_handler]
pub(crate) async fn chat_channels() -> impl IntoResponse {
    let channels: Vec<CatalogEntry> = crate::chat::channels()
        .into_iter()
        .map(|(id, name)| CatalogEntry { id, name })
        .collect();
    (StatusCode::OK, Json(channels))
}

#[debug_handler]
pub(crate) async fn chat_worlds() -> impl IntoResponse {
    let worlds: Vec<CatalogEntry> = crate::chat::worlds()
        .into_iter()
        .map(|(id, name)| CatalogEntry { id, name })
        .collect();
    (StatusCode::OK, Json(worlds))
}

#[debug_handler]
pub(crate) async fn servers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.registry.all().await;
    (StatusCode::OK, Json(sessions))
}
