use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: None,
    }
  }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
  Database(conduit_store::DbError),
  Store(conduit_store::StoreError),
  Validation(String),
  Unauthorized,
  NoBinding,
  AuthChain(crate::msauth::AuthChainError),
  CodeMissing,
  DeviceCodeTimeout,
  OAuthDisabled,
  Internal(String),
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let (status, message) = match self {
      AppError::Database(db_err) => {
        // Log the detailed error server-side
        tracing::error!(?db_err, "Database error occurred");

        match db_err {
          conduit_store::DbError::UserNotFound => (StatusCode::NOT_FOUND, "User not found".to_string()),
          conduit_store::DbError::UserConflict => {
            (StatusCode::CONFLICT, "User already exists".to_string())
          }
          conduit_store::DbError::ServerTokenNotFound => {
            (StatusCode::NOT_FOUND, "Server token not found".to_string())
          }
          conduit_store::DbError::ServerTokenConflict => {
            (StatusCode::CONFLICT, "Server token already exists".to_string())
          }
          conduit_store::DbError::PlayerNameTooLong => (
            StatusCode::BAD_REQUEST,
            "Minecraft username exceeds 16 characters".to_string(),
          ),
          conduit_store::DbError::Sqlite(_) | conduit_store::DbError::Connection(_) => {
            // Don't expose internal database errors
            (
              StatusCode::INTERNAL_SERVER_ERROR,
              "An internal error occurred. Please try again later.".to_string(),
            )
          }
        }
      }
      AppError::Store(store_err) => {
        tracing::error!(?store_err, "Keyed store error occurred");
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          "An internal error occurred. Please try again later.".to_string(),
        )
      }
      AppError::Validation(msg) => {
        tracing::warn!(validation_error = %msg, "Validation failed");
        (StatusCode::BAD_REQUEST, msg)
      }
      AppError::Unauthorized => (
        StatusCode::UNAUTHORIZED,
        "Invalid or missing API token".to_string(),
      ),
      AppError::NoBinding => (
        StatusCode::FORBIDDEN,
        "User has no verified game-account binding".to_string(),
      ),
      AppError::AuthChain(chain_err) => {
        tracing::error!(%chain_err, "Token-exchange chain failed");
        // The message names the failing hop, so the caller can tell an
        // Xbox Live failure from a missing game profile.
        (StatusCode::BAD_GATEWAY, chain_err.to_string())
      }
      AppError::CodeMissing => (
        StatusCode::NOT_FOUND,
        "Authorization code not found or expired".to_string(),
      ),
      AppError::DeviceCodeTimeout => (
        StatusCode::GATEWAY_TIMEOUT,
        "Timed out acquiring a device code".to_string(),
      ),
      AppError::OAuthDisabled => (
        StatusCode::SERVICE_UNAVAILABLE,
        "Microsoft OAuth is not enabled".to_string(),
      ),
      AppError::Internal(msg) => {
        tracing::error!(%msg, "Internal error occurred");
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          "An internal error occurred. Please try again later.".to_string(),
        )
      }
    };

    (status, Json(ErrorResponse::new(message))).into_response()
  }
}

impl From<conduit_store::DbError> for AppError {
  fn from(err: conduit_store::DbError) -> Self {
    AppError::Database(err)
  }
}

impl From<conduit_store::StoreError> for AppError {
  fn from(err: conduit_store::StoreError) -> Self {
    AppError::Store(err)
  }
}

impl From<crate::validation::InputError> for AppError {
  fn from(err: crate::validation::InputError) -> Self {
    AppError::Validation(err.to_string())
  }
}

impl From<crate::protocol::ValidationError> for AppError {
  fn from(err: crate::protocol::ValidationError) -> Self {
    AppError::Validation(err.to_string())
  }
}

impl From<crate::chat::ChatError> for AppError {
  fn from(err: crate::chat::ChatError) -> Self {
    match err {
      crate::chat::ChatError::NoBinding => AppError::NoBinding,
      crate::chat::ChatError::Db(db_err) => AppError::Database(db_err),
    }
  }
}

impl From<crate::msauth::StartFlowError> for AppError {
  fn from(err: crate::msauth::StartFlowError) -> Self {
    match err {
      crate::msauth::StartFlowError::Disabled => AppError::OAuthDisabled,
      crate::msauth::StartFlowError::Timeout => AppError::DeviceCodeTimeout,
      crate::msauth::StartFlowError::WorkerGone => {
        AppError::Internal("device flow worker terminated unexpectedly".to_string())
      }
      crate::msauth::StartFlowError::Chain(chain_err) => AppError::AuthChain(chain_err),
    }
  }
}

impl From<crate::msauth::BindError> for AppError {
  fn from(err: crate::msauth::BindError) -> Self {
    match err {
      crate::msauth::BindError::CodeMissing => AppError::CodeMissing,
      crate::msauth::BindError::Chain(chain_err) => AppError::AuthChain(chain_err),
      crate::msauth::BindError::Db(db_err) => AppError::Database(db_err),
      crate::msauth::BindError::Store(store_err) => AppError::Store(store_err),
    }
  }
}
