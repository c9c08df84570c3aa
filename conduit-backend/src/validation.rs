/// Input validation functions for all backend routes
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    #[error("Server name cannot be empty")]
    ServerNameEmpty,

    #[error("Server name too long (max 100 characters, got {0})")]
    ServerNameTooLong(usize),

    #[error("Chat message cannot be empty")]
    ChatContentEmpty,

    #[error("Chat message too long (max 256 characters, got {0})")]
    ChatContentTooLong(usize),

    #[error("Device code cannot be empty")]
    DeviceCodeEmpty,

    #[error("Authorization code cannot be empty")]
    AuthorizationCodeEmpty,
}

/// Validates a server name
///
/// Rules:
/// - Cannot be empty
/// - Max 100 characters
pub fn validate_server_name(name: &str) -> Result<(), InputError> {
    if name.is_empty() {
        return Err(InputError::ServerNameEmpty);
    }

    if name.len() > 100 {
        return Err(InputError::ServerNameTooLong(name.len()));
    }

    Ok(())
}

/// Validates web chat content before it is relayed into the game
pub fn validate_chat_content(content: &str) -> Result<(), InputError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(InputError::ChatContentEmpty);
    }

    if trimmed.chars().count() > 256 {
        return Err(InputError::ChatContentTooLong(trimmed.chars().count()));
    }

    Ok(())
}

/// Validates a device code carried by a polling request
pub fn validate_device_code(code: &str) -> Result<(), InputError> {
    if code.trim().is_empty() {
        return Err(InputError::DeviceCodeEmpty);
    }
    Ok(())
}

/// Validates an authorization code for the bind endpoint
pub fn validate_authorization_code(code: &str) -> Result<(), InputError> {
    if code.trim().is_empty() {
        return Err(InputError::AuthorizationCodeEmpty);
    }
    Ok(())
}
