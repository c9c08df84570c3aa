//! Device-flow state machine: the persisted, TTL-bound lifecycle of an
//! in-progress device-code authorization.
//!
//! One state per device code, stored as JSON in the keyed store. Status
//! moves monotonically toward a terminal state; the only transition taken
//! without an explicit writer is the lazy PENDING -> EXPIRED flip observed
//! on read.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::helpers::now;
use conduit_store::KeyValueStore;

pub const DEVICE_FLOW_KEY_PREFIX: &str = "conduit:device:flow:";

/// Grace window after a terminal status so a client mid-poll can still
/// retrieve the final result before eviction.
const TERMINAL_GRACE_SECS: i64 = 300;

/// Persisted-TTL floor, tolerating clock skew between writer instances.
const MIN_PERSIST_TTL_SECS: i64 = 30;

#[derive(Debug, Error)]
pub enum DeviceFlowError {
    #[error(transparent)]
    Store(#[from] conduit_store::StoreError),

    #[error("failed to encode device-flow state: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceFlowStatus {
    /// Waiting for the user to authorize on the secondary device
    Pending,
    /// User authorized, token exchange not yet started
    Authorized,
    /// Token-exchange chain in progress
    Processing,
    Completed,
    Expired,
    Denied,
    Error,
}

impl DeviceFlowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeviceFlowStatus::Completed
                | DeviceFlowStatus::Expired
                | DeviceFlowStatus::Denied
                | DeviceFlowStatus::Error
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            DeviceFlowStatus::Pending => "waiting for user authorization",
            DeviceFlowStatus::Authorized => "user authorized",
            DeviceFlowStatus::Processing => "exchanging tokens",
            DeviceFlowStatus::Completed => "authentication successful",
            DeviceFlowStatus::Expired => "device code expired",
            DeviceFlowStatus::Denied => "user declined authorization",
            DeviceFlowStatus::Error => "authentication error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFlowState {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub status: DeviceFlowStatus,
    pub status_description: String,
    /// Unix timestamps, seconds
    pub created_at: i64,
    pub expires_at: i64,
    /// Suggested polling interval, seconds
    pub interval: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub microsoft_access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minecraft_uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minecraft_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub terminal: bool,
    /// Seconds until expiry, recomputed on every read
    pub time_remaining: i64,
}

impl DeviceFlowState {
    /// The single expiry predicate; nothing else compares against the clock.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    fn set_status(&mut self, status: DeviceFlowStatus) {
        self.status = status;
        self.status_description = status.description().to_string();
        self.terminal = status.is_terminal();
    }

    fn refresh(&mut self, now: i64) {
        self.time_remaining = (self.expires_at - now).max(0);
        self.terminal = self.status.is_terminal();
    }

    /// The stand-in returned when a code is unknown or already evicted;
    /// polling such a code is not an exceptional condition to the caller.
    fn not_found(device_code: String) -> Self {
        Self {
            device_code,
            user_code: String::new(),
            verification_uri: String::new(),
            verification_uri_complete: String::new(),
            status: DeviceFlowStatus::Expired,
            status_description: "device flow not found or expired".to_string(),
            created_at: 0,
            expires_at: 0,
            interval: 0,
            user_id: None,
            microsoft_access_token: None,
            minecraft_uuid: None,
            minecraft_username: None,
            error_message: None,
            terminal: true,
            time_remaining: 0,
        }
    }
}

/// Extra fields written together with a status change.
#[derive(Debug, Default)]
pub struct StatusExtras {
    pub microsoft_access_token: Option<String>,
    pub minecraft_uuid: Option<String>,
    pub minecraft_username: Option<String>,
    pub error_message: Option<String>,
}

/// Device-flow states in the keyed store.
pub struct DeviceFlowService {
    store: Arc<dyn KeyValueStore>,
    polling_timeout: Duration,
    polling_interval: Duration,
}

impl DeviceFlowService {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        polling_timeout: Duration,
        polling_interval: Duration,
    ) -> Self {
        Self {
            store,
            polling_timeout,
            polling_interval,
        }
    }

    fn key(device_code: &str) -> String {
        format!("{DEVICE_FLOW_KEY_PREFIX}{device_code}")
    }

    /// Initialize a PENDING state for a freshly issued device code.
    pub async fn create(
        &self,
        user_code: String,
        device_code: String,
        verification_uri: String,
        verification_uri_complete: String,
        user_id: Option<i64>,
    ) -> Result<DeviceFlowState, DeviceFlowError> {
        let created_at = now();
        let mut state = DeviceFlowState {
            device_code,
            user_code,
            verification_uri,
            verification_uri_complete,
            status: DeviceFlowStatus::Pending,
            status_description: DeviceFlowStatus::Pending.description().to_string(),
            created_at,
            expires_at: created_at + self.polling_timeout.as_secs() as i64,
            interval: self.polling_interval.as_secs(),
            user_id,
            microsoft_access_token: None,
            minecraft_uuid: None,
            minecraft_username: None,
            error_message: None,
            terminal: false,
            time_remaining: 0,
        };
        state.refresh(created_at);

        self.save(&state).await?;
        info!(device_code = %state.device_code, user_code = %state.user_code, "created device flow state");
        Ok(state)
    }

    /// Persist with a TTL equal to the remaining seconds, floored at 30.
    pub async fn save(&self, state: &DeviceFlowState) -> Result<(), DeviceFlowError> {
        let json = serde_json::to_string(state)?;
        let remaining = state.expires_at - now();
        if remaining <= 0 {
            warn!(device_code = %state.device_code, "persisting already-expired device flow state");
        }
        let ttl = remaining.max(MIN_PERSIST_TTL_SECS) as u64;
        self.store
            .put(&Self::key(&state.device_code), json, Some(Duration::from_secs(ttl)))
            .await?;
        Ok(())
    }

    /// Load a state. An absent key yields a synthetic EXPIRED state; a state
    /// past its expiry is lazily flipped to EXPIRED and persisted, so expiry
    /// is observable on read without any explicit writer.
    pub async fn get(&self, device_code: &str) -> DeviceFlowState {
        let raw = match self.store.get(&Self::key(device_code)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(device_code, error = %e, "failed to read device flow state");
                return DeviceFlowState::not_found(device_code.to_string());
            }
        };

        let Some(json) = raw else {
            return DeviceFlowState::not_found(device_code.to_string());
        };

        let mut state: DeviceFlowState = match serde_json::from_str(&json) {
            Ok(state) => state,
            Err(e) => {
                warn!(device_code, error = %e, "malformed device flow state");
                return DeviceFlowState::not_found(device_code.to_string());
            }
        };

        let now = now();
        if state.is_expired(now) && state.status != DeviceFlowStatus::Expired {
            state.set_status(DeviceFlowStatus::Expired);
            if let Err(e) = self.save(&state).await {
                warn!(device_code, error = %e, "failed to persist lazy expiry");
            }
        }

        state.refresh(now);
        state
    }

    /// Load-mutate-save. A terminal status shortens the lifetime to a fixed
    /// grace window so a client mid-poll can still read the result.
    pub async fn update_status(
        &self,
        device_code: &str,
        new_status: DeviceFlowStatus,
        extras: StatusExtras,
    ) -> Option<DeviceFlowState> {
        let mut state = self.get(device_code).await;
        if state.created_at == 0 {
            warn!(device_code, "cannot update unknown device flow state");
            return None;
        }

        state.set_status(new_status);
        if let Some(token) = extras.microsoft_access_token {
            state.microsoft_access_token = Some(token);
        }
        if let Some(uuid) = extras.minecraft_uuid {
            state.minecraft_uuid = Some(uuid);
        }
        if let Some(name) = extras.minecraft_username {
            state.minecraft_username = Some(name);
        }
        if let Some(message) = extras.error_message {
            state.error_message = Some(message);
        }

        let now = now();
        if new_status.is_terminal() {
            state.expires_at = now + TERMINAL_GRACE_SECS;
        }
        state.refresh(now);

        if let Err(e) = self.save(&state).await {
            warn!(device_code, error = %e, "failed to persist status update");
            return None;
        }

        info!(device_code, ?new_status, "updated device flow state");
        Some(state)
    }

    /// Drop a state outright (administrative cleanup).
    pub async fn delete(&self, device_code: &str) -> bool {
        match self.store.delete(&Self::key(device_code)).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(device_code, error = %e, "failed to delete device flow state");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_store::MemoryStore;

    fn service() -> DeviceFlowService {
        DeviceFlowService::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(900),
            Duration::from_secs(5),
        )
    }

    async fn created(service: &DeviceFlowService) -> DeviceFlowState {
        service
            .create(
                "ABCD-1234".to_string(),
                "device-code-1".to_string(),
                "https://microsoft.com/devicelogin".to_string(),
                "https://microsoft.com/devicelogin?user_code=ABCD-1234".to_string(),
                Some(7),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_yields_pending_with_full_window() {
        let service = service();
        let state = created(&service).await;

        assert_eq!(state.status, DeviceFlowStatus::Pending);
        assert!(!state.terminal);
        assert_eq!(state.interval, 5);
        // Immediately after create the clock has barely moved.
        assert!((898..=900).contains(&state.time_remaining));

        let polled = service.get("device-code-1").await;
        assert_eq!(polled.status, DeviceFlowStatus::Pending);
        assert_eq!(polled.user_id, Some(7));
    }

    #[tokio::test]
    async fn test_unknown_code_reads_as_synthetic_expired() {
        let service = service();
        let state = service.get("never-issued").await;

        assert_eq!(state.status, DeviceFlowStatus::Expired);
        assert!(state.terminal);
        assert_eq!(state.time_remaining, 0);
        assert_eq!(state.device_code, "never-issued");
    }

    #[tokio::test]
    async fn test_lazy_expiry_on_read() {
        let service = service();
        let mut state = created(&service).await;

        // Simulate 901 seconds elapsing by rewinding the deadline.
        state.expires_at = now() - 1;
        service.save(&state).await.unwrap();

        let polled = service.get("device-code-1").await;
        assert_eq!(polled.status, DeviceFlowStatus::Expired);
        assert!(polled.terminal);
        assert_eq!(polled.time_remaining, 0);

        // And it stays expired on subsequent reads.
        let again = service.get("device-code-1").await;
        assert_eq!(again.status, DeviceFlowStatus::Expired);
    }

    #[tokio::test]
    async fn test_terminal_status_never_reverts() {
        let service = service();
        created(&service).await;

        let updated = service
            .update_status("device-code-1", DeviceFlowStatus::Expired, StatusExtras::default())
            .await
            .unwrap();
        assert!(updated.terminal);

        let polled = service.get("device-code-1").await;
        assert_eq!(polled.status, DeviceFlowStatus::Expired);
        assert!(polled.terminal);
    }

    #[tokio::test]
    async fn test_terminal_update_shortens_to_grace_window() {
        let service = service();
        created(&service).await;

        let updated = service
            .update_status(
                "device-code-1",
                DeviceFlowStatus::Completed,
                StatusExtras {
                    minecraft_uuid: Some("069a79f4".to_string()),
                    minecraft_username: Some("Steve".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.status, DeviceFlowStatus::Completed);
        assert!(updated.time_remaining <= TERMINAL_GRACE_SECS);
        assert_eq!(updated.minecraft_username.as_deref(), Some("Steve"));

        let polled = service.get("device-code-1").await;
        assert_eq!(polled.minecraft_uuid.as_deref(), Some("069a79f4"));
    }

    #[tokio::test]
    async fn test_update_unknown_code_returns_none() {
        let service = service();
        let updated = service
            .update_status("missing", DeviceFlowStatus::Completed, StatusExtras::default())
            .await;
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn test_status_progression() {
        let service = service();
        created(&service).await;

        for status in [
            DeviceFlowStatus::Authorized,
            DeviceFlowStatus::Processing,
            DeviceFlowStatus::Completed,
        ] {
            let state = service
                .update_status("device-code-1", status, StatusExtras::default())
                .await
                .unwrap();
            assert_eq!(state.status, status);
            assert_eq!(state.terminal, status.is_terminal());
        }
    }
}
