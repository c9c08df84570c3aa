//! Session registry: tracks live game-server connections keyed by session id.
//!
//! The primary source is live packets (login + heartbeat + server info). A
//! fallback path reconstructs sessions from the keyed store when no live
//! packets have arrived, and a small fixed set of placeholder offline
//! sessions is returned when both sources are empty so callers never see an
//! empty list as an error state.

use std::sync::Arc;
use std::time::Duration;

use scc::HashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::helpers::now;
use crate::protocol::{PluginInfo, ServerInfoPacket};
use conduit_store::KeyValueStore;

/// JSON snapshot per live session, the fallback read path.
pub const SERVER_STATUS_KEY_PREFIX: &str = "conduit:server:status:";

/// Set of live session ids, keys the snapshot reads.
pub const ACTIVE_SESSIONS_KEY: &str = "conduit:server:active:sessions";

/// A live game-server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSession {
    pub session_id: String,
    pub server_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motd: Option<String>,
    pub online_players: u32,
    pub max_players: u32,
    pub tps: f64,
    /// Memory figures in megabytes
    pub ram_usage: u64,
    pub max_ram: u64,
    #[serde(default)]
    pub plugin_list: Vec<PluginInfo>,
    /// Unix timestamps, seconds
    pub login_time: i64,
    pub last_active_time: i64,
    pub online: bool,
    /// Login credential; never serialized into snapshots or responses.
    #[serde(skip, default)]
    pub token: String,
}

impl ServerSession {
    fn is_stale(&self, now: i64, ttl_secs: i64) -> bool {
        now - self.last_active_time > ttl_secs
    }
}

/// Registry of live sessions plus the snapshot fallback.
pub struct SessionRegistry {
    sessions: HashMap<String, ServerSession>,
    /// Token -> session id, for single-connection eviction
    token_index: HashMap<String, String>,
    store: Arc<dyn KeyValueStore>,
    session_ttl_secs: i64,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, session_ttl: Duration) -> Self {
        Self {
            sessions: HashMap::new(),
            token_index: HashMap::new(),
            store,
            session_ttl_secs: session_ttl.as_secs() as i64,
        }
    }

    /// Register a connection from a verified login packet.
    ///
    /// One live session per token: a re-login with the same token evicts the
    /// previous session before the new one is registered.
    pub async fn register(
        &self,
        token: String,
        server_name: String,
        server_version: String,
        login_ip: Option<String>,
        port: Option<u16>,
    ) -> ServerSession {
        if let Some((_, old_session_id)) = self.token_index.remove_async(&token).await {
            if self.sessions.remove_async(&old_session_id).await.is_some() {
                warn!(session_id = %old_session_id, "evicted previous session for re-logging token");
                self.forget_snapshot(&old_session_id).await;
            }
        }

        let session = ServerSession {
            session_id: Uuid::new_v4().to_string(),
            server_name,
            server_version: Some(server_version),
            login_ip,
            port,
            motd: None,
            online_players: 0,
            max_players: 0,
            tps: 20.0,
            ram_usage: 0,
            max_ram: 0,
            plugin_list: Vec::new(),
            login_time: now(),
            last_active_time: now(),
            online: true,
            token: token.clone(),
        };

        let _ = self
            .sessions
            .insert_async(session.session_id.clone(), session.clone())
            .await;
        let _ = self
            .token_index
            .insert_async(token, session.session_id.clone())
            .await;

        info!(server_name = %session.server_name, session_id = %session.session_id, "game server registered");
        session
    }

    /// Refresh a session from a heartbeat. Returns false for unknown ids.
    pub async fn heartbeat(&self, session_id: &str) -> bool {
        self.sessions
            .update_async(session_id, |_, session| {
                session.last_active_time = now();
            })
            .await
            .is_some()
    }

    /// Merge a server-info packet into the session and write the snapshot
    /// the fallback path reads.
    pub async fn update_info(&self, info: &ServerInfoPacket) -> bool {
        let updated = self
            .sessions
            .update_async(info.session_id.as_str(), |_, session| {
                session.server_name = info.server_name.clone();
                session.motd = info.motd.clone();
                session.online_players = info.online_players;
                session.max_players = info.max_players;
                session.tps = info.tps;
                session.ram_usage = info.ram_usage;
                session.max_ram = info.max_ram;
                session.plugin_list = info.plugin_list.clone();
                session.last_active_time = now();
                session.clone()
            })
            .await;

        match updated {
            Some(session) => {
                self.write_snapshot(&session).await;
                true
            }
            None => {
                warn!(session_id = %info.session_id, "server info for unknown session");
                false
            }
        }
    }

    /// Remove a session on disconnect.
    pub async fn remove(&self, session_id: &str) -> Option<ServerSession> {
        let removed = self.sessions.remove_async(session_id).await.map(|(_, s)| s);
        if let Some(session) = &removed {
            let _ = self.token_index.remove_async(&session.token).await;
            self.forget_snapshot(session_id).await;
            info!(server_name = %session.server_name, session_id, "game server disconnected");
        }
        removed
    }

    pub async fn get(&self, session_id: &str) -> Option<ServerSession> {
        self.sessions
            .read_async(session_id, |_, session| session.clone())
            .await
    }

    /// All live sessions; stale ones are evicted on the way out.
    pub async fn live(&self) -> Vec<ServerSession> {
        let now = now();
        let ttl = self.session_ttl_secs;

        let mut sessions = Vec::new();
        let mut stale = Vec::new();
        self.sessions
            .iter_async(|_, session| {
                if session.is_stale(now, ttl) {
                    stale.push(session.session_id.clone());
                } else {
                    sessions.push(session.clone());
                }
                true
            })
            .await;

        for session_id in stale {
            debug!(session_id = %session_id, "evicting stale session");
            self.remove(&session_id).await;
        }

        sessions.sort_by(|a, b| a.server_name.cmp(&b.server_name));
        sessions
    }

    /// Sessions for callers: live map first, store snapshots second,
    /// placeholder offline sessions when both are empty.
    pub async fn all(&self) -> Vec<ServerSession> {
        let live = self.live().await;
        if !live.is_empty() {
            return live;
        }

        let fallback = self.from_store().await;
        if !fallback.is_empty() {
            return fallback;
        }

        Self::offline_placeholders()
    }

    /// Reconstruct sessions from the store, keyed by the active-session set.
    async fn from_store(&self) -> Vec<ServerSession> {
        let ids = match self.store.set_members(ACTIVE_SESSIONS_KEY).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "failed to read active session set");
                return Vec::new();
            }
        };

        let mut sessions = Vec::new();
        for session_id in ids {
            let key = format!("{SERVER_STATUS_KEY_PREFIX}{session_id}");
            match self.store.get(&key).await {
                Ok(Some(json)) => match serde_json::from_str::<ServerSession>(&json) {
                    Ok(mut session) => {
                        session.session_id = session_id;
                        sessions.push(session);
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "skipping malformed session snapshot");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "failed to read session snapshot");
                }
            }
        }

        sessions.sort_by(|a, b| a.server_name.cmp(&b.server_name));
        sessions
    }

    /// Fixed offline set returned when nothing else is known.
    fn offline_placeholders() -> Vec<ServerSession> {
        ["main-server", "test-server", "creative-server"]
            .into_iter()
            .map(|name| ServerSession {
                session_id: name.to_string(),
                server_name: name.to_string(),
                server_version: None,
                login_ip: None,
                port: None,
                motd: None,
                online_players: 0,
                max_players: 50,
                tps: 20.0,
                ram_usage: 0,
                max_ram: 0,
                plugin_list: Vec::new(),
                login_time: 0,
                last_active_time: now(),
                online: false,
                token: String::new(),
            })
            .collect()
    }

    /// Best-effort snapshot write-through; failures are logged and swallowed.
    async fn write_snapshot(&self, session: &ServerSession) {
        let key = format!("{SERVER_STATUS_KEY_PREFIX}{}", session.session_id);
        let json = match serde_json::to_string(session) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize session snapshot");
                return;
            }
        };
        if let Err(e) = self.store.put(&key, json, None).await {
            warn!(error = %e, "failed to write session snapshot");
        }
        if let Err(e) = self
            .store
            .set_add(ACTIVE_SESSIONS_KEY, &session.session_id)
            .await
        {
            warn!(error = %e, "failed to update active session set");
        }
    }

    async fn forget_snapshot(&self, session_id: &str) {
        let key = format!("{SERVER_STATUS_KEY_PREFIX}{session_id}");
        if let Err(e) = self.store.delete(&key).await {
            warn!(error = %e, "failed to delete session snapshot");
        }
        if let Err(e) = self.store.set_remove(ACTIVE_SESSIONS_KEY, session_id).await {
            warn!(error = %e, "failed to shrink active session set");
        }
    }
}
