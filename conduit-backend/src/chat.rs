//! Chat relay: bidirectional chat bridging between the web platform and
//! game servers, with a bounded shared history.
//!
//! Delivery is at-most-once by design. Only the binding precondition is
//! surfaced to the caller; command publish, history append and broadcast
//! failures are logged and swallowed.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::MessageBus;
use crate::helpers::avatar_url;
use crate::protocol::{
    AdminCommandPacket, ChatMessage, ChatPlayer, ChatSource, CommandType, PacketHeader,
};
use conduit_store::{Database, DbError, KeyValueStore};

/// Bounded shared history list.
pub const CHAT_HISTORY_KEY: &str = "conduit:chat:history";

/// History is a FIFO of at most this many entries.
pub const MAX_HISTORY_SIZE: usize = 500;

const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The only failure surfaced to callers of `send_chat_message`.
    #[error("user has no verified game-account binding")]
    NoBinding,

    #[error(transparent)]
    Db(#[from] DbError),
}

/// A web chat submission.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChatMessage {
    /// Target server connection
    pub session_id: String,
    pub server_name: String,
    pub channel: String,
    pub world: String,
    pub content: String,
}

/// History read filters. `world = "all"` matches every world.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryQuery {
    pub server_name: String,
    pub channel: Option<String>,
    pub world: Option<String>,
    pub limit: Option<usize>,
}

pub struct ChatRelay {
    store: Arc<dyn KeyValueStore>,
    bus: Arc<MessageBus>,
    db: Database,
}

impl ChatRelay {
    pub fn new(store: Arc<dyn KeyValueStore>, bus: Arc<MessageBus>, db: Database) -> Self {
        Self { store, bus, db }
    }

    /// Relay a web message into the game and onto the broadcast channel.
    pub async fn send_chat_message(
        &self,
        dto: SendChatMessage,
        user_id: i64,
    ) -> Result<ChatMessage, ChatError> {
        let binding = self
            .db
            .minecraft_binding(user_id)
            .await?
            .ok_or(ChatError::NoBinding)?;

        let username = binding.minecraft_username.as_str().to_string();
        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            server_name: dto.server_name,
            channel: dto.channel,
            world: dto.world,
            player: ChatPlayer {
                avatar: avatar_url(&binding.minecraft_uuid),
                uuid: binding.minecraft_uuid,
                username: username.clone(),
            },
            content: dto.content,
            source: ChatSource::Web,
            timestamp: Utc::now(),
        };

        // The in-game broadcast rides the admin channel; the envelope token
        // is the target session id, as the game side expects.
        let broadcast = format!("[Web] {}: {}", username, message.content);
        self.bus.publish_admin_command(AdminCommandPacket {
            header: PacketHeader::new(dto.session_id.clone()),
            session_id: dto.session_id,
            command_type: CommandType::Message,
            target_player: None,
            command: None,
            reason: Some(broadcast),
            command_id: Uuid::new_v4().to_string(),
        });

        self.save_chat_message(&message).await;
        self.bus.publish_chat(&message);

        info!(server_name = %message.server_name, user_id, "relayed web chat message");
        Ok(message)
    }

    /// Record a message arriving from a game server (bridge pump path).
    pub async fn record_game_message(&self, message: ChatMessage) {
        self.save_chat_message(&message).await;
        self.bus.publish_chat(&message);
    }

    /// Append to history and trim to the last 500 entries as one atomic
    /// unit, so a trim is never lost under concurrent writers.
    async fn save_chat_message(&self, message: &ChatMessage) {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize chat message");
                return;
            }
        };
        if let Err(e) = self
            .store
            .push_trim(CHAT_HISTORY_KEY, json, MAX_HISTORY_SIZE)
            .await
        {
            warn!(error = %e, "failed to append chat history");
        }
    }

    /// Read back the last `limit` entries for one server. Each raw entry is
    /// deserialized independently; a malformed entry is skipped, not fatal.
    pub async fn get_chat_history(&self, query: ChatHistoryQuery) -> Vec<ChatMessage> {
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_HISTORY_SIZE);

        let raw = match self.store.list_tail(CHAT_HISTORY_KEY, limit).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to read chat history");
                return Vec::new();
            }
        };

        raw.iter()
            .filter_map(|json| match serde_json::from_str::<ChatMessage>(json) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(error = %e, "skipping malformed chat history entry");
                    None
                }
            })
            .filter(|message| should_include(message, &query))
            .collect()
    }
}

fn should_include(message: &ChatMessage, query: &ChatHistoryQuery) -> bool {
    if message.server_name != query.server_name {
        return false;
    }

    if let Some(channel) = query.channel.as_deref() {
        if !channel.is_empty() && !channel.eq_ignore_ascii_case(&message.channel) {
            return false;
        }
    }

    if let Some(world) = query.world.as_deref() {
        if !world.is_empty()
            && !world.eq_ignore_ascii_case("all")
            && !world.eq_ignore_ascii_case(&message.world)
        {
            return false;
        }
    }

    true
}

/// Static channel catalog for the chat UI.
pub fn channels() -> Vec<(&'static str, &'static str)> {
    vec![
        ("global", "Global chat"),
        ("world", "World chat"),
        ("party", "Party chat"),
        ("guild", "Guild chat"),
        ("whisper", "Whispers"),
        ("staff", "Staff channel"),
        ("announcement", "Announcements"),
    ]
}

/// Static world catalog for the chat UI.
pub fn worlds() -> Vec<(&'static str, &'static str)> {
    vec![
        ("all", "All worlds"),
        ("world", "Overworld"),
        ("world_nether", "The Nether"),
        ("world_the_end", "The End"),
        ("resource", "Resource world"),
        ("minigames", "Minigames world"),
    ]
}
