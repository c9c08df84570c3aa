//! Packet protocol: the typed, validated message envelope exchanged with
//! game-server processes over the message bus, and its JSON codec.
//!
//! Wire format is a UTF-8 JSON document tagged by `type`, field names in
//! camelCase for compatibility with the game-side plugin. Subtypes are
//! distinguished by the tag, never by structural sniffing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::helpers::now_millis;

/// Protocol version stamped on newly built packets.
pub const PROTOCOL_VERSION: i32 = 1;

/// Versions the bridge currently accepts.
pub const MIN_PROTOCOL_VERSION: i32 = 1;
pub const MAX_PROTOCOL_VERSION: i32 = 3;

/// Token length bounds for the opaque credential in the envelope.
pub const MIN_TOKEN_LEN: usize = 32;
pub const MAX_TOKEN_LEN: usize = 64;

/// Freshness window: at most 5 minutes ahead, at most 24 hours behind.
const MAX_FUTURE_MS: i64 = 5 * 60 * 1000;
const MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("token length must be between 32 and 64 characters (got {0})")]
    TokenLength(usize),

    #[error("unsupported protocol version {0} (supported: 1-3)")]
    UnsupportedProtocolVersion(i32),

    #[error("timestamp {0} outside the freshness window")]
    StaleTimestamp(i64),
}

/// Fields common to every packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacketHeader {
    /// Opaque credential, 32-64 characters
    pub token: String,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: i32,
    /// Creation instant, epoch milliseconds
    pub timestamp: i64,
}

fn default_protocol_version() -> i32 {
    PROTOCOL_VERSION
}

impl PacketHeader {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            protocol_version: PROTOCOL_VERSION,
            timestamp: now_millis(),
        }
    }

    fn validate_at(&self, now_ms: i64) -> Result<(), ValidationError> {
        let len = self.token.trim().len();
        if !(MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&len) {
            return Err(ValidationError::TokenLength(len));
        }
        if !(MIN_PROTOCOL_VERSION..=MAX_PROTOCOL_VERSION).contains(&self.protocol_version) {
            return Err(ValidationError::UnsupportedProtocolVersion(
                self.protocol_version,
            ));
        }
        if self.timestamp > now_ms + MAX_FUTURE_MS || self.timestamp < now_ms - MAX_AGE_MS {
            return Err(ValidationError::StaleTimestamp(self.timestamp));
        }
        Ok(())
    }
}

// =============================================================================
// PACKETS
// =============================================================================

/// All packets carried over the message bus, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePacket {
    /// Game server authenticates with its token.
    ServerLogin(ServerLoginPacket),

    /// Login outcome, carries the assigned session id on success.
    ServerLoginResp(ServerLoginRespPacket),

    /// Keep-alive, refreshes the session.
    ServerHeartbeat(ServerHeartbeatPacket),

    /// Periodic server status (players, tps, memory, plugins).
    ServerInfo(ServerInfoPacket),

    /// In-game chat line relayed to the platform.
    ChatMsg(PlayerChatPacket),

    /// Platform-issued command addressed to one session.
    AdminCommand(AdminCommandPacket),

    /// Command execution result, matched by command id on the consumer side.
    AdminCommandResp(AdminCommandRespPacket),

    /// Game server announces it is going away.
    Disconnect(DisconnectPacket),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerLoginPacket {
    #[serde(flatten)]
    pub header: PacketHeader,
    pub server_name: String,
    pub server_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerLoginRespPacket {
    #[serde(flatten)]
    pub header: PacketHeader,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHeartbeatPacket {
    #[serde(flatten)]
    pub header: PacketHeader,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfoPacket {
    #[serde(flatten)]
    pub header: PacketHeader,
    pub session_id: String,
    pub server_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub motd: Option<String>,
    pub online_players: u32,
    pub max_players: u32,
    pub tps: f64,
    /// Memory figures in megabytes
    pub ram_usage: u64,
    pub max_ram: u64,
    #[serde(default)]
    pub player_list: Vec<String>,
    #[serde(default)]
    pub plugin_list: Vec<PluginInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerChatPacket {
    #[serde(flatten)]
    pub header: PacketHeader,
    pub message: ChatMessage,
}

/// Admin commands the platform can address to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    Kick,
    Ban,
    Command,
    Message,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCommandPacket {
    #[serde(flatten)]
    pub header: PacketHeader,
    /// Target server connection
    pub session_id: String,
    pub command_type: CommandType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_player: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Consumer-side tracing only; delivery is never acknowledged here
    pub command_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminCommandRespPacket {
    #[serde(flatten)]
    pub header: PacketHeader,
    pub command_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectPacket {
    #[serde(flatten)]
    pub header: PacketHeader,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// =============================================================================
// CHAT MESSAGE
// =============================================================================

/// Where a chat message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatSource {
    Game,
    Web,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPlayer {
    pub uuid: String,
    pub username: String,
    pub avatar: String,
}

/// One chat line, as stored in history and fanned out to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub server_name: String,
    pub channel: String,
    pub world: String,
    pub player: ChatPlayer,
    pub content: String,
    pub source: ChatSource,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// VALIDATION & CODEC
// =============================================================================

impl GamePacket {
    pub fn header(&self) -> &PacketHeader {
        match self {
            GamePacket::ServerLogin(p) => &p.header,
            GamePacket::ServerLoginResp(p) => &p.header,
            GamePacket::ServerHeartbeat(p) => &p.header,
            GamePacket::ServerInfo(p) => &p.header,
            GamePacket::ChatMsg(p) => &p.header,
            GamePacket::AdminCommand(p) => &p.header,
            GamePacket::AdminCommandResp(p) => &p.header,
            GamePacket::Disconnect(p) => &p.header,
        }
    }

    /// Tag name, for logging.
    pub fn packet_type(&self) -> &'static str {
        match self {
            GamePacket::ServerLogin(_) => "SERVER_LOGIN",
            GamePacket::ServerLoginResp(_) => "SERVER_LOGIN_RESP",
            GamePacket::ServerHeartbeat(_) => "SERVER_HEARTBEAT",
            GamePacket::ServerInfo(_) => "SERVER_INFO",
            GamePacket::ChatMsg(_) => "CHAT_MSG",
            GamePacket::AdminCommand(_) => "ADMIN_COMMAND",
            GamePacket::AdminCommandResp(_) => "ADMIN_COMMAND_RESP",
            GamePacket::Disconnect(_) => "DISCONNECT",
        }
    }

    /// A packet is valid iff the tag is known (guaranteed by construction),
    /// the token length is in bounds, the protocol version is supported and
    /// the timestamp falls inside the freshness window.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_at(now_millis())
    }

    /// Validation against an explicit clock, for deterministic tests.
    pub fn validate_at(&self, now_ms: i64) -> Result<(), ValidationError> {
        self.header().validate_at(now_ms)
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize, swallowing the (practically impossible) failure.
    pub fn to_json_safe(&self) -> Option<String> {
        self.to_json().ok()
    }

    /// Deserialize from the JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Deserialize without propagating parse failures into caller control
    /// flow; malformed or unknown-tag documents read as `None`.
    pub fn from_json_safe(json: &str) -> Option<Self> {
        Self::from_json(json).ok()
    }
}
