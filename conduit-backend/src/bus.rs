//! Message bus bridge: pub/sub transport carrying packets between the
//! platform and game-server processes.
//!
//! Channels carry JSON strings so every subscriber goes through the safe
//! codec. Delivery is fire-and-forget: publish never waits for or requires
//! acknowledgement, and a send with no subscribers is not an error.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::chat::ChatRelay;
use crate::protocol::{
    AdminCommandPacket, ChatMessage, GamePacket, PacketHeader, ServerLoginRespPacket,
};
use crate::registry::SessionRegistry;
use conduit_store::Database;

/// Platform -> game servers: AdminCommand envelopes and login responses.
pub const ADMIN_COMMAND_CHANNEL: &str = "conduit:admin:command";

/// Platform fan-out of chat lines to web listeners.
pub const CHAT_BROADCAST_CHANNEL: &str = "conduit:chat:message";

/// Game servers -> platform: login/heartbeat/info/chat packets.
pub const GAME_PACKET_CHANNEL: &str = "conduit:packet:inbound";

const CHANNEL_CAPACITY: usize = 256;

/// In-process pub/sub with the topic contract of the deployment bus.
pub struct MessageBus {
    admin_tx: broadcast::Sender<String>,
    chat_tx: broadcast::Sender<String>,
    packet_tx: broadcast::Sender<String>,
}

impl MessageBus {
    pub fn new() -> Self {
        let (admin_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (chat_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (packet_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            admin_tx,
            chat_tx,
            packet_tx,
        }
    }

    /// Publish an admin command addressed to a session. Fire-and-forget:
    /// `command_id` exists so a consumer can deduplicate or trace, not for
    /// any delivery guarantee made here.
    pub fn publish_admin_command(&self, command: AdminCommandPacket) {
        let session_id = command.session_id.clone();
        let command_type = command.command_type;
        if let Some(json) = GamePacket::AdminCommand(command).to_json_safe() {
            match self.admin_tx.send(json) {
                Ok(_) => {
                    info!(session_id = %session_id, ?command_type, channel = ADMIN_COMMAND_CHANNEL, "published admin command")
                }
                Err(_) => debug!(channel = ADMIN_COMMAND_CHANNEL, "no subscribers for admin command"),
            }
        }
    }

    /// Publish a login response back to the originating game server.
    pub fn publish_login_resp(&self, resp: ServerLoginRespPacket) {
        if let Some(json) = GamePacket::ServerLoginResp(resp).to_json_safe() {
            let _ = self.admin_tx.send(json);
        }
    }

    /// Fan a chat line out to platform listeners.
    pub fn publish_chat(&self, message: &ChatMessage) {
        match serde_json::to_string(message) {
            Ok(json) => {
                if self.chat_tx.send(json).is_err() {
                    debug!(channel = CHAT_BROADCAST_CHANNEL, "no subscribers for chat broadcast");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode chat broadcast"),
        }
    }

    /// Publish an inbound packet the way a game-server process would.
    pub fn publish_packet(&self, packet: &GamePacket) {
        if let Some(json) = packet.to_json_safe() {
            if self.packet_tx.send(json).is_err() {
                debug!(channel = GAME_PACKET_CHANNEL, "no subscribers for inbound packet");
            }
        }
    }

    pub fn subscribe_admin_commands(&self) -> broadcast::Receiver<String> {
        self.admin_tx.subscribe()
    }

    pub fn subscribe_chat(&self) -> broadcast::Receiver<String> {
        self.chat_tx.subscribe()
    }

    pub fn subscribe_packets(&self) -> broadcast::Receiver<String> {
        self.packet_tx.subscribe()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Consume inbound game-server packets and feed the registry and chat relay.
///
/// Runs until the bus is dropped. Invalid or malformed packets are logged
/// and dropped, never propagated.
pub async fn packet_pump(
    bus: Arc<MessageBus>,
    registry: Arc<SessionRegistry>,
    chat: Arc<ChatRelay>,
    db: Database,
) {
    let mut packets = bus.subscribe_packets();
    info!(channel = GAME_PACKET_CHANNEL, "packet pump started");

    loop {
        let json = match packets.recv().await {
            Ok(json) => json,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "packet pump lagged, packets dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let Some(packet) = GamePacket::from_json_safe(&json) else {
            warn!("dropping malformed inbound packet");
            continue;
        };

        if let Err(reason) = packet.validate() {
            warn!(packet_type = packet.packet_type(), %reason, "dropping invalid packet");
            continue;
        }

        dispatch(&bus, &registry, &chat, &db, packet).await;
    }

    info!("packet pump stopped");
}

async fn dispatch(
    bus: &MessageBus,
    registry: &SessionRegistry,
    chat: &ChatRelay,
    db: &Database,
    packet: GamePacket,
) {
    match packet {
        GamePacket::ServerLogin(login) => {
            let token = login.header.token.clone();
            match db.verify_server_token(token.clone()).await {
                Ok(Some(server_token)) => {
                    let session = registry
                        .register(
                            token.clone(),
                            login.server_name.clone(),
                            login.server_version.clone(),
                            login.server_ip.clone(),
                            login.port,
                        )
                        .await;
                    let login_ip = login.server_ip.unwrap_or_default();
                    if let Err(e) = db
                        .update_server_login(token.clone(), login_ip, crate::helpers::now())
                        .await
                    {
                        warn!(error = %e, "failed to record server login");
                    }
                    debug!(server_name = %server_token.server_name, "server token verified");
                    bus.publish_login_resp(ServerLoginRespPacket {
                        header: PacketHeader::new(token),
                        success: true,
                        session_id: Some(session.session_id),
                        message: "login successful".to_string(),
                    });
                }
                Ok(None) => {
                    warn!(server_name = %login.server_name, "server login with unknown or disabled token");
                    bus.publish_login_resp(ServerLoginRespPacket {
                        header: PacketHeader::new(token),
                        success: false,
                        session_id: None,
                        message: "token invalid or disabled".to_string(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "server token verification failed");
                }
            }
        }
        GamePacket::ServerHeartbeat(hb) => {
            if !registry.heartbeat(&hb.session_id).await {
                warn!(session_id = %hb.session_id, "heartbeat for unknown session");
            }
        }
        GamePacket::ServerInfo(info) => {
            registry.update_info(&info).await;
        }
        GamePacket::ChatMsg(chat_packet) => {
            chat.record_game_message(chat_packet.message).await;
        }
        GamePacket::Disconnect(disc) => {
            registry.remove(&disc.session_id).await;
        }
        other => {
            debug!(packet_type = other.packet_type(), "ignoring platform-bound packet type");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CommandType;

    fn test_token() -> String {
        "b".repeat(40)
    }

    fn command(session_id: &str) -> AdminCommandPacket {
        AdminCommandPacket {
            header: PacketHeader::new(test_token()),
            session_id: session_id.to_string(),
            command_type: CommandType::Message,
            target_player: None,
            command: None,
            reason: Some("hello".to_string()),
            command_id: "cmd-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_admin_command_reaches_subscriber() {
        let bus = MessageBus::new();
        let mut rx = bus.subscribe_admin_commands();

        bus.publish_admin_command(command("session-1"));

        let json = rx.recv().await.unwrap();
        let packet = GamePacket::from_json_safe(&json).unwrap();
        match packet {
            GamePacket::AdminCommand(cmd) => {
                assert_eq!(cmd.session_id, "session-1");
                assert_eq!(cmd.command_type, CommandType::Message);
            }
            other => panic!("unexpected packet: {}", other.packet_type()),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_swallowed() {
        let bus = MessageBus::new();
        // No receivers anywhere; none of these may panic or error out.
        bus.publish_admin_command(command("session-1"));
        bus.publish_packet(&GamePacket::AdminCommand(command("session-2")));
    }

    #[tokio::test]
    async fn test_subscribers_decode_independently() {
        let bus = MessageBus::new();
        let mut a = bus.subscribe_admin_commands();
        let mut b = bus.subscribe_admin_commands();

        bus.publish_admin_command(command("session-1"));

        assert!(a.recv().await.is_ok());
        assert!(b.recv().await.is_ok());
    }
}
