use arrayvec::ArrayString;

/// Minecraft player name - max 16 characters, stored inline (no heap allocation).
pub type PlayerName = ArrayString<16>;

/// A platform user as seen by the bridge: identity plus an optional
/// verified game-account binding.
#[derive(Debug, Clone)]
pub struct User {
  /// Numeric user id (primary key)
  pub user_id: i64,
  /// Platform username
  pub username: String,
  /// SHA-256 hash of the user's API token
  pub api_token_hash: String,
  /// Minecraft UUID, set once the device flow or bind chain completes
  pub minecraft_uuid: Option<String>,
  /// Minecraft username, set together with the UUID
  pub minecraft_username: Option<PlayerName>,
}

impl User {
  /// The chat relay admits a user only with a verified binding.
  pub fn binding(&self) -> Option<MinecraftBinding> {
    match (&self.minecraft_uuid, &self.minecraft_username) {
      (Some(uuid), Some(name)) => Some(MinecraftBinding {
        minecraft_uuid: uuid.clone(),
        minecraft_username: *name,
      }),
      _ => None,
    }
  }
}

/// A verified game-account binding.
#[derive(Debug, Clone)]
pub struct MinecraftBinding {
  pub minecraft_uuid: String,
  pub minecraft_username: PlayerName,
}

/// Credential issued to a game-server process for the login packet.
#[derive(Debug, Clone)]
pub struct ServerToken {
  /// The token value carried in packet envelopes
  pub token_value: String,
  /// Server name registered with the token
  pub server_name: String,
  /// Disabled tokens fail login verification
  pub enabled: bool,
  /// IP recorded at the most recent successful login
  pub last_login_ip: Option<String>,
  /// Unix timestamp of the most recent successful login
  pub last_login_at: Option<i64>,
}
