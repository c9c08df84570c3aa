mod error;
mod kv;
mod models;

pub use error::{DbError, Result};
pub use kv::{KeyValueStore, MemoryStore, StoreError, StoreResult};
pub use models::{MinecraftBinding, PlayerName, ServerToken, User};

use std::path::Path;
use tokio_rusqlite::Connection;
use tokio_rusqlite::rusqlite::{OptionalExtension, params};
use tracing::{debug, info};

fn row_to_user(row: &tokio_rusqlite::rusqlite::Row<'_>) -> tokio_rusqlite::rusqlite::Result<User> {
  let minecraft_username: Option<String> = row.get(4)?;
  Ok(User {
    user_id: row.get(0)?,
    username: row.get(1)?,
    api_token_hash: row.get(2)?,
    minecraft_uuid: row.get(3)?,
    // Usernames longer than the Minecraft limit cannot have been written by
    // bind_minecraft_account; treat them as absent rather than failing the row.
    minecraft_username: minecraft_username.and_then(|n| PlayerName::try_from(n.as_str()).ok()),
  })
}

/// Relational store for user identity, game-account bindings and
/// game-server credentials.
#[derive(Clone)]
pub struct Database {
  conn: Connection,
}

impl Database {
  /// Open or create a database at the given path.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = Connection::open(path)
      .await
      .map_err(|e| DbError::Connection(e.into()))?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Create an in-memory database (useful for testing).
  pub async fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .await
      .map_err(|e| DbError::Connection(e.into()))?;
    let db = Self { conn };
    db.initialize().await?;
    Ok(db)
  }

  /// Initialize the database schema.
  async fn initialize(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        // Enable WAL mode for better concurrent read/write performance
        conn.pragma_update(None, "journal_mode", "WAL")?;

        conn.execute_batch(
          r#"
                    -- Platform users and their optional game-account binding
                    CREATE TABLE IF NOT EXISTS users (
                        user_id INTEGER PRIMARY KEY AUTOINCREMENT,
                        username TEXT NOT NULL UNIQUE,
                        api_token_hash TEXT NOT NULL UNIQUE,
                        minecraft_uuid TEXT,
                        minecraft_username TEXT
                    );

                    -- Credentials handed to game-server processes
                    CREATE TABLE IF NOT EXISTS server_tokens (
                        token_value TEXT PRIMARY KEY,
                        server_name TEXT NOT NULL,
                        enabled INTEGER NOT NULL DEFAULT 1,
                        last_login_ip TEXT,
                        last_login_at INTEGER
                    );
                    "#,
        )?;
        Ok(())
      })
      .await?;

    info!("database initialized");
    Ok(())
  }

  // ========================================================================
  // Users
  // ========================================================================

  /// Create a new user with no game-account binding.
  pub async fn create_user(&self, username: String, api_token_hash: String) -> Result<User> {
    let user = self
      .conn
      .call(move |conn| {
        let inserted = conn
          .prepare_cached(
            "INSERT OR IGNORE INTO users (username, api_token_hash) VALUES (?1, ?2)",
          )?
          .execute(params![&username, &api_token_hash])?;

        if inserted == 0 {
          return Ok(Err(DbError::UserConflict));
        }

        Ok(Ok(User {
          user_id: conn.last_insert_rowid(),
          username,
          api_token_hash,
          minecraft_uuid: None,
          minecraft_username: None,
        }))
      })
      .await??;

    debug!(%user.username, user.user_id, "created user");
    Ok(user)
  }

  /// Look up a user by API token hash (bearer auth path).
  pub async fn user_by_token_hash(&self, api_token_hash: String) -> Result<Option<User>> {
    let user = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT user_id, username, api_token_hash, minecraft_uuid, minecraft_username
                         FROM users WHERE api_token_hash = ?1",
          )?
          .query_row(params![&api_token_hash], row_to_user)
          .optional()
      })
      .await?;

    Ok(user)
  }

  /// Look up a user by id.
  pub async fn user_by_id(&self, user_id: i64) -> Result<Option<User>> {
    let user = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT user_id, username, api_token_hash, minecraft_uuid, minecraft_username
                         FROM users WHERE user_id = ?1",
          )?
          .query_row(params![user_id], row_to_user)
          .optional()
      })
      .await?;

    Ok(user)
  }

  /// The user's verified game-account binding, if any.
  pub async fn minecraft_binding(&self, user_id: i64) -> Result<Option<MinecraftBinding>> {
    let user = self.user_by_id(user_id).await?;
    Ok(user.and_then(|u| u.binding()))
  }

  /// Persist a completed binding on the user row.
  pub async fn bind_minecraft_account(
    &self,
    user_id: i64,
    minecraft_uuid: String,
    minecraft_username: String,
  ) -> Result<()> {
    if PlayerName::try_from(minecraft_username.as_str()).is_err() {
      return Err(DbError::PlayerNameTooLong);
    }

    let uuid_log = minecraft_uuid.clone();
    let updated = self
      .conn
      .call(move |conn| {
        let updated = conn
          .prepare_cached(
            "UPDATE users SET minecraft_uuid = ?2, minecraft_username = ?3 WHERE user_id = ?1",
          )?
          .execute(params![user_id, &minecraft_uuid, &minecraft_username])?;
        Ok(updated)
      })
      .await?;

    if updated == 0 {
      return Err(DbError::UserNotFound);
    }

    debug!(user_id, minecraft_uuid = %uuid_log, "bound minecraft account");
    Ok(())
  }

  // ========================================================================
  // Server Tokens
  // ========================================================================

  /// Register a credential for a game-server process.
  pub async fn create_server_token(
    &self,
    token_value: String,
    server_name: String,
  ) -> Result<ServerToken> {
    let token = self
      .conn
      .call(move |conn| {
        let inserted = conn
          .prepare_cached(
            "INSERT OR IGNORE INTO server_tokens (token_value, server_name) VALUES (?1, ?2)",
          )?
          .execute(params![&token_value, &server_name])?;

        if inserted == 0 {
          return Ok(Err(DbError::ServerTokenConflict));
        }

        Ok(Ok(ServerToken {
          token_value,
          server_name,
          enabled: true,
          last_login_ip: None,
          last_login_at: None,
        }))
      })
      .await??;

    debug!(%token.server_name, "created server token");
    Ok(token)
  }

  /// Verify a login-packet token. Disabled tokens verify as absent.
  pub async fn verify_server_token(&self, token_value: String) -> Result<Option<ServerToken>> {
    let token = self
      .conn
      .call(move |conn| {
        conn
          .prepare_cached(
            "SELECT token_value, server_name, enabled, last_login_ip, last_login_at
                         FROM server_tokens WHERE token_value = ?1 AND enabled = 1",
          )?
          .query_row(params![&token_value], |row| {
            Ok(ServerToken {
              token_value: row.get(0)?,
              server_name: row.get(1)?,
              enabled: row.get(2)?,
              last_login_ip: row.get(3)?,
              last_login_at: row.get(4)?,
            })
          })
          .optional()
      })
      .await?;

    Ok(token)
  }

  /// Record last-login metadata after a successful server login.
  pub async fn update_server_login(
    &self,
    token_value: String,
    login_ip: String,
    now: i64,
  ) -> Result<()> {
    let updated = self
      .conn
      .call(move |conn| {
        let updated = conn
          .prepare_cached(
            "UPDATE server_tokens SET last_login_ip = ?2, last_login_at = ?3 WHERE token_value = ?1",
          )?
          .execute(params![&token_value, &login_ip, now])?;
        Ok(updated)
      })
      .await?;

    if updated == 0 {
      return Err(DbError::ServerTokenNotFound);
    }

    Ok(())
  }

  /// Enable or disable a server token.
  pub async fn set_server_token_enabled(&self, token_value: String, enabled: bool) -> Result<()> {
    let updated = self
      .conn
      .call(move |conn| {
        let updated = conn
          .prepare_cached("UPDATE server_tokens SET enabled = ?2 WHERE token_value = ?1")?
          .execute(params![&token_value, enabled])?;
        Ok(updated)
      })
      .await?;

    if updated == 0 {
      return Err(DbError::ServerTokenNotFound);
    }

    Ok(())
  }
}
