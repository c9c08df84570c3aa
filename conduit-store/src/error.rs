use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
  #[error("database error: {0}")]
  Sqlite(#[from] tokio_rusqlite::rusqlite::Error),

  #[error("database connection error: {0}")]
  Connection(#[from] tokio_rusqlite::Error),

  #[error("user not found")]
  UserNotFound,

  #[error("user already exists")]
  UserConflict,

  #[error("server token not found or disabled")]
  ServerTokenNotFound,

  #[error("server token already exists")]
  ServerTokenConflict,

  #[error("minecraft username exceeds 16 characters")]
  PlayerNameTooLong,
}

pub type Result<T> = std::result::Result<T, DbError>;
