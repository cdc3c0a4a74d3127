//! Error types for the coucher client.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
  #[error("Remote error: HTTP {status}")]
  Remote { status: u16 },

  #[error("Document not found: {0}")]
  DocumentNotFound(String),

  #[error("Document conflict: {0}")]
  DocumentConflict(String),

  #[error("Database not found: {0}")]
  DatabaseNotFound(String),

  #[error("Database already exists: {0}")]
  DatabaseExists(String),

  #[error("Authentication failed")]
  AuthFailed,

  #[error("Parse error: {0}")]
  Parse(String),

  #[error("Feed '{0}' is not supported")]
  NotSupported(String),

  #[error("Invalid name: {0}")]
  InvalidName(String),

  #[error("Invalid URL: {0}")]
  InvalidUrl(String),

  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

impl Error {
  /// Maps a status code with no more specific meaning at the call site.
  pub fn from_status(status: u16) -> Self {
    match status {
      401 => Self::AuthFailed,
      _ => Self::Remote { status },
    }
  }

  /// The HTTP status carried by this error, if it came from the server.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Remote { status } => Some(*status),
      Self::AuthFailed => Some(401),
      Self::Http(e) => e.status().map(|s| s.as_u16()),
      _ => None,
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Self::Parse(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
