//! Error type for `tidepool-client`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The transport failed — the server was never reached. This is the
  /// only kind that triggers the offline cache/queue paths.
  #[error("network error: {0}")]
  Network(#[from] reqwest::Error),

  /// The server rejected an `expected_version` precondition (409).
  #[error("version conflict: {0}")]
  Conflict(String),

  /// The rules engine denied the operation (403).
  #[error("permission denied: {0}")]
  Denied(String),

  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  /// Any other non-success response.
  #[error("server error: {0}")]
  Server(String),

  #[error("invalid path: {0}")]
  Path(String),

  /// Local cache store failure.
  #[error("cache error: {0}")]
  Cache(String),

  /// Broker connection or subscription failure.
  #[error("broker error: {0}")]
  Broker(String),

  /// A transaction exhausted its retry budget against concurrent writers.
  #[error("transaction conflict after {attempts} attempts")]
  TransactionConflict { attempts: u32 },
}

impl Error {
  /// Whether the failure means "the server is unreachable" as opposed to
  /// "the server said no".
  pub fn is_network(&self) -> bool {
    matches!(self, Error::Network(_))
  }

  pub(crate) fn cache(e: impl std::fmt::Display) -> Self {
    Error::Cache(e.to_string())
  }

  pub(crate) fn broker(e: impl std::fmt::Display) -> Self {
    Error::Broker(e.to_string())
  }
}

impl From<tidepool_core::Error> for Error {
  fn from(e: tidepool_core::Error) -> Self {
    use tidepool_core::Error as Core;
    match e {
      Core::MalformedPath(m) => Error::Path(m),
      Core::VersionConflict { expected, actual } => {
        Error::Conflict(format!("expected {expected}, found {actual}"))
      }
      Core::PermissionDenied { path, .. } => Error::Denied(path),
      Core::NotFound(p) => Error::NotFound(p),
      Core::MalformedRequest(m) => Error::BadRequest(m),
      Core::Serialization(e) => Error::BadRequest(e.to_string()),
      Core::Storage(m) => Error::Server(m),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
