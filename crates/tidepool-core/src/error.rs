//! Error taxonomy for tidepool.
//!
//! Every crate in the workspace surfaces failures through this enum so that
//! the HTTP layer and the client can react to specific kinds (conflict,
//! denial, absence) without string matching.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// An `expected_version` precondition did not hold at commit time.
  /// `actual` is `0` when the target document does not exist.
  #[error("version conflict: expected {expected}, found {actual}")]
  VersionConflict { expected: i64, actual: i64 },

  /// The rules engine denied the operation (or failed evaluating, which
  /// collapses into a denial).
  #[error("permission denied for {operation} on {path:?}")]
  PermissionDenied { path: String, operation: String },

  #[error("document not found: {0}")]
  NotFound(String),

  #[error("malformed path: {0}")]
  MalformedPath(String),

  #[error("malformed request: {0}")]
  MalformedRequest(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// Storage-engine failure with no domain meaning. Carried as text so this
  /// crate stays free of database dependencies.
  #[error("storage error: {0}")]
  Storage(String),
}

impl Error {
  /// Wrap any storage-layer error. Used by backends at `.await` boundaries.
  pub fn storage(e: impl std::fmt::Display) -> Self {
    Error::Storage(e.to_string())
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
