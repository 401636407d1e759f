//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tidepool_core::Error as CoreError;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("version conflict: expected {expected}, found {actual}")]
  Conflict { expected: i64, actual: i64 },

  #[error("permission denied")]
  Denied,

  #[error("not found: {0}")]
  NotFound(String),

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("internal error: {0}")]
  Internal(String),
}

impl From<CoreError> for ApiError {
  fn from(e: CoreError) -> Self {
    match e {
      CoreError::VersionConflict { expected, actual } => {
        ApiError::Conflict { expected, actual }
      }
      CoreError::PermissionDenied { .. } => ApiError::Denied,
      CoreError::NotFound(path) => ApiError::NotFound(path),
      CoreError::MalformedPath(m) | CoreError::MalformedRequest(m) => {
        ApiError::BadRequest(m)
      }
      CoreError::Serialization(e) => ApiError::BadRequest(e.to_string()),
      CoreError::Storage(m) => ApiError::Internal(m),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::Conflict { .. } => StatusCode::CONFLICT,
      ApiError::Denied => StatusCode::FORBIDDEN,
      ApiError::NotFound(_) => StatusCode::NOT_FOUND,
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}
