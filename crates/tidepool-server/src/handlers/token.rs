//! Handler for `POST /documents/auth/token` — broker token issuance.

use axum::{Json, extract::State};
use serde::Serialize;
use serde_json::Value;
use tidepool_core::store::DocumentStore;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct TokenResponse {
  pub token: String,
}

/// `POST /documents/auth/token` with body `{"userId": "..."}`.
///
/// The body is taken as a loose value so a missing id surfaces as the
/// documented 400 rather than a deserialization rejection.
pub async fn issue<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<Value>,
) -> Result<Json<TokenResponse>, ApiError>
where
  S: DocumentStore + Clone + Send + Sync + 'static,
{
  let user_id = body
    .get("userId")
    .and_then(Value::as_str)
    .filter(|s| !s.is_empty())
    .ok_or_else(|| ApiError::BadRequest("userId is required".into()))?;

  Ok(Json(TokenResponse { token: state.tokens.issue(user_id) }))
}
