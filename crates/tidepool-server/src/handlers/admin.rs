//! Handler for `POST /documents/internal/reset` — truncate and recreate
//! the schema. For test harnesses and local development; deployments are
//! expected to keep `/documents/internal/*` off the public edge.

use axum::{Json, extract::State};
use serde::Serialize;
use tidepool_core::store::DocumentStore;

use crate::{AppState, error::ApiError};

#[derive(Debug, Serialize)]
pub struct ResetResponse {
  pub message: String,
}

pub async fn reset<S>(
  State(state): State<AppState<S>>,
) -> Result<Json<ResetResponse>, ApiError>
where
  S: DocumentStore + Clone + Send + Sync + 'static,
{
  tracing::warn!("resetting storage via /documents/internal/reset");
  state.store.reset().await?;
  Ok(Json(ResetResponse { message: "storage reset".into() }))
}
