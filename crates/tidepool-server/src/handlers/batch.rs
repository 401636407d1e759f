//! Handler for `POST /documents/batch` — ordered, all-or-nothing writes.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use tidepool_core::store::{BatchOp, DocumentStore};
use tidepool_rules::Operation;

use crate::{AppState, error::ApiError, handlers};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchBody {
  pub operations:   Vec<BatchOp>,
  pub user_id:      String,
  pub workspace_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
  pub success: bool,
  /// The version of the batch's final event.
  pub version: i64,
}

/// Commit a batch. Authorization covers every operation before anything
/// is applied; publications go out only after the whole unit commits, in
/// operation order.
pub async fn commit<S>(
  State(state): State<AppState<S>>,
  Json(body): Json<BatchBody>,
) -> Result<Json<BatchResponse>, ApiError>
where
  S: DocumentStore + Clone + Send + Sync + 'static,
{
  if body.operations.is_empty() {
    return Err(ApiError::BadRequest("empty batch".into()));
  }

  let workspace = handlers::workspace_or_default(body.workspace_id);
  let auth = handlers::auth_context(Some(&body.user_id));
  for op in &body.operations {
    let operation = match op {
      BatchOp::Delete { .. } => Operation::Delete,
      _ => Operation::Write,
    };
    handlers::ensure_allowed(
      &state.rules,
      &op.path().to_string(),
      operation,
      &auth,
    )?;
  }

  let outcome = state
    .store
    .batch(&workspace, body.operations, &body.user_id)
    .await?;
  tracing::debug!(
    workspace = %workspace,
    operations = outcome.changes.len(),
    version = outcome.version,
    "batch committed"
  );

  for change in &outcome.changes {
    state.bus.publish_change(&workspace, change).await;
  }

  Ok(Json(BatchResponse { success: true, version: outcome.version }))
}
