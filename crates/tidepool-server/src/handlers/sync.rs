//! Handler for `GET /documents/sync` — the incremental change stream.

use axum::{
  Json,
  extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tidepool_core::{event::Event, store::DocumentStore};
use tidepool_rules::Operation;

use crate::{AppState, error::ApiError, handlers};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncParams {
  pub workspace_id: Option<String>,
  /// Return events with version strictly greater than this; default 0.
  pub since:        Option<i64>,
  pub user_id:      Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
  pub changes:     Vec<Event>,
  /// Lets clients gauge how stale their view is.
  pub server_time: DateTime<Utc>,
}

/// `GET /documents/sync?workspaceId=&since=`
///
/// Events are rule-filtered by document path, the same gate as direct
/// reads.
pub async fn changes<S>(
  State(state): State<AppState<S>>,
  Query(params): Query<SyncParams>,
) -> Result<Json<SyncResponse>, ApiError>
where
  S: DocumentStore + Clone + Send + Sync + 'static,
{
  let workspace = handlers::workspace_or_default(params.workspace_id);
  let auth = handlers::auth_context(params.user_id.as_deref());

  let events = state
    .store
    .changes_since(&workspace, params.since.unwrap_or(0))
    .await?;
  let changes: Vec<Event> = events
    .into_iter()
    .filter(|event| state.rules.allows(&event.path, Operation::Read, &auth))
    .collect();

  Ok(Json(SyncResponse { changes, server_time: Utc::now() }))
}
