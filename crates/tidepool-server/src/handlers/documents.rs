//! Handlers for the per-document CRUD surface.
//!
//! | Method   | Path | Notes |
//! |----------|------|-------|
//! | `POST`   | `/documents/{collection}` | Create with server-generated id; 201 |
//! | `GET`    | `/documents/{collection}` | List one collection level |
//! | `GET`    | `/documents/{collection}/{id}` | Read one live document |
//! | `PUT`    | `/documents/{collection}/{id}` | Set/upsert; 201 on create |
//! | `PATCH`  | `/documents/{collection}/{id}` | Merge-patch update |
//! | `DELETE` | `/documents/{collection}/{id}` | Soft delete; 204 |
//!
//! Nested sub-collections are addressed with the `parentPath` body field /
//! query parameter holding the parent document's full path.

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tidepool_core::{
  change::{ChangeKind, ChangeRecord},
  document::Document,
  path::{CollectionPath, DocPath},
  store::{Created, DocumentStore},
  value::Payload,
};
use tidepool_rules::Operation;
use uuid::Uuid;

use crate::{AppState, error::ApiError, handlers};

/// Outcome body for set/update.
#[derive(Debug, Serialize)]
pub struct WriteResponse {
  pub success: bool,
  pub version: i64,
}

// ─── Create ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
  pub data:         Payload,
  pub user_id:      String,
  pub workspace_id: Option<String>,
  pub parent_path:  Option<DocPath>,
}

/// `POST /documents/{collection}` — create with a server-generated id.
pub async fn create<S>(
  State(state): State<AppState<S>>,
  Path(collection): Path<String>,
  Json(body): Json<CreateBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: DocumentStore + Clone + Send + Sync + 'static,
{
  let workspace = handlers::workspace_or_default(body.workspace_id);
  let collection =
    CollectionPath::under(body.parent_path.as_ref(), &collection)?;
  let path = collection.doc(&Uuid::new_v4().to_string())?;

  let auth = handlers::auth_context(Some(&body.user_id));
  handlers::ensure_allowed(
    &state.rules,
    &path.to_string(),
    Operation::Write,
    &auth,
  )?;

  let created: Created = state
    .store
    .create(&workspace, &path, body.data.clone(), &body.user_id)
    .await?;
  tracing::debug!(
    path = %created.path,
    workspace = %workspace,
    version = created.version,
    "document created"
  );

  state
    .bus
    .publish_change(&workspace, &ChangeRecord {
      kind:    ChangeKind::Created,
      id:      created.id.clone(),
      path:    created.path.to_string(),
      version: created.version,
      data:    Some(body.data),
    })
    .await;

  Ok((StatusCode::CREATED, Json(created)))
}

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadParams {
  pub workspace_id: Option<String>,
  pub parent_path:  Option<DocPath>,
  pub user_id:      Option<String>,
}

/// `GET /documents/{collection}?workspaceId=&parentPath=` — all live
/// documents exactly one level inside the collection.
pub async fn list<S>(
  State(state): State<AppState<S>>,
  Path(collection): Path<String>,
  Query(params): Query<ReadParams>,
) -> Result<Json<Vec<Document>>, ApiError>
where
  S: DocumentStore + Clone + Send + Sync + 'static,
{
  let workspace = handlers::workspace_or_default(params.workspace_id);
  let collection =
    CollectionPath::under(params.parent_path.as_ref(), &collection)?;

  let auth = handlers::auth_context(params.user_id.as_deref());
  handlers::ensure_allowed(
    &state.rules,
    &collection.to_string(),
    Operation::Read,
    &auth,
  )?;

  let documents = state.store.list(&workspace, &collection).await?;
  Ok(Json(documents))
}

// ─── Get one ─────────────────────────────────────────────────────────────────

/// `GET /documents/{collection}/{id}` — 404 for missing or tombstoned.
pub async fn get_one<S>(
  State(state): State<AppState<S>>,
  Path((collection, id)): Path<(String, String)>,
  Query(params): Query<ReadParams>,
) -> Result<Json<Document>, ApiError>
where
  S: DocumentStore + Clone + Send + Sync + 'static,
{
  let workspace = handlers::workspace_or_default(params.workspace_id);
  let path = CollectionPath::under(params.parent_path.as_ref(), &collection)?
    .doc(&id)?;

  let auth = handlers::auth_context(params.user_id.as_deref());
  handlers::ensure_allowed(
    &state.rules,
    &path.to_string(),
    Operation::Read,
    &auth,
  )?;

  let document = state
    .store
    .get(&workspace, &path)
    .await?
    .ok_or_else(|| ApiError::NotFound(path.to_string()))?;
  Ok(Json(document))
}

// ─── Set ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBody {
  pub data:             Payload,
  pub user_id:          String,
  pub workspace_id:     Option<String>,
  pub parent_path:      Option<DocPath>,
  pub expected_version: Option<i64>,
}

/// `PUT /documents/{collection}/{id}` — idempotent upsert; 201 when the
/// write created (or resurrected) the document.
pub async fn set_one<S>(
  State(state): State<AppState<S>>,
  Path((collection, id)): Path<(String, String)>,
  Json(body): Json<SetBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: DocumentStore + Clone + Send + Sync + 'static,
{
  let workspace = handlers::workspace_or_default(body.workspace_id);
  let path =
    CollectionPath::under(body.parent_path.as_ref(), &collection)?.doc(&id)?;

  let auth = handlers::auth_context(Some(&body.user_id));
  handlers::ensure_allowed(
    &state.rules,
    &path.to_string(),
    Operation::Write,
    &auth,
  )?;

  let outcome = state
    .store
    .set(
      &workspace,
      &path,
      body.data,
      &body.user_id,
      body.expected_version,
    )
    .await?;
  tracing::debug!(
    path = %path,
    workspace = %workspace,
    version = outcome.version,
    "document set"
  );

  state
    .bus
    .publish_change(&workspace, &ChangeRecord {
      kind:    if outcome.created {
        ChangeKind::Created
      } else {
        ChangeKind::Updated
      },
      id:      path.doc_id().to_owned(),
      path:    path.to_string(),
      version: outcome.version,
      data:    Some(outcome.data),
    })
    .await;

  let status = if outcome.created {
    StatusCode::CREATED
  } else {
    StatusCode::OK
  };
  Ok((
    status,
    Json(WriteResponse { success: true, version: outcome.version }),
  ))
}

// ─── Update ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBody {
  pub data:             Payload,
  pub user_id:          String,
  pub workspace_id:     Option<String>,
  pub parent_path:      Option<DocPath>,
  pub expected_version: Option<i64>,
}

/// `PATCH /documents/{collection}/{id}` — JSON merge-patch of a live
/// document.
pub async fn update_one<S>(
  State(state): State<AppState<S>>,
  Path((collection, id)): Path<(String, String)>,
  Json(body): Json<UpdateBody>,
) -> Result<Json<WriteResponse>, ApiError>
where
  S: DocumentStore + Clone + Send + Sync + 'static,
{
  let workspace = handlers::workspace_or_default(body.workspace_id);
  let path =
    CollectionPath::under(body.parent_path.as_ref(), &collection)?.doc(&id)?;

  let auth = handlers::auth_context(Some(&body.user_id));
  handlers::ensure_allowed(
    &state.rules,
    &path.to_string(),
    Operation::Write,
    &auth,
  )?;

  let outcome = state
    .store
    .update(&workspace, &path, body.data, body.expected_version)
    .await?;
  tracing::debug!(
    path = %path,
    workspace = %workspace,
    version = outcome.version,
    "document updated"
  );

  state
    .bus
    .publish_change(&workspace, &ChangeRecord {
      kind:    ChangeKind::Updated,
      id:      path.doc_id().to_owned(),
      path:    path.to_string(),
      version: outcome.version,
      data:    Some(outcome.data),
    })
    .await;

  Ok(Json(WriteResponse { success: true, version: outcome.version }))
}

// ─── Delete ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBody {
  pub expected_version: Option<i64>,
}

/// `DELETE /documents/{collection}/{id}` — soft delete; 204 on success.
/// Idempotent: deleting an absent or already-deleted document is also a
/// 204. The body is optional and carries only `expectedVersion`.
pub async fn delete_one<S>(
  State(state): State<AppState<S>>,
  Path((collection, id)): Path<(String, String)>,
  Query(params): Query<ReadParams>,
  body: Option<Json<DeleteBody>>,
) -> Result<StatusCode, ApiError>
where
  S: DocumentStore + Clone + Send + Sync + 'static,
{
  let workspace = handlers::workspace_or_default(params.workspace_id);
  let path = CollectionPath::under(params.parent_path.as_ref(), &collection)?
    .doc(&id)?;

  let auth = handlers::auth_context(params.user_id.as_deref());
  handlers::ensure_allowed(
    &state.rules,
    &path.to_string(),
    Operation::Delete,
    &auth,
  )?;

  let expected = body.map(|Json(b)| b.expected_version).unwrap_or_default();
  // Idempotent: deleting an absent document is a 204 with no publication.
  if let Some(version) = state.store.delete(&workspace, &path, expected).await?
  {
    tracing::debug!(
      path = %path,
      workspace = %workspace,
      version,
      "document deleted"
    );
    state
      .bus
      .publish_change(&workspace, &ChangeRecord {
        kind: ChangeKind::Deleted,
        id: path.doc_id().to_owned(),
        path: path.to_string(),
        version,
        data: None,
      })
      .await;
  }

  Ok(StatusCode::NO_CONTENT)
}
