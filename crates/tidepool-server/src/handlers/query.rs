//! Handler for `GET /documents/query` — filter/order/limit queries.

use axum::{
  Json,
  extract::{Query as UrlQuery, State},
};
use serde::Deserialize;
use tidepool_core::{
  path::CollectionPath,
  query::{Direction, Filter, OrderBy, Query, QueryRow},
  store::DocumentStore,
};
use tidepool_rules::Operation;

use crate::{AppState, error::ApiError, handlers};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
  pub workspace_id:    Option<String>,
  /// Optional full collection path to scope the query to one level.
  pub collection:      Option<CollectionPath>,
  /// JSON-encoded list of `{field, op, value}` triples.
  pub filters:         Option<String>,
  pub order_by_field:  Option<String>,
  pub order_direction: Option<Direction>,
  pub limit:           Option<u32>,
  pub user_id:         Option<String>,
}

/// `GET /documents/query?workspaceId=&filters=&orderByField=&orderDirection=&limit=`
///
/// Results are rule-filtered per document path, so a query can never leak
/// documents the caller could not `GET` directly.
pub async fn run<S>(
  State(state): State<AppState<S>>,
  UrlQuery(params): UrlQuery<QueryParams>,
) -> Result<Json<Vec<QueryRow>>, ApiError>
where
  S: DocumentStore + Clone + Send + Sync + 'static,
{
  let workspace = handlers::workspace_or_default(params.workspace_id);

  let filters: Vec<Filter> = match params.filters.as_deref() {
    None | Some("") => Vec::new(),
    Some(raw) => serde_json::from_str(raw)
      .map_err(|e| ApiError::BadRequest(format!("bad filters: {e}")))?,
  };

  if let Some(limit) = params.limit
    && limit == 0
  {
    return Err(ApiError::BadRequest("limit must be positive".into()));
  }

  let query = Query {
    collection: params.collection,
    filters,
    order_by: params.order_by_field.map(|field| OrderBy {
      field,
      direction: params.order_direction.unwrap_or_default(),
    }),
    limit: params.limit,
  };

  let auth = handlers::auth_context(params.user_id.as_deref());
  let rows = state.store.query(&workspace, &query).await?;
  let visible: Vec<QueryRow> = rows
    .into_iter()
    .filter(|row| state.rules.allows(&row.path, Operation::Read, &auth))
    .collect();
  Ok(Json(visible))
}
