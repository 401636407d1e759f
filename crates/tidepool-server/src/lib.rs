//! HTTP layer for tidepool.
//!
//! Exposes an axum [`Router`] over any [`DocumentStore`], enforcing the
//! configured access rules on every operation and fanning committed
//! changes out to the broker. Transport concerns (TLS, reverse proxying)
//! are the deployment's responsibility.

pub mod bus;
pub mod error;
pub mod handlers;
pub mod token;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use serde::Deserialize;
use tidepool_core::store::DocumentStore;
use tidepool_rules::{RuleDef, RuleSet};
use tower_http::cors::CorsLayer;

pub use error::ApiError;

use crate::{bus::EventBus, token::TokenIssuer};

// ─── Configuration ───────────────────────────────────────────────────────────

fn default_host() -> String {
  "127.0.0.1".to_owned()
}
fn default_port() -> u16 {
  4550
}
fn default_store_path() -> PathBuf {
  PathBuf::from("tidepool.db")
}
fn default_signing_key_path() -> PathBuf {
  PathBuf::from("tidepool.key")
}

/// Runtime server configuration, deserialised from `config.toml` merged
/// with `TIDEPOOL_*` environment variables.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:             String,
  #[serde(default = "default_port")]
  pub port:             u16,
  #[serde(default = "default_store_path")]
  pub store_path:       PathBuf,
  #[serde(default = "default_signing_key_path")]
  pub signing_key_path: PathBuf,
  /// NATS URL; live change propagation is disabled when absent.
  pub broker_url:       Option<String>,
  /// Ordered access rules; an empty list denies everything.
  #[serde(default)]
  pub rules:            Vec<RuleDef>,
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState<S: DocumentStore> {
  pub store:  Arc<S>,
  pub rules:  Arc<RuleSet>,
  pub bus:    Arc<EventBus>,
  pub tokens: Arc<TokenIssuer>,
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the axum [`Router`] for the document API. CORS is permissive —
/// browser clients talk to this surface directly.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: DocumentStore + Clone + Send + Sync + 'static,
{
  Router::new()
    .route("/documents/auth/token", post(handlers::token::issue::<S>))
    .route("/documents/batch", post(handlers::batch::commit::<S>))
    .route("/documents/sync", get(handlers::sync::changes::<S>))
    .route("/documents/query", get(handlers::query::run::<S>))
    .route("/documents/internal/reset", post(handlers::admin::reset::<S>))
    .route(
      "/documents/{collection}",
      post(handlers::documents::create::<S>)
        .get(handlers::documents::list::<S>),
    )
    .route(
      "/documents/{collection}/{id}",
      get(handlers::documents::get_one::<S>)
        .put(handlers::documents::set_one::<S>)
        .patch(handlers::documents::update_one::<S>)
        .delete(handlers::documents::delete_one::<S>),
    )
    .with_state(state)
    .layer(CorsLayer::permissive())
}

// ─── Integration tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use serde_json::{Value, json};
  use tower::ServiceExt as _;

  use super::{test_helpers::*, *};

  async fn send(
    state: AppState<tidepool_store_sqlite::SqliteStore>,
    method: &str,
    uri: &str,
    body: Option<Value>,
  ) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
      Some(v) => {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        Body::from(v.to_string())
      }
      None => Body::empty(),
    };
    let resp = router(state)
      .oneshot(builder.body(body).unwrap())
      .await
      .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
      .await
      .unwrap();
    let value = if bytes.is_empty() {
      Value::Null
    } else {
      serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
  }

  // ── Token ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn token_endpoint_issues_and_requires_user() {
    let state = open_state().await;

    let (status, body) = send(
      state.clone(),
      "POST",
      "/documents/auth/token",
      Some(json!({"userId": "u1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap();
    let claims = state.tokens.verify(token).unwrap();
    assert_eq!(claims.sub, "u1");

    let (status, _) =
      send(state, "POST", "/documents/auth/token", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  // ── CRUD round trip ────────────────────────────────────────────────────────

  #[tokio::test]
  async fn crud_round_trip() {
    let state = open_state().await;

    let (status, created) = send(
      state.clone(),
      "POST",
      "/documents/items",
      Some(json!({"data": {"name": "a", "value": 1}, "userId": "u1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_owned();
    let v1 = created["version"].as_i64().unwrap();

    let (status, doc) =
      send(state.clone(), "GET", &format!("/documents/items/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["data"], json!({"name": "a", "value": 1}));
    assert_eq!(doc["version"].as_i64().unwrap(), v1);

    let (status, patched) = send(
      state.clone(),
      "PATCH",
      &format!("/documents/items/{id}"),
      Some(json!({"data": {"value": 2}, "userId": "u1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let v2 = patched["version"].as_i64().unwrap();
    assert!(v2 > v1);

    let (_, doc) =
      send(state.clone(), "GET", &format!("/documents/items/{id}"), None)
        .await;
    assert_eq!(doc["data"], json!({"name": "a", "value": 2}));

    let (status, _) =
      send(state.clone(), "DELETE", &format!("/documents/items/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) =
      send(state.clone(), "GET", &format!("/documents/items/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Delete is idempotent: repeating it is another 204.
    let (status, _) =
      send(state, "DELETE", &format!("/documents/items/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
  }

  #[tokio::test]
  async fn delete_of_absent_document_is_a_204() {
    let state = open_state().await;
    let (status, _) =
      send(state, "DELETE", "/documents/items/never-existed", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
  }

  // ── Set and OCC ────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn put_creates_then_updates_then_conflicts() {
    let state = open_state().await;

    let (status, first) = send(
      state.clone(),
      "PUT",
      "/documents/items/i1",
      Some(json!({"data": {"n": 1}, "userId": "u1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let v1 = first["version"].as_i64().unwrap();

    let (status, second) = send(
      state.clone(),
      "PUT",
      "/documents/items/i1",
      Some(json!({"data": {"n": 2}, "userId": "u1", "expectedVersion": v1})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(second["version"].as_i64().unwrap() > v1);

    // Stale precondition loses.
    let (status, _) = send(
      state,
      "PUT",
      "/documents/items/i1",
      Some(json!({"data": {"n": 3}, "userId": "u1", "expectedVersion": v1})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
  }

  // ── Batch ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn batch_commits_atomically() {
    let state = open_state().await;

    let (status, body) = send(
      state.clone(),
      "POST",
      "/documents/batch",
      Some(json!({
        "userId": "u1",
        "operations": [
          {"type": "set", "path": "a/1", "data": {"n": 1}},
          {"type": "set", "path": "b/2", "data": {"n": 2}},
        ],
      })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert!(body["version"].as_i64().unwrap() >= 2);
  }

  #[tokio::test]
  async fn failed_batch_leaves_no_trace() {
    let state = open_state().await;

    let (status, _) = send(
      state.clone(),
      "POST",
      "/documents/batch",
      Some(json!({
        "userId": "u1",
        "operations": [
          {"type": "set", "path": "a/1", "data": {"n": 1}},
          // Update of a missing document fails the whole batch.
          {"type": "update", "path": "c/3", "data": {"x": 3}},
        ],
      })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(state, "GET", "/documents/a/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn batch_with_delete_of_absent_document_succeeds() {
    let state = open_state().await;

    let (status, body) = send(
      state.clone(),
      "POST",
      "/documents/batch",
      Some(json!({
        "userId": "u1",
        "operations": [
          {"type": "delete", "path": "ghosts/g1"},
          {"type": "set", "path": "a/1", "data": {"n": 1}},
        ],
      })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));

    let (status, _) = send(state, "GET", "/documents/a/1", None).await;
    assert_eq!(status, StatusCode::OK);
  }

  // ── Sub-collections ────────────────────────────────────────────────────────

  #[tokio::test]
  async fn nested_collections_list_in_isolation() {
    let state = open_state().await;

    send(
      state.clone(),
      "PUT",
      "/documents/users/u1",
      Some(json!({"data": {"name": "u"}, "userId": "u1"})),
    )
    .await;
    send(
      state.clone(),
      "PUT",
      "/documents/posts/p1",
      Some(json!({"data": {"title": "t"}, "userId": "u1", "parentPath": "users/u1"})),
    )
    .await;

    let (_, users) = send(state.clone(), "GET", "/documents/users", None).await;
    let users = users.as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["id"], json!("u1"));

    let (_, posts) = send(
      state,
      "GET",
      "/documents/posts?parentPath=users/u1",
      None,
    )
    .await;
    let posts = posts.as_array().unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["id"], json!("p1"));
    assert_eq!(posts[0]["path"], json!("users/u1/posts/p1"));
  }

  // ── Query ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn query_endpoint_filters_and_limits() {
    let state = open_state().await;
    for (id, status, priority) in
      [("t1", "active", 3), ("t2", "done", 1), ("t3", "active", 2)]
    {
      send(
        state.clone(),
        "PUT",
        &format!("/documents/tasks/{id}"),
        Some(json!({"data": {"status": status, "priority": priority}, "userId": "u1"})),
      )
      .await;
    }

    let filters = serde_json::to_string(
      &json!([{"field": "status", "op": "==", "value": "active"}]),
    )
    .unwrap();
    let uri = format!(
      "/documents/query?filters={}&orderByField=priority&orderDirection=desc&limit=5",
      urlencode(&filters)
    );
    let (status, rows) = send(state, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = rows.as_array().unwrap();
    let ids: Vec<&str> =
      rows.iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, ["t1", "t3"]);
  }

  #[tokio::test]
  async fn query_rejects_malformed_filters() {
    let state = open_state().await;
    let (status, _) =
      send(state, "GET", "/documents/query?filters=not-json", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  // ── Sync ───────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn sync_returns_ordered_changes_after_cursor() {
    let state = open_state().await;
    send(
      state.clone(),
      "PUT",
      "/documents/items/i1",
      Some(json!({"data": {"n": 1}, "userId": "u1"})),
    )
    .await;
    send(
      state.clone(),
      "PUT",
      "/documents/items/i2",
      Some(json!({"data": {"n": 2}, "userId": "u1"})),
    )
    .await;

    let (status, body) =
      send(state.clone(), "GET", "/documents/sync?since=0", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["serverTime"].is_string());
    let changes = body["changes"].as_array().unwrap();
    assert_eq!(changes.len(), 2);
    let first = changes[0]["version"].as_i64().unwrap();

    let (_, tail) =
      send(state, "GET", &format!("/documents/sync?since={first}"), None)
        .await;
    assert_eq!(tail["changes"].as_array().unwrap().len(), 1);
  }

  // ── Rules ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn rules_deny_other_users_documents() {
    let state = owner_only_state().await;

    let (status, _) = send(
      state.clone(),
      "PUT",
      "/documents/users/alice",
      Some(json!({"data": {"n": 1}, "userId": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
      state.clone(),
      "PUT",
      "/documents/users/alice",
      Some(json!({"data": {"n": 2}, "userId": "mallory"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
      state.clone(),
      "GET",
      "/documents/users/alice?userId=alice",
      None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
      state.clone(),
      "GET",
      "/documents/users/alice?userId=mallory",
      None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Query results are filtered per path rather than rejected.
    let (status, rows) = send(
      state,
      "GET",
      "/documents/query?userId=mallory",
      None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(rows.as_array().unwrap().is_empty());
  }

  // ── Reset ──────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn reset_truncates_storage() {
    let state = open_state().await;
    send(
      state.clone(),
      "PUT",
      "/documents/items/i1",
      Some(json!({"data": {"n": 1}, "userId": "u1"})),
    )
    .await;

    let (status, body) =
      send(state.clone(), "POST", "/documents/internal/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["message"].is_string());

    let (status, _) = send(state, "GET", "/documents/items/i1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
  }

  fn urlencode(s: &str) -> String {
    let mut out = String::new();
    for b in s.bytes() {
      match b {
        b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
          out.push(b as char)
        }
        _ => out.push_str(&format!("%{b:02X}")),
      }
    }
    out
  }
}

// ─── Shared test helpers ─────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod test_helpers {
  use std::sync::Arc;

  use tidepool_rules::{RuleDef, RuleSet};
  use tidepool_store_sqlite::SqliteStore;

  use crate::{AppState, bus::EventBus, token::TokenIssuer};

  async fn state_with_rules(
    defs: Vec<RuleDef>,
  ) -> AppState<SqliteStore> {
    AppState {
      store:  Arc::new(SqliteStore::open_in_memory().await.unwrap()),
      rules:  Arc::new(RuleSet::compile(&defs).unwrap()),
      bus:    Arc::new(EventBus::disabled()),
      tokens: Arc::new(TokenIssuer::generate()),
    }
  }

  /// Everything allowed — exercises the engine without rule noise.
  pub(crate) async fn open_state() -> AppState<SqliteStore> {
    state_with_rules(vec![RuleDef {
      pattern: "{path=**}".to_owned(),
      read:    Some("true".to_owned()),
      write:   Some("true".to_owned()),
      delete:  Some("true".to_owned()),
    }])
    .await
  }

  /// Owner-only documents under `users/{userId}`.
  pub(crate) async fn owner_only_state() -> AppState<SqliteStore> {
    state_with_rules(vec![RuleDef {
      pattern: "users/{userId}".to_owned(),
      read:    Some("auth.userId == userId".to_owned()),
      write:   Some("auth.userId == userId".to_owned()),
      delete:  Some("auth.userId == userId".to_owned()),
    }])
    .await
  }
}
