//! Async HTTP client wrapping the tidepool document API.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tidepool_core::{
  document::Document,
  event::Event,
  path::{CollectionPath, DocPath},
  query::{Direction, Query, QueryRow},
  store::{BatchOp, Created},
  value::Payload,
};

use crate::error::{Error, Result};

/// Acknowledgement body for set/update.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteAck {
  pub success: bool,
  pub version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPage {
  pub changes:     Vec<Event>,
  pub server_time: DateTime<Utc>,
}

/// Async HTTP client for the tidepool JSON API.
///
/// Cheap to clone — the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ApiClient {
  client:   Client,
  base_url: String,
}

impl ApiClient {
  pub fn new(base_url: &str) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(Error::Network)?;
    Ok(Self { client, base_url: base_url.trim_end_matches('/').to_owned() })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/documents{path}", self.base_url)
  }

  /// URL for a document: `/documents/<collection>/<id>` plus the
  /// parent-path query parameter when the document sits in a
  /// sub-collection.
  fn doc_request(
    &self,
    method: reqwest::Method,
    workspace_id: &str,
    path: &DocPath,
  ) -> RequestBuilder {
    let collection = path.parent_collection();
    let url =
      self.url(&format!("/{}/{}", collection.name(), path.doc_id()));
    let mut req = self
      .client
      .request(method, url)
      .query(&[("workspaceId", workspace_id)]);
    if let Some(parent) = collection.parent_doc() {
      req = req.query(&[("parentPath", parent.to_string())]);
    }
    req
  }

  /// Map non-success statuses onto the error taxonomy.
  async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
      return Ok(resp);
    }
    let message = resp
      .json::<serde_json::Value>()
      .await
      .ok()
      .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
      .unwrap_or_else(|| status.to_string());
    Err(match status {
      StatusCode::CONFLICT => Error::Conflict(message),
      StatusCode::FORBIDDEN => Error::Denied(message),
      StatusCode::NOT_FOUND => Error::NotFound(message),
      StatusCode::BAD_REQUEST => Error::BadRequest(message),
      _ => Error::Server(message),
    })
  }

  // ── Auth ───────────────────────────────────────────────────────────────────

  /// `POST /documents/auth/token`
  pub async fn token(&self, user_id: &str) -> Result<String> {
    #[derive(Deserialize)]
    struct TokenResponse {
      token: String,
    }
    let resp = self
      .client
      .post(self.url("/auth/token"))
      .json(&json!({ "userId": user_id }))
      .send()
      .await?;
    let body: TokenResponse = Self::check(resp).await?.json().await?;
    Ok(body.token)
  }

  // ── Documents ──────────────────────────────────────────────────────────────

  /// `POST /documents/<collection>` — create with server-assigned id.
  pub async fn create(
    &self,
    workspace_id: &str,
    collection: &CollectionPath,
    data: &Payload,
    user_id: &str,
  ) -> Result<Created> {
    let mut body = json!({
      "data": data,
      "userId": user_id,
      "workspaceId": workspace_id,
    });
    if let Some(parent) = collection.parent_doc() {
      body["parentPath"] = json!(parent.to_string());
    }
    let resp = self
      .client
      .post(self.url(&format!("/{}", collection.name())))
      .json(&body)
      .send()
      .await?;
    Ok(Self::check(resp).await?.json().await?)
  }

  /// `GET /documents/<collection>/<id>`
  pub async fn get_doc(
    &self,
    workspace_id: &str,
    path: &DocPath,
    user_id: &str,
  ) -> Result<Document> {
    let resp = self
      .doc_request(reqwest::Method::GET, workspace_id, path)
      .query(&[("userId", user_id)])
      .send()
      .await?;
    Ok(Self::check(resp).await?.json().await?)
  }

  /// `GET /documents/<collection>` — one collection level.
  pub async fn list(
    &self,
    workspace_id: &str,
    collection: &CollectionPath,
    user_id: &str,
  ) -> Result<Vec<Document>> {
    let mut req = self
      .client
      .get(self.url(&format!("/{}", collection.name())))
      .query(&[("workspaceId", workspace_id), ("userId", user_id)]);
    if let Some(parent) = collection.parent_doc() {
      req = req.query(&[("parentPath", parent.to_string())]);
    }
    let resp = req.send().await?;
    Ok(Self::check(resp).await?.json().await?)
  }

  /// `PUT /documents/<collection>/<id>`
  pub async fn set_doc(
    &self,
    workspace_id: &str,
    path: &DocPath,
    data: &Payload,
    user_id: &str,
    expected_version: Option<i64>,
  ) -> Result<WriteAck> {
    let mut body = json!({
      "data": data,
      "userId": user_id,
      "workspaceId": workspace_id,
    });
    if let Some(parent) = path.parent_doc() {
      body["parentPath"] = json!(parent.to_string());
    }
    if let Some(expected) = expected_version {
      body["expectedVersion"] = json!(expected);
    }
    let resp = self
      .doc_request(reqwest::Method::PUT, workspace_id, path)
      .json(&body)
      .send()
      .await?;
    Ok(Self::check(resp).await?.json().await?)
  }

  /// `PATCH /documents/<collection>/<id>`
  pub async fn update_doc(
    &self,
    workspace_id: &str,
    path: &DocPath,
    patch: &Payload,
    user_id: &str,
    expected_version: Option<i64>,
  ) -> Result<WriteAck> {
    let mut body = json!({
      "data": patch,
      "userId": user_id,
      "workspaceId": workspace_id,
    });
    if let Some(parent) = path.parent_doc() {
      body["parentPath"] = json!(parent.to_string());
    }
    if let Some(expected) = expected_version {
      body["expectedVersion"] = json!(expected);
    }
    let resp = self
      .doc_request(reqwest::Method::PATCH, workspace_id, path)
      .json(&body)
      .send()
      .await?;
    Ok(Self::check(resp).await?.json().await?)
  }

  /// `DELETE /documents/<collection>/<id>` — 204 on success.
  pub async fn delete_doc(
    &self,
    workspace_id: &str,
    path: &DocPath,
    user_id: &str,
    expected_version: Option<i64>,
  ) -> Result<()> {
    let mut req = self
      .doc_request(reqwest::Method::DELETE, workspace_id, path)
      .query(&[("userId", user_id)]);
    if let Some(expected) = expected_version {
      req = req.json(&json!({ "expectedVersion": expected }));
    }
    Self::check(req.send().await?).await?;
    Ok(())
  }

  // ── Batch / query / sync ───────────────────────────────────────────────────

  /// `POST /documents/batch` — returns the final version.
  pub async fn batch(
    &self,
    workspace_id: &str,
    operations: &[BatchOp],
    user_id: &str,
  ) -> Result<i64> {
    #[derive(Deserialize)]
    struct BatchResponse {
      version: i64,
    }
    let resp = self
      .client
      .post(self.url("/batch"))
      .json(&json!({
        "operations": operations,
        "userId": user_id,
        "workspaceId": workspace_id,
      }))
      .send()
      .await?;
    let body: BatchResponse = Self::check(resp).await?.json().await?;
    Ok(body.version)
  }

  /// `GET /documents/query`
  pub async fn query(
    &self,
    workspace_id: &str,
    query: &Query,
    user_id: &str,
  ) -> Result<Vec<QueryRow>> {
    let filters = serde_json::to_string(&query.filters)
      .map_err(|e| Error::BadRequest(e.to_string()))?;
    let mut req = self
      .client
      .get(self.url("/query"))
      .query(&[
        ("workspaceId", workspace_id),
        ("userId", user_id),
        ("filters", filters.as_str()),
      ]);
    if let Some(collection) = &query.collection {
      req = req.query(&[("collection", collection.to_string())]);
    }
    if let Some(order) = &query.order_by {
      let direction = match order.direction {
        Direction::Asc => "asc",
        Direction::Desc => "desc",
      };
      req = req.query(&[
        ("orderByField", order.field.as_str()),
        ("orderDirection", direction),
      ]);
    }
    if let Some(limit) = query.limit {
      req = req.query(&[("limit", limit.to_string())]);
    }
    let resp = req.send().await?;
    Ok(Self::check(resp).await?.json().await?)
  }

  /// `GET /documents/sync?workspaceId=&since=`
  pub async fn changes_since(
    &self,
    workspace_id: &str,
    since: i64,
    user_id: &str,
  ) -> Result<SyncPage> {
    let since = since.to_string();
    let resp = self
      .client
      .get(self.url("/sync"))
      .query(&[
        ("workspaceId", workspace_id),
        ("userId", user_id),
        ("since", since.as_str()),
      ])
      .send()
      .await?;
    Ok(Self::check(resp).await?.json().await?)
  }
}
