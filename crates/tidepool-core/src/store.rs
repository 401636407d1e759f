//! The `DocumentStore` trait and its operation input/output types.
//!
//! The trait is implemented by storage backends (e.g.
//! `tidepool-store-sqlite`). Higher layers (the HTTP server, tests) depend
//! on this abstraction, not on any concrete backend.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
  change::ChangeRecord,
  document::Document,
  error::Result,
  event::Event,
  path::{CollectionPath, DocPath},
  query::{Query, QueryRow},
  value::Payload,
};

// ─── Operation types ─────────────────────────────────────────────────────────

/// Result of [`DocumentStore::create`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Created {
  pub id:      String,
  pub path:    DocPath,
  pub version: i64,
}

/// Result of a single `set`/`update`: the assigned version, whether the
/// write brought the document into existence, and the full post-state data
/// (already merged for updates) for publication.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
  pub version: i64,
  pub created: bool,
  pub data:    Payload,
}

/// One operation within an atomic batch. Wire format matches the HTTP
/// batch body: `{"type": "set", "path": "...", "data": ..,
/// "expectedVersion": ..}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BatchOp {
  #[serde(rename_all = "camelCase")]
  Set {
    path:             DocPath,
    data:             Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expected_version: Option<i64>,
  },
  #[serde(rename_all = "camelCase")]
  Update {
    path:             DocPath,
    data:             Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expected_version: Option<i64>,
  },
  #[serde(rename_all = "camelCase")]
  Delete {
    path:             DocPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expected_version: Option<i64>,
  },
}

impl BatchOp {
  pub fn path(&self) -> &DocPath {
    match self {
      Self::Set { path, .. }
      | Self::Update { path, .. }
      | Self::Delete { path, .. } => path,
    }
  }
}

/// Result of a committed batch: the final (largest) version and one change
/// record per operation, in batch order, ready for publication.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
  pub version: i64,
  pub changes: Vec<ChangeRecord>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a tidepool document store backend.
///
/// Every operation is scoped to one workspace. All writes append exactly
/// one event whose auto-assigned id becomes the document's version; the
/// append and the document mutation are one atomic unit, as is a whole
/// batch.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait DocumentStore: Send + Sync {
  /// Create a document at a pre-generated path (auto-id flows generate the
  /// id before calling). Appends an `INSERT` event. Fails with
  /// `VersionConflict` if a live document already occupies the path.
  fn create<'a>(
    &'a self,
    workspace_id: &'a str,
    path: &'a DocPath,
    data: Payload,
    owner_id: &'a str,
  ) -> impl Future<Output = Result<Created>> + Send + 'a;

  /// Idempotent upsert. Creates the document if absent (or tombstoned),
  /// overwrites it otherwise. `expected_version` enables OCC.
  fn set<'a>(
    &'a self,
    workspace_id: &'a str,
    path: &'a DocPath,
    data: Payload,
    owner_id: &'a str,
    expected_version: Option<i64>,
  ) -> impl Future<Output = Result<WriteOutcome>> + Send + 'a;

  /// Merge-patch update of an existing live document. Fails with
  /// `NotFound` when the target is absent or tombstoned.
  fn update<'a>(
    &'a self,
    workspace_id: &'a str,
    path: &'a DocPath,
    patch: Payload,
    expected_version: Option<i64>,
  ) -> impl Future<Output = Result<WriteOutcome>> + Send + 'a;

  /// Soft delete: marks the tombstone and appends a `DELETE` event,
  /// returning the new version. Idempotent — deleting an absent or
  /// already-tombstoned document is a no-op reported as `None`, with no
  /// event appended. `expected_version` is still enforced.
  fn delete<'a>(
    &'a self,
    workspace_id: &'a str,
    path: &'a DocPath,
    expected_version: Option<i64>,
  ) -> impl Future<Output = Result<Option<i64>>> + Send + 'a;

  /// Fetch one live document. `None` for missing or tombstoned paths.
  fn get<'a>(
    &'a self,
    workspace_id: &'a str,
    path: &'a DocPath,
  ) -> impl Future<Output = Result<Option<Document>>> + Send + 'a;

  /// All live documents exactly one level inside `collection` — no
  /// transitive descent into sub-collections.
  fn list<'a>(
    &'a self,
    workspace_id: &'a str,
    collection: &'a CollectionPath,
  ) -> impl Future<Output = Result<Vec<Document>>> + Send + 'a;

  /// Apply an ordered sequence of operations as one atomic unit. Event
  /// versions are contiguous within the batch; any failure rolls the whole
  /// batch back.
  fn batch<'a>(
    &'a self,
    workspace_id: &'a str,
    ops: Vec<BatchOp>,
    owner_id: &'a str,
  ) -> impl Future<Output = Result<BatchOutcome>> + Send + 'a;

  /// Filter/order/limit query over live documents in the workspace.
  fn query<'a>(
    &'a self,
    workspace_id: &'a str,
    query: &'a Query,
  ) -> impl Future<Output = Result<Vec<QueryRow>>> + Send + 'a;

  /// Events with version strictly greater than `since`, in version order.
  /// The client's incremental sync replays these against its cache.
  fn changes_since<'a>(
    &'a self,
    workspace_id: &'a str,
    since: i64,
  ) -> impl Future<Output = Result<Vec<Event>>> + Send + 'a;

  /// Drop and recreate all state. Admin/test surface only.
  fn reset(&self) -> impl Future<Output = Result<()>> + Send + '_;
}
