//! Collection and document references — the chaining surface of the SDK —
//! and the optimistic read/write flows behind them.
//!
//! Writes with persistence enabled follow the optimistic rule: the cache
//! is updated first with the `-1` sentinel, the operation is queued, and
//! the network call is attempted. Success replaces the sentinel with the
//! authoritative version and removes the queue entry; an unreachable
//! server leaves both in place for the periodic drain.

use tidepool_core::{
  path::{CollectionPath, DocPath},
  value::{Payload, merge_patch},
};
use uuid::Uuid;

use crate::{
  DocSnapshot, QuerySnapshot, SnapshotMetadata, Subscription, TidepoolClient,
  WriteResult,
  cache::{PENDING_VERSION, QueueKind},
  error::Result,
  query::QueryBuilder,
};

// ─── CollectionRef ───────────────────────────────────────────────────────────

/// A reference to one collection at a workspace-scoped path.
#[derive(Clone)]
pub struct CollectionRef {
  client: TidepoolClient,
  path:   CollectionPath,
}

impl CollectionRef {
  pub(crate) fn new(client: TidepoolClient, path: CollectionPath) -> Self {
    Self { client, path }
  }

  pub fn path(&self) -> String {
    self.path.to_string()
  }

  pub fn name(&self) -> &str {
    self.path.name()
  }

  /// The document `id` within this collection.
  pub fn doc(&self, id: &str) -> Result<DocumentRef> {
    Ok(DocumentRef::new(self.client.clone(), self.path.doc(id)?))
  }

  /// The parent document, when this is a sub-collection.
  pub fn parent(&self) -> Option<DocumentRef> {
    self
      .path
      .parent_doc()
      .map(|p| DocumentRef::new(self.client.clone(), p))
  }

  /// Create a document with a server-assigned id. Requires the server to
  /// be reachable; offline flows use [`DocumentRef::set`] on a
  /// client-chosen id instead.
  pub async fn add(&self, data: Payload) -> Result<(DocumentRef, i64)> {
    let created = self
      .client
      .api()
      .create(self.client.workspace(), &self.path, &data, self.client.user())
      .await?;
    self
      .client
      .absorb_authoritative(&created.path.to_string(), &data, created.version)
      .await?;
    Ok((
      DocumentRef::new(self.client.clone(), created.path),
      created.version,
    ))
  }

  /// All documents one level inside this collection, straight from the
  /// server. For filtered or offline-tolerant reads use [`Self::query`].
  pub async fn list(&self) -> Result<Vec<tidepool_core::document::Document>> {
    self
      .client
      .api()
      .list(self.client.workspace(), &self.path, self.client.user())
      .await
  }

  /// Start building a filtered query over this collection.
  pub fn query(&self) -> QueryBuilder {
    QueryBuilder::new(self.client.clone(), self.path.clone())
  }

  /// Fetch the whole collection as a query snapshot (cache fallback when
  /// offline).
  pub async fn get(&self) -> Result<QuerySnapshot> {
    self.query().get().await
  }

  /// Subscribe to live changes of the whole collection.
  pub async fn listen<F>(&self, callback: F) -> Result<Subscription>
  where
    F: Fn(QuerySnapshot) + Send + Sync + 'static,
  {
    self.query().listen(callback).await
  }

  /// A fresh document reference with a client-generated id — usable
  /// offline, like any other `set`.
  pub fn new_doc(&self) -> Result<DocumentRef> {
    self.doc(&Uuid::new_v4().to_string())
  }
}

// ─── DocumentRef ─────────────────────────────────────────────────────────────

/// A reference to one document at a workspace-scoped path.
#[derive(Clone)]
pub struct DocumentRef {
  client: TidepoolClient,
  path:   DocPath,
}

impl DocumentRef {
  pub(crate) fn new(client: TidepoolClient, path: DocPath) -> Self {
    Self { client, path }
  }

  pub fn path(&self) -> String {
    self.path.to_string()
  }

  pub fn id(&self) -> &str {
    self.path.doc_id()
  }

  pub(crate) fn doc_path(&self) -> &DocPath {
    &self.path
  }

  pub(crate) fn client_ref(&self) -> &TidepoolClient {
    &self.client
  }

  /// The collection containing this document.
  pub fn parent(&self) -> CollectionRef {
    CollectionRef::new(self.client.clone(), self.path.parent_collection())
  }

  /// A sub-collection of this document.
  pub fn collection(&self, name: &str) -> Result<CollectionRef> {
    Ok(CollectionRef::new(self.client.clone(), self.path.collection(name)?))
  }

  // ── Reads ──────────────────────────────────────────────────────────────────

  /// Read-through get: server first, cache fallback when the server is
  /// unreachable. Snapshot metadata reflects which one answered.
  pub async fn get(&self) -> Result<DocSnapshot> {
    let client = &self.client;
    match client
      .api()
      .get_doc(client.workspace(), &self.path, client.user())
      .await
    {
      Ok(doc) => {
        client
          .absorb_authoritative(&self.path.to_string(), &doc.data, doc.version)
          .await?;
        Ok(DocSnapshot {
          data:     doc.data,
          version:  doc.version,
          metadata: SnapshotMetadata {
            from_cache:         false,
            has_pending_writes: false,
          },
        })
      }
      Err(e) if e.is_network() => {
        let Some(cache) = client.cache() else {
          return Err(e);
        };
        match cache.get_document(&self.path.to_string()).await? {
          Some(cached) => Ok(DocSnapshot {
            data:     cached.data.clone(),
            version:  cached.version,
            metadata: SnapshotMetadata {
              from_cache:         true,
              has_pending_writes: cached.has_pending_writes(),
            },
          }),
          None => Err(e),
        }
      }
      Err(e) => Err(e),
    }
  }

  /// Subscribe to live changes of this document. The callback receives
  /// `None` when the document is deleted.
  pub async fn listen<F>(&self, callback: F) -> Result<Subscription>
  where
    F: Fn(Option<DocSnapshot>) + Send + Sync + 'static,
  {
    crate::subscribe::listen_doc(self.clone(), callback).await
  }

  // ── Writes ─────────────────────────────────────────────────────────────────

  /// Upsert the full document.
  pub async fn set(&self, data: Payload) -> Result<WriteResult> {
    let path_str = self.path.to_string();
    let queued = self
      .stage(QueueKind::Set, Some(&data), |cached| {
        *cached = Some(data.clone());
      })
      .await?;

    let outcome = self
      .client
      .api()
      .set_doc(
        self.client.workspace(),
        &self.path,
        &data,
        self.client.user(),
        None,
      )
      .await;
    self
      .settle(queued, outcome.map(|ack| Some(ack.version)), &path_str)
      .await
  }

  /// Merge-patch the document. Null-valued keys in the patch erase the
  /// corresponding stored keys.
  pub async fn update(&self, patch: Payload) -> Result<WriteResult> {
    let path_str = self.path.to_string();
    let queued = self
      .stage(QueueKind::Update, Some(&patch), |cached| {
        if let Some(data) = cached {
          merge_patch(data, &patch);
        }
      })
      .await?;

    let outcome = self
      .client
      .api()
      .update_doc(
        self.client.workspace(),
        &self.path,
        &patch,
        self.client.user(),
        None,
      )
      .await;
    self
      .settle(queued, outcome.map(|ack| Some(ack.version)), &path_str)
      .await
  }

  /// Soft-delete the document.
  pub async fn delete(&self) -> Result<WriteResult> {
    let path_str = self.path.to_string();
    let queued = self.stage(QueueKind::Delete, None, |cached| *cached = None).await?;

    let outcome = self
      .client
      .api()
      .delete_doc(self.client.workspace(), &self.path, self.client.user(), None)
      .await;
    self.settle(queued, outcome.map(|()| None), &path_str).await
  }

  // ── Optimistic plumbing ────────────────────────────────────────────────────

  /// Apply the optimistic cache mutation and enqueue the operation.
  /// Returns the queue sequence when persistence is on.
  async fn stage(
    &self,
    kind: QueueKind,
    payload: Option<&Payload>,
    mutate: impl FnOnce(&mut Option<Payload>),
  ) -> Result<Option<i64>> {
    let Some(cache) = self.client.cache() else {
      return Ok(None);
    };
    let path_str = self.path.to_string();

    let mut local = cache.get_document(&path_str).await?.map(|c| c.data);
    mutate(&mut local);
    match local {
      Some(data) => {
        cache
          .upsert_document(&path_str, &data, PENDING_VERSION, true)
          .await?;
      }
      None => cache.remove_document(&path_str).await?,
    }

    let seq = cache
      .enqueue(
        kind,
        &path_str,
        self.path.collection_name(),
        self
          .path
          .parent_doc()
          .map(|p| p.to_string())
          .as_deref(),
        payload,
      )
      .await?;
    Ok(Some(seq))
  }

  /// Resolve a staged write against the network outcome: acknowledge,
  /// keep queued for the drain, or surface the server's refusal.
  async fn settle(
    &self,
    queued: Option<i64>,
    outcome: Result<Option<i64>>,
    path_str: &str,
  ) -> Result<WriteResult> {
    let cache = self.client.cache();
    match outcome {
      Ok(version) => {
        if let Some(cache) = cache {
          match version {
            Some(v) => cache.mark_synced(path_str, v).await?,
            None => cache.remove_document(path_str).await?,
          }
          if let Some(seq) = queued {
            cache.dequeue(seq).await?;
          }
        }
        Ok(WriteResult { version: version.unwrap_or(0), pending: false })
      }
      Err(e) if e.is_network() && queued.is_some() => {
        tracing::debug!(path = path_str, "write queued while offline: {e}");
        Ok(WriteResult { version: PENDING_VERSION, pending: true })
      }
      Err(e) => {
        // A definitive refusal: drop the queue entry so the drain does
        // not replay a write the server already rejected.
        if let (Some(cache), Some(seq)) = (cache, queued) {
          cache.dequeue(seq).await?;
        }
        Err(e)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use crate::{ClientConfig, TidepoolClient};

  /// A client whose endpoint refuses connections — every network call
  /// fails fast, which is exactly what the offline paths need.
  async fn offline_client() -> TidepoolClient {
    TidepoolClient::connect(
      ClientConfig::new("http://127.0.0.1:9", "u1").with_persistence(),
    )
    .await
    .unwrap()
  }

  #[tokio::test]
  async fn doc_path_round_trips_through_refs() {
    let client = offline_client().await;
    for raw in ["users/u1", "users/u1/posts/p1"] {
      assert_eq!(client.doc(raw).unwrap().path(), raw);
    }
    assert!(client.doc("users").is_err());
    assert!(client.collection("users/u1").is_err());
  }

  #[tokio::test]
  async fn chaining_matches_parsed_paths() {
    let client = offline_client().await;
    let posts = client
      .doc("users/u1")
      .unwrap()
      .collection("posts")
      .unwrap();
    assert_eq!(posts.path(), "users/u1/posts");

    let p1 = posts.doc("p1").unwrap();
    assert_eq!(p1.path(), "users/u1/posts/p1");
    assert_eq!(p1.parent().path(), "users/u1/posts");
    assert_eq!(p1.parent().parent().unwrap().path(), "users/u1");
  }

  #[tokio::test]
  async fn offline_set_is_optimistic_and_queued() {
    let client = offline_client().await;
    let doc = client.doc("items/i1").unwrap();

    let result = doc.set(json!({"n": 5})).await.unwrap();
    assert_eq!(result.version, -1);
    assert!(result.pending);

    let snapshot = doc.get().await.unwrap();
    assert!(snapshot.metadata.from_cache);
    assert!(snapshot.metadata.has_pending_writes);
    assert_eq!(snapshot.data, json!({"n": 5}));

    let queue = client.pending_ops().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].path, "items/i1");
  }

  #[tokio::test]
  async fn offline_update_merges_into_cached_state() {
    let client = offline_client().await;
    let doc = client.doc("items/i1").unwrap();

    doc.set(json!({"a": 1, "b": 2})).await.unwrap();
    doc.update(json!({"b": 3, "c": 4})).await.unwrap();

    let snapshot = doc.get().await.unwrap();
    assert_eq!(snapshot.data, json!({"a": 1, "b": 3, "c": 4}));
    assert_eq!(client.pending_ops().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn offline_delete_removes_cached_doc_and_queues() {
    let client = offline_client().await;
    let doc = client.doc("items/i1").unwrap();

    doc.set(json!({"n": 1})).await.unwrap();
    doc.delete().await.unwrap();

    // Nothing cached, nothing reachable: the network error surfaces.
    assert!(doc.get().await.is_err());
    assert_eq!(client.pending_ops().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn clear_pending_empties_the_queue() {
    let client = offline_client().await;
    client.doc("items/i1").unwrap().set(json!({})).await.unwrap();
    assert_eq!(client.pending_ops().await.unwrap().len(), 1);

    client.clear_pending().await.unwrap();
    assert!(client.pending_ops().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn without_persistence_network_failures_surface() {
    let client = TidepoolClient::connect(ClientConfig::new(
      "http://127.0.0.1:9",
      "u1",
    ))
    .await
    .unwrap();
    let doc = client.doc("items/i1").unwrap();

    let err = doc.set(json!({"n": 1})).await.unwrap_err();
    assert!(err.is_network());
  }
}
