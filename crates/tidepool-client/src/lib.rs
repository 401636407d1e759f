//! Client SDK for tidepool.
//!
//! Wraps the HTTP document API with an offline-tolerant local cache, a
//! durable outbound write queue, fluent queries with a local fallback,
//! live subscriptions over the broker, and an OCC transaction runtime.
//!
//! ```rust,ignore
//! let client = TidepoolClient::connect(
//!   ClientConfig::new("http://localhost:4550", "u1").with_persistence(),
//! )
//! .await?;
//! let tasks = client.collection("tasks")?;
//! let (doc, _version) = tasks.add(json!({"status": "active"})).await?;
//! let snapshot = doc.get().await?;
//! ```

pub mod cache;
pub mod error;
pub mod http;
pub mod query;
pub mod refs;
pub mod subscribe;
pub mod sync;
pub mod transaction;

use std::{path::PathBuf, sync::Arc};

use serde_json::Value;
use tidepool_core::{
  path::{CollectionPath, DocPath},
  query::QueryRow,
  value::Payload,
};
use tokio::sync::Mutex;

pub use error::{Error, Result};
pub use refs::{CollectionRef, DocumentRef};
pub use subscribe::Subscription;
pub use transaction::Transaction;

use crate::{
  cache::{CacheStore, QueuedOp},
  http::ApiClient,
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Connection settings for a tidepool client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
  /// HTTP base URL of the tidepool server.
  pub endpoint:           String,
  /// Broker URL; live subscriptions are unavailable when absent.
  pub broker_url:         Option<String>,
  pub workspace_id:       String,
  /// The caller identity asserted on every operation.
  pub user_id:            String,
  /// Enables the local cache and outbound queue.
  pub enable_persistence: bool,
  /// Cache file location; in-memory when `None`.
  pub cache_path:         Option<PathBuf>,
}

impl ClientConfig {
  pub fn new(endpoint: impl Into<String>, user_id: impl Into<String>) -> Self {
    Self {
      endpoint:           endpoint.into(),
      broker_url:         None,
      workspace_id:       "default".to_owned(),
      user_id:            user_id.into(),
      enable_persistence: false,
      cache_path:         None,
    }
  }

  pub fn with_broker(mut self, url: impl Into<String>) -> Self {
    self.broker_url = Some(url.into());
    self
  }

  pub fn with_workspace(mut self, workspace_id: impl Into<String>) -> Self {
    self.workspace_id = workspace_id.into();
    self
  }

  pub fn with_persistence(mut self) -> Self {
    self.enable_persistence = true;
    self
  }

  pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.cache_path = Some(path.into());
    self.enable_persistence = true;
    self
  }
}

// ─── Snapshots ───────────────────────────────────────────────────────────────

/// Where a read came from and whether local unsynced writes shaped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMetadata {
  pub from_cache:         bool,
  pub has_pending_writes: bool,
}

/// A point-in-time read of one document.
#[derive(Debug, Clone)]
pub struct DocSnapshot {
  pub data:     Payload,
  pub version:  i64,
  pub metadata: SnapshotMetadata,
}

/// A point-in-time result set of a query.
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
  pub rows:     Vec<QueryRow>,
  pub metadata: SnapshotMetadata,
}

/// Outcome of a write. `version` is `-1` and `pending` is `true` when the
/// write was queued because the server was unreachable.
#[derive(Debug, Clone, Copy)]
pub struct WriteResult {
  pub version: i64,
  pub pending: bool,
}

// ─── Client ──────────────────────────────────────────────────────────────────

pub(crate) struct ClientInner {
  pub(crate) config: ClientConfig,
  pub(crate) api:    ApiClient,
  pub(crate) cache:  Option<CacheStore>,
  /// One broker connection shared by every subscription.
  pub(crate) broker: Mutex<Option<async_nats::Client>>,
}

/// The tidepool client. Cheap to clone; all clones share one cache, one
/// queue, and one broker connection.
#[derive(Clone)]
pub struct TidepoolClient {
  pub(crate) inner: Arc<ClientInner>,
}

impl TidepoolClient {
  /// Build a client. Opens the cache when persistence is enabled and
  /// starts the periodic queue-drain (5 s) and incremental-sync (30 s)
  /// triggers; both are cheap when idle and stop when the last clone of
  /// the client is dropped.
  pub async fn connect(config: ClientConfig) -> Result<Self> {
    let api = ApiClient::new(&config.endpoint)?;
    let cache = if config.enable_persistence {
      Some(match &config.cache_path {
        Some(path) => CacheStore::open(path).await?,
        None => CacheStore::open_in_memory().await?,
      })
    } else {
      None
    };

    let client = Self {
      inner: Arc::new(ClientInner {
        config,
        api,
        cache,
        broker: Mutex::new(None),
      }),
    };
    if client.inner.cache.is_some() {
      sync::spawn_background(&client);
    }
    Ok(client)
  }

  /// A reference to a collection, by full path (`"tasks"`,
  /// `"users/u1/posts"`).
  pub fn collection(&self, path: &str) -> Result<CollectionRef> {
    Ok(CollectionRef::new(self.clone(), CollectionPath::parse(path)?))
  }

  /// A reference to a document, by full path (`"tasks/t1"`).
  pub fn doc(&self, path: &str) -> Result<DocumentRef> {
    Ok(DocumentRef::new(self.clone(), DocPath::parse(path)?))
  }

  /// Run a read-modify-write transaction with OCC retries. See
  /// [`transaction`].
  pub async fn run_transaction<F>(&self, f: F) -> Result<i64>
  where
    F: AsyncFnMut(&mut Transaction) -> Result<()>,
  {
    transaction::run(self, f).await
  }

  // ── Queue surface ──────────────────────────────────────────────────────────

  /// The outbound queue, oldest first — for inspection of writes that
  /// keep failing for non-network reasons.
  pub async fn pending_ops(&self) -> Result<Vec<QueuedOp>> {
    match self.cache() {
      Some(cache) => cache.queued_ops().await,
      None => Ok(Vec::new()),
    }
  }

  /// Drop every queued write without replaying it.
  pub async fn clear_pending(&self) -> Result<()> {
    match self.cache() {
      Some(cache) => cache.clear_queue().await,
      None => Ok(()),
    }
  }

  /// Replay the queue now instead of waiting for the periodic trigger.
  /// Returns how many entries were drained before the first failure.
  pub async fn drain_queue(&self) -> Result<usize> {
    sync::drain(self).await
  }

  /// Pull and apply the incremental change stream now. Returns how many
  /// events were applied to the cache.
  pub async fn sync_once(&self) -> Result<usize> {
    sync::sync_once(self).await
  }

  // ── Internals ──────────────────────────────────────────────────────────────

  pub(crate) fn cache(&self) -> Option<&CacheStore> {
    self.inner.cache.as_ref()
  }

  pub(crate) fn api(&self) -> &ApiClient {
    &self.inner.api
  }

  pub(crate) fn workspace(&self) -> &str {
    &self.inner.config.workspace_id
  }

  pub(crate) fn user(&self) -> &str {
    &self.inner.config.user_id
  }

  /// Write authoritative server state into the cache unless a pending
  /// local write owns the entry.
  pub(crate) async fn absorb_authoritative(
    &self,
    path: &str,
    data: &Value,
    version: i64,
  ) -> Result<()> {
    let Some(cache) = self.cache() else {
      return Ok(());
    };
    let pending = cache
      .get_document(path)
      .await?
      .is_some_and(|c| c.has_pending_writes());
    if !pending {
      cache.upsert_document(path, data, version, false).await?;
    }
    Ok(())
  }

  /// The shared broker connection, established lazily with a token from
  /// the server.
  pub(crate) async fn broker(&self) -> Result<async_nats::Client> {
    let mut guard = self.inner.broker.lock().await;
    if let Some(client) = guard.as_ref() {
      return Ok(client.clone());
    }
    let Some(url) = &self.inner.config.broker_url else {
      return Err(Error::Broker(
        "no brokerUrl configured; live subscriptions are disabled".into(),
      ));
    };

    let token = self.inner.api.token(self.user()).await?;
    let client = async_nats::ConnectOptions::new()
      .name("tidepool-client")
      .token(token)
      .connect(url)
      .await
      .map_err(Error::broker)?;
    *guard = Some(client.clone());
    Ok(client)
  }
}
