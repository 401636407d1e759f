//! The durable local mirror: cached documents and the outbound write
//! queue, both in a small SQLite database.
//!
//! The cache is the source of reads while offline and the staging area
//! for optimistic writes. A cached version of `-1` is the sentinel for
//! "written locally, not yet acknowledged by the server".

use std::path::Path;

use rusqlite::{OptionalExtension as _, params};
use serde_json::Value;
use tidepool_core::value::Payload;

use crate::error::{Error, Result};

/// Sentinel version for optimistic, unacknowledged writes.
pub const PENDING_VERSION: i64 = -1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    path    TEXT PRIMARY KEY,
    data    TEXT NOT NULL,
    version INTEGER NOT NULL,
    pending INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS queue (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    kind            TEXT NOT NULL,     -- 'set' | 'update' | 'delete'
    path            TEXT NOT NULL,
    collection_name TEXT NOT NULL,
    parent_path     TEXT,
    data            TEXT
);

CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

// ─── Row types ───────────────────────────────────────────────────────────────

/// One locally mirrored document.
#[derive(Debug, Clone)]
pub struct CachedDoc {
  pub path:    String,
  pub data:    Payload,
  pub version: i64,
  pub pending: bool,
}

impl CachedDoc {
  pub fn has_pending_writes(&self) -> bool {
    self.pending || self.version == PENDING_VERSION
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
  Set,
  Update,
  Delete,
}

impl QueueKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Set => "set",
      Self::Update => "update",
      Self::Delete => "delete",
    }
  }

  fn parse(s: &str) -> Result<Self> {
    match s {
      "set" => Ok(Self::Set),
      "update" => Ok(Self::Update),
      "delete" => Ok(Self::Delete),
      other => Err(Error::Cache(format!("unknown queue kind: {other:?}"))),
    }
  }
}

/// One queued outbound operation, in submission order.
#[derive(Debug, Clone)]
pub struct QueuedOp {
  pub seq:             i64,
  pub kind:            QueueKind,
  pub path:            String,
  pub collection_name: String,
  pub parent_path:     Option<String>,
  pub data:            Option<Payload>,
}

fn decode_queued(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, String, String, Option<String>, Option<String>)> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
  ))
}

fn into_queued(
  (seq, kind, path, collection_name, parent_path, data): (
    i64,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
  ),
) -> Result<QueuedOp> {
  Ok(QueuedOp {
    seq,
    kind: QueueKind::parse(&kind)?,
    path,
    collection_name,
    parent_path,
    data: data
      .as_deref()
      .map(serde_json::from_str::<Value>)
      .transpose()
      .map_err(Error::cache)?,
  })
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// The client's durable key-value store. Cloning is cheap.
#[derive(Clone)]
pub struct CacheStore {
  conn: tokio_rusqlite::Connection,
}

impl CacheStore {
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path)
      .await
      .map_err(Error::cache)?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory()
      .await
      .map_err(Error::cache)?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await
      .map_err(Error::cache)
  }

  // ── Documents ──────────────────────────────────────────────────────────────

  pub async fn upsert_document(
    &self,
    path: &str,
    data: &Payload,
    version: i64,
    pending: bool,
  ) -> Result<()> {
    let path = path.to_owned();
    let data = data.to_string();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO documents (path, data, version, pending)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (path) DO UPDATE SET
             data = excluded.data,
             version = excluded.version,
             pending = excluded.pending",
          params![path, data, version, pending as i64],
        )?;
        Ok(())
      })
      .await
      .map_err(Error::cache)
  }

  /// Clear the pending flag and record the authoritative version, keeping
  /// the cached data.
  pub async fn mark_synced(&self, path: &str, version: i64) -> Result<()> {
    let path = path.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE documents SET version = ?1, pending = 0 WHERE path = ?2",
          params![version, path],
        )?;
        Ok(())
      })
      .await
      .map_err(Error::cache)
  }

  pub async fn get_document(&self, path: &str) -> Result<Option<CachedDoc>> {
    let path = path.to_owned();
    let raw: Option<(String, String, i64, bool)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT path, data, version, pending FROM documents WHERE path = ?1",
              params![path],
              |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
              },
            )
            .optional()?,
        )
      })
      .await
      .map_err(Error::cache)?;

    raw
      .map(|(path, data, version, pending)| {
        Ok(CachedDoc {
          path,
          data: serde_json::from_str(&data).map_err(Error::cache)?,
          version,
          pending,
        })
      })
      .transpose()
  }

  pub async fn remove_document(&self, path: &str) -> Result<()> {
    let path = path.to_owned();
    self
      .conn
      .call(move |conn| {
        conn.execute("DELETE FROM documents WHERE path = ?1", params![path])?;
        Ok(())
      })
      .await
      .map_err(Error::cache)
  }

  /// All cached documents exactly one level inside `collection` (a full
  /// collection path).
  pub async fn documents_under(
    &self,
    collection: &str,
  ) -> Result<Vec<CachedDoc>> {
    let prefix = format!("{collection}/");
    let depth = collection.split('/').count() + 1;
    let raws: Vec<(String, String, i64, bool)> = self
      .conn
      .call(move |conn| {
        // Exact prefix match; LIKE would treat `%`/`_` in ids as wildcards.
        let mut stmt = conn.prepare(
          "SELECT path, data, version, pending FROM documents
           WHERE substr(path, 1, ?2) = ?1 ORDER BY path",
        )?;
        let rows = stmt
          .query_map(params![prefix, prefix.len() as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(Error::cache)?;

    let mut docs = Vec::new();
    for (path, data, version, pending) in raws {
      if path.split('/').count() != depth {
        continue;
      }
      docs.push(CachedDoc {
        path,
        data: serde_json::from_str(&data).map_err(Error::cache)?,
        version,
        pending,
      });
    }
    Ok(docs)
  }

  // ── Queue ──────────────────────────────────────────────────────────────────

  pub async fn enqueue(
    &self,
    kind: QueueKind,
    path: &str,
    collection_name: &str,
    parent_path: Option<&str>,
    data: Option<&Payload>,
  ) -> Result<i64> {
    let path = path.to_owned();
    let collection_name = collection_name.to_owned();
    let parent_path = parent_path.map(str::to_owned);
    let data = data.map(Payload::to_string);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO queue (kind, path, collection_name, parent_path, data)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          params![kind.as_str(), path, collection_name, parent_path, data],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await
      .map_err(Error::cache)
  }

  /// The queue in submission order — exposed so callers can inspect and
  /// clear writes that keep failing for non-network reasons.
  pub async fn queued_ops(&self) -> Result<Vec<QueuedOp>> {
    let raws = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT seq, kind, path, collection_name, parent_path, data
           FROM queue ORDER BY seq",
        )?;
        let rows = stmt
          .query_map([], decode_queued)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await
      .map_err(Error::cache)?;
    raws.into_iter().map(into_queued).collect()
  }

  pub async fn first_queued(&self) -> Result<Option<QueuedOp>> {
    let raw = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT seq, kind, path, collection_name, parent_path, data
               FROM queue ORDER BY seq LIMIT 1",
              [],
              decode_queued,
            )
            .optional()?,
        )
      })
      .await
      .map_err(Error::cache)?;
    raw.map(into_queued).transpose()
  }

  pub async fn dequeue(&self, seq: i64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute("DELETE FROM queue WHERE seq = ?1", params![seq])?;
        Ok(())
      })
      .await
      .map_err(Error::cache)
  }

  pub async fn clear_queue(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute("DELETE FROM queue", [])?;
        Ok(())
      })
      .await
      .map_err(Error::cache)
  }

  // ── Sync cursor ────────────────────────────────────────────────────────────

  pub async fn last_synced_version(&self) -> Result<i64> {
    let raw: Option<String> = self
      .conn
      .call(|conn| {
        Ok(
          conn
            .query_row(
              "SELECT value FROM meta WHERE key = 'last_synced_version'",
              [],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await
      .map_err(Error::cache)?;
    Ok(raw.and_then(|s| s.parse().ok()).unwrap_or(0))
  }

  pub async fn set_last_synced_version(&self, version: i64) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO meta (key, value) VALUES ('last_synced_version', ?1)
           ON CONFLICT (key) DO UPDATE SET value = excluded.value",
          params![version.to_string()],
        )?;
        Ok(())
      })
      .await
      .map_err(Error::cache)
  }
}
