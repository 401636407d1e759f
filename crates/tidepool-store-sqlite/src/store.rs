//! [`SqliteStore`] — the SQLite implementation of [`DocumentStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension as _, params};
use tidepool_core::{
  Error, Result,
  change::{ChangeKind, ChangeRecord},
  document::Document,
  event::Event,
  path::{CollectionPath, DocPath},
  query::{Query, QueryRow},
  store::{BatchOp, BatchOutcome, Created, DocumentStore, WriteOutcome},
  value::Payload,
};

use crate::{
  apply::{
    Applied, apply_create, apply_delete, apply_set, apply_update,
  },
  encode::{RawDocument, RawEvent, decode_payload},
  query::compile,
  schema::{DROP, SCHEMA},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A tidepool document store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path)
      .await
      .map_err(Error::storage)?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory()
      .await
      .map_err(Error::storage)?;
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
      .map_err(Error::storage)
  }

  /// Run `f` inside one transaction; commit on `Ok`, roll back on `Err`.
  async fn write<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    self
      .conn
      .call(move |conn| {
        let tx = match conn.transaction() {
          Ok(tx) => tx,
          Err(e) => return Ok(Err(Error::storage(e))),
        };
        let out = match f(&tx) {
          Ok(value) => tx.commit().map_err(Error::storage).map(|()| value),
          Err(e) => {
            let _ = tx.rollback();
            Err(e)
          }
        };
        Ok(out)
      })
      .await
      .map_err(Error::storage)?
  }

  /// Run a read-only closure on the connection thread.
  async fn read<T, F>(&self, f: F) -> Result<T>
  where
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
  {
    self
      .conn
      .call(move |conn| Ok(f(conn)))
      .await
      .map_err(Error::storage)?
  }
}

/// Build the publication record for one applied write.
fn change_record(path: &DocPath, applied: &Applied) -> ChangeRecord {
  let kind = match &applied.data {
    None => ChangeKind::Deleted,
    Some(_) if applied.created => ChangeKind::Created,
    Some(_) => ChangeKind::Updated,
  };
  ChangeRecord {
    kind,
    id: applied.doc_id.clone(),
    path: path.to_string(),
    version: applied.version,
    data: applied.data.clone(),
  }
}

// ─── DocumentStore impl ──────────────────────────────────────────────────────

impl DocumentStore for SqliteStore {
  async fn create(
    &self,
    workspace_id: &str,
    path: &DocPath,
    data: Payload,
    owner_id: &str,
  ) -> Result<Created> {
    let ws = workspace_id.to_owned();
    let owner = owner_id.to_owned();
    let path = path.clone();
    self
      .write(move |conn| {
        let applied =
          apply_create(conn, &ws, &path, &data, &owner, Utc::now())?;
        Ok(Created {
          id:      applied.doc_id,
          path:    path.clone(),
          version: applied.version,
        })
      })
      .await
  }

  async fn set(
    &self,
    workspace_id: &str,
    path: &DocPath,
    data: Payload,
    owner_id: &str,
    expected_version: Option<i64>,
  ) -> Result<WriteOutcome> {
    let ws = workspace_id.to_owned();
    let owner = owner_id.to_owned();
    let path = path.clone();
    self
      .write(move |conn| {
        let applied =
          apply_set(conn, &ws, &path, &data, &owner, expected_version, Utc::now())?;
        Ok(WriteOutcome {
          version: applied.version,
          created: applied.created,
          data:    applied.data.unwrap_or(Payload::Null),
        })
      })
      .await
  }

  async fn update(
    &self,
    workspace_id: &str,
    path: &DocPath,
    patch: Payload,
    expected_version: Option<i64>,
  ) -> Result<WriteOutcome> {
    let ws = workspace_id.to_owned();
    let path = path.clone();
    self
      .write(move |conn| {
        let applied =
          apply_update(conn, &ws, &path, &patch, expected_version, Utc::now())?;
        Ok(WriteOutcome {
          version: applied.version,
          created: false,
          data:    applied.data.unwrap_or(Payload::Null),
        })
      })
      .await
  }

  async fn delete(
    &self,
    workspace_id: &str,
    path: &DocPath,
    expected_version: Option<i64>,
  ) -> Result<Option<i64>> {
    let ws = workspace_id.to_owned();
    let path = path.clone();
    self
      .write(move |conn| {
        let applied =
          apply_delete(conn, &ws, &path, expected_version, Utc::now())?;
        Ok(applied.map(|a| a.version))
      })
      .await
  }

  async fn get(
    &self,
    workspace_id: &str,
    path: &DocPath,
  ) -> Result<Option<Document>> {
    let ws = workspace_id.to_owned();
    let path_str = path.to_string();
    let raw: Option<RawDocument> = self
      .read(move |conn| {
        conn
          .query_row(
            &format!(
              "SELECT {} FROM documents
               WHERE workspace_id = ?1 AND path = ?2 AND deleted_at IS NULL",
              RawDocument::COLUMNS
            ),
            params![ws, path_str],
            RawDocument::from_row,
          )
          .optional()
          .map_err(Error::storage)
      })
      .await?;

    raw.map(RawDocument::into_document).transpose()
  }

  async fn list(
    &self,
    workspace_id: &str,
    collection: &CollectionPath,
  ) -> Result<Vec<Document>> {
    let ws = workspace_id.to_owned();
    let name = collection.name().to_owned();
    let raws: Vec<RawDocument> = self
      .read(move |conn| {
        let mut stmt = conn
          .prepare(&format!(
            "SELECT {} FROM documents
             WHERE workspace_id = ?1 AND collection_name = ?2
               AND deleted_at IS NULL
             ORDER BY path",
            RawDocument::COLUMNS
          ))
          .map_err(Error::storage)?;
        stmt
          .query_map(params![ws, name], RawDocument::from_row)
          .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
          .map_err(Error::storage)
      })
      .await?;

    // The collection_name prefilter also matches same-named collections at
    // other depths; keep exactly the documents one level inside ours.
    let mut documents = Vec::with_capacity(raws.len());
    for raw in raws {
      let doc = raw.into_document()?;
      if doc.path.parent_collection() == *collection {
        documents.push(doc);
      }
    }
    Ok(documents)
  }

  async fn batch(
    &self,
    workspace_id: &str,
    ops: Vec<BatchOp>,
    owner_id: &str,
  ) -> Result<BatchOutcome> {
    if ops.is_empty() {
      return Err(Error::MalformedRequest("empty batch".into()));
    }
    let ws = workspace_id.to_owned();
    let owner = owner_id.to_owned();
    self
      .write(move |conn| {
        let now = Utc::now();
        let mut changes = Vec::with_capacity(ops.len());
        for op in &ops {
          let applied = match op {
            BatchOp::Set { path, data, expected_version } => Some(
              apply_set(conn, &ws, path, data, &owner, *expected_version, now)?,
            ),
            BatchOp::Update { path, data, expected_version } => {
              Some(apply_update(conn, &ws, path, data, *expected_version, now)?)
            }
            // Idempotent: a delete of an absent target appends no event
            // and publishes nothing.
            BatchOp::Delete { path, expected_version } => {
              apply_delete(conn, &ws, path, *expected_version, now)?
            }
          };
          if let Some(applied) = applied {
            changes.push(change_record(op.path(), &applied));
          }
        }
        // A batch of nothing but no-op deletes commits without writes.
        let version = changes.last().map(|c| c.version).unwrap_or(0);
        Ok(BatchOutcome { version, changes })
      })
      .await
  }

  async fn query(
    &self,
    workspace_id: &str,
    query: &Query,
  ) -> Result<Vec<QueryRow>> {
    let compiled = compile(workspace_id, query);
    let raws: Vec<(String, String, String, i64)> = self
      .read(move |conn| {
        let mut stmt = conn.prepare(&compiled.sql).map_err(Error::storage)?;
        stmt
          .query_map(rusqlite::params_from_iter(compiled.params), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
          })
          .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
          .map_err(Error::storage)
      })
      .await?;

    raws
      .into_iter()
      .map(|(id, path, data, version)| {
        Ok(QueryRow { id, path, data: decode_payload(&data)?, version })
      })
      .collect()
  }

  async fn changes_since(
    &self,
    workspace_id: &str,
    since: i64,
  ) -> Result<Vec<Event>> {
    let ws = workspace_id.to_owned();
    let raws: Vec<RawEvent> = self
      .read(move |conn| {
        let mut stmt = conn
          .prepare(&format!(
            "SELECT {} FROM events
             WHERE workspace_id = ?1 AND version > ?2
             ORDER BY version ASC",
            RawEvent::COLUMNS
          ))
          .map_err(Error::storage)?;
        stmt
          .query_map(params![ws, since], RawEvent::from_row)
          .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
          .map_err(Error::storage)
      })
      .await?;

    raws.into_iter().map(RawEvent::into_event).collect()
  }

  async fn reset(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(DROP)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await
      .map_err(Error::storage)
  }
}
