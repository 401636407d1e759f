//! Per-operation write logic, shared by single mutations and batches.
//!
//! Every function here runs inside an open transaction and performs the
//! canonical two-step version assignment: append the event row, read back
//! its auto-assigned id with `last_insert_rowid()`, and bind that integer
//! into the document write. Versions are never derived implicitly inside
//! the document statement.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, params};
use tidepool_core::{
  Error, Result,
  event::EventKind,
  path::DocPath,
  value::{Payload, merge_patch},
};
use uuid::Uuid;

use crate::encode::{decode_payload, encode_dt};

/// What a write did — enough to build both the caller's outcome and the
/// publication record.
pub struct Applied {
  pub doc_id:  String,
  pub version: i64,
  pub created: bool,
  /// Full post-state for set/update; `None` for delete.
  pub data:    Option<Payload>,
}

/// The subset of a document row the write paths need.
struct CurrentRow {
  version:    i64,
  data:       String,
  deleted:    bool,
  created_at: String,
  owner_id:   String,
}

fn db(e: rusqlite::Error) -> Error {
  Error::storage(e)
}

fn fetch_current(
  conn: &Connection,
  workspace_id: &str,
  path: &DocPath,
) -> Result<Option<CurrentRow>> {
  conn
    .query_row(
      "SELECT version, data, deleted_at IS NOT NULL, created_at, owner_id
       FROM documents WHERE workspace_id = ?1 AND path = ?2",
      params![workspace_id, path.to_string()],
      |row| {
        Ok(CurrentRow {
          version:    row.get(0)?,
          data:       row.get(1)?,
          deleted:    row.get(2)?,
          created_at: row.get(3)?,
          owner_id:   row.get(4)?,
        })
      },
    )
    .optional()
    .map_err(db)
}

/// Evaluate an `expected_version` precondition against the current state.
/// An absent document compares as version 0.
fn check_expected(
  expected: Option<i64>,
  current: Option<&CurrentRow>,
) -> Result<()> {
  let Some(expected) = expected else {
    return Ok(());
  };
  let actual = current.map(|c| c.version).unwrap_or(0);
  if expected != actual {
    return Err(Error::VersionConflict { expected, actual });
  }
  Ok(())
}

/// Append one event and return its auto-assigned version. The
/// `last_insert_rowid()` read is an explicit separate call on the same
/// connection, inside the same transaction as the document write that
/// will bind it.
fn append_event(
  conn: &Connection,
  workspace_id: &str,
  path: &DocPath,
  kind: EventKind,
  payload: &Payload,
  now: DateTime<Utc>,
) -> Result<i64> {
  conn
    .execute(
      "INSERT INTO events (id, doc_id, workspace_id, path, event_type, payload, created_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      params![
        Uuid::new_v4().to_string(),
        path.doc_id(),
        workspace_id,
        path.to_string(),
        kind.as_str(),
        payload.to_string(),
        encode_dt(now),
      ],
    )
    .map_err(db)?;
  Ok(conn.last_insert_rowid())
}

/// Write the document row for a live post-state, creating or replacing it.
#[allow(clippy::too_many_arguments)]
fn upsert_document(
  conn: &Connection,
  workspace_id: &str,
  path: &DocPath,
  data: &Payload,
  version: i64,
  owner_id: &str,
  created_at: &str,
  now: DateTime<Utc>,
) -> Result<()> {
  conn
    .execute(
      "INSERT INTO documents (id, workspace_id, collection_name, path,
                              owner_id, data, version, deleted_at,
                              created_at, updated_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8, ?9)
       ON CONFLICT (workspace_id, path) DO UPDATE SET
         data = excluded.data,
         version = excluded.version,
         deleted_at = NULL,
         updated_at = excluded.updated_at",
      params![
        path.doc_id(),
        workspace_id,
        path.collection_name(),
        path.to_string(),
        owner_id,
        data.to_string(),
        version,
        created_at,
        encode_dt(now),
      ],
    )
    .map_err(db)?;
  Ok(())
}

// ─── Operations ──────────────────────────────────────────────────────────────

/// Create — auto-id flows arrive here with the id already on the path.
/// Refuses to overwrite a live document.
pub fn apply_create(
  conn: &Connection,
  workspace_id: &str,
  path: &DocPath,
  data: &Payload,
  owner_id: &str,
  now: DateTime<Utc>,
) -> Result<Applied> {
  let current = fetch_current(conn, workspace_id, path)?;
  if let Some(row) = &current
    && !row.deleted
  {
    return Err(Error::VersionConflict { expected: 0, actual: row.version });
  }

  let doc_id = path.doc_id().to_owned();
  let version =
    append_event(conn, workspace_id, path, EventKind::Insert, data, now)?;

  // A tombstoned predecessor keeps its original owner and creation time.
  let created_at = encode_dt(now);
  let (owner, created_col) = match &current {
    Some(c) => (c.owner_id.as_str(), c.created_at.as_str()),
    None => (owner_id, created_at.as_str()),
  };
  upsert_document(
    conn, workspace_id, path, data, version, owner, created_col, now,
  )?;

  Ok(Applied { doc_id, version, created: true, data: Some(data.clone()) })
}

/// Idempotent upsert with optional OCC. Resurrects tombstoned documents.
pub fn apply_set(
  conn: &Connection,
  workspace_id: &str,
  path: &DocPath,
  data: &Payload,
  owner_id: &str,
  expected: Option<i64>,
  now: DateTime<Utc>,
) -> Result<Applied> {
  let current = fetch_current(conn, workspace_id, path)?;
  check_expected(expected, current.as_ref())?;

  let doc_id = path.doc_id().to_owned();
  let created = current.as_ref().is_none_or(|c| c.deleted);
  let version =
    append_event(conn, workspace_id, path, EventKind::Set, data, now)?;

  // First creator stays the owner across overwrites and resurrections.
  let created_at = encode_dt(now);
  let (owner, created_col) = match &current {
    Some(c) => (c.owner_id.as_str(), c.created_at.as_str()),
    None => (owner_id, created_at.as_str()),
  };
  upsert_document(
    conn, workspace_id, path, data, version, owner, created_col, now,
  )?;

  Ok(Applied { doc_id, version, created, data: Some(data.clone()) })
}

/// Merge-patch update of a live document.
pub fn apply_update(
  conn: &Connection,
  workspace_id: &str,
  path: &DocPath,
  patch: &Payload,
  expected: Option<i64>,
  now: DateTime<Utc>,
) -> Result<Applied> {
  let current = fetch_current(conn, workspace_id, path)?;
  let Some(row) = current.as_ref().filter(|c| !c.deleted) else {
    return Err(Error::NotFound(path.to_string()));
  };
  check_expected(expected, current.as_ref())?;

  let mut merged = decode_payload(&row.data)?;
  merge_patch(&mut merged, patch);

  let doc_id = path.doc_id().to_owned();
  let version =
    append_event(conn, workspace_id, path, EventKind::Update, patch, now)?;
  upsert_document(
    conn,
    workspace_id,
    path,
    &merged,
    version,
    &row.owner_id,
    &row.created_at,
    now,
  )?;

  Ok(Applied { doc_id, version, created: false, data: Some(merged) })
}

/// Soft delete: mark the tombstone and advance the version. Delete is
/// idempotent — an absent or already-tombstoned target is a no-op,
/// reported as `None` so callers skip the publication. The
/// `expected_version` precondition is still enforced first.
pub fn apply_delete(
  conn: &Connection,
  workspace_id: &str,
  path: &DocPath,
  expected: Option<i64>,
  now: DateTime<Utc>,
) -> Result<Option<Applied>> {
  let current = fetch_current(conn, workspace_id, path)?;
  check_expected(expected, current.as_ref())?;
  if current.as_ref().is_none_or(|c| c.deleted) {
    return Ok(None);
  }

  let doc_id = path.doc_id().to_owned();
  let version = append_event(
    conn,
    workspace_id,
    path,
    EventKind::Delete,
    &Payload::Null,
    now,
  )?;
  conn
    .execute(
      "UPDATE documents SET version = ?1, deleted_at = ?2, updated_at = ?2
       WHERE workspace_id = ?3 AND path = ?4",
      params![version, encode_dt(now), workspace_id, path.to_string()],
    )
    .map_err(db)?;

  Ok(Some(Applied { doc_id, version, created: false, data: None }))
}
