//! Encoding and decoding helpers between Rust domain types and the
//! plain-text representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings; payloads as compact
//! JSON; paths as their canonical `/`-joined form.

use chrono::{DateTime, Utc};
use tidepool_core::{
  Error, Result,
  document::Document,
  event::{Event, EventKind},
  path::DocPath,
  value::Payload,
};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339()
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::Storage(format!("bad timestamp {s:?}: {e}")))
}

pub fn decode_payload(s: &str) -> Result<Payload> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `documents` row.
pub struct RawDocument {
  pub id:              String,
  pub workspace_id:    String,
  pub collection_name: String,
  pub path:            String,
  pub owner_id:        String,
  pub data:            String,
  pub version:         i64,
  pub deleted_at:      Option<String>,
  pub created_at:      String,
  pub updated_at:      String,
}

impl RawDocument {
  /// Column list matching the field order of [`RawDocument::from_row`].
  pub const COLUMNS: &'static str = "id, workspace_id, collection_name, \
     path, owner_id, data, version, deleted_at, created_at, updated_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:              row.get(0)?,
      workspace_id:    row.get(1)?,
      collection_name: row.get(2)?,
      path:            row.get(3)?,
      owner_id:        row.get(4)?,
      data:            row.get(5)?,
      version:         row.get(6)?,
      deleted_at:      row.get(7)?,
      created_at:      row.get(8)?,
      updated_at:      row.get(9)?,
    })
  }

  pub fn into_document(self) -> Result<Document> {
    Ok(Document {
      id:              self.id,
      workspace_id:    self.workspace_id,
      path:            DocPath::parse(&self.path)?,
      collection_name: self.collection_name,
      owner_id:        self.owner_id,
      data:            decode_payload(&self.data)?,
      version:         self.version,
      deleted_at:      self.deleted_at.as_deref().map(decode_dt).transpose()?,
      created_at:      decode_dt(&self.created_at)?,
      updated_at:      decode_dt(&self.updated_at)?,
    })
  }
}

/// Raw strings read directly from an `events` row.
pub struct RawEvent {
  pub version:      i64,
  pub id:           String,
  pub doc_id:       String,
  pub workspace_id: String,
  pub path:         String,
  pub event_type:   String,
  pub payload:      String,
  pub created_at:   String,
}

impl RawEvent {
  pub const COLUMNS: &'static str =
    "version, id, doc_id, workspace_id, path, event_type, payload, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      version:      row.get(0)?,
      id:           row.get(1)?,
      doc_id:       row.get(2)?,
      workspace_id: row.get(3)?,
      path:         row.get(4)?,
      event_type:   row.get(5)?,
      payload:      row.get(6)?,
      created_at:   row.get(7)?,
    })
  }

  pub fn into_event(self) -> Result<Event> {
    Ok(Event {
      version:      self.version,
      id:           self.id,
      doc_id:       self.doc_id,
      workspace_id: self.workspace_id,
      path:         self.path,
      event_type:   EventKind::parse(&self.event_type)?,
      payload:      decode_payload(&self.payload)?,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}
