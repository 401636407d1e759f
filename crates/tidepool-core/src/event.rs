//! The append-only event log — the authoritative version source.
//!
//! Every successful write appends exactly one event. The event's
//! auto-assigned row id is the workspace-wide monotone version, and the
//! same integer is bound into the owning document's `version` field within
//! the same atomic unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  error::{Error, Result},
  value::Payload,
};

/// The kind of write an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
  Insert,
  Update,
  Set,
  Delete,
}

impl EventKind {
  /// The discriminant string stored in the `event_type` column.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Insert => "INSERT",
      Self::Update => "UPDATE",
      Self::Set => "SET",
      Self::Delete => "DELETE",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "INSERT" => Ok(Self::Insert),
      "UPDATE" => Ok(Self::Update),
      "SET" => Ok(Self::Set),
      "DELETE" => Ok(Self::Delete),
      other => {
        Err(Error::MalformedRequest(format!("unknown event type: {other:?}")))
      }
    }
  }
}

/// One record of the event log. Append-only; no field is ever updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
  /// Auto-assigned sequential integer; strictly increasing per workspace.
  pub version:      i64,
  pub id:           String,
  pub doc_id:       String,
  pub workspace_id: String,
  /// Full path of the target document; lets consumers replay the stream
  /// into a path-keyed cache without a side lookup.
  pub path:         String,
  pub event_type:   EventKind,
  /// The write itself: full data for INSERT/SET, the patch for UPDATE,
  /// null for DELETE.
  pub payload:      Payload,
  pub created_at:   DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kind_round_trips_through_discriminant() {
    for kind in
      [EventKind::Insert, EventKind::Update, EventKind::Set, EventKind::Delete]
    {
      assert_eq!(EventKind::parse(kind.as_str()).unwrap(), kind);
    }
    assert!(EventKind::parse("UPSERT").is_err());
  }
}
