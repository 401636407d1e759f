//! The document entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{path::DocPath, value::Payload};

/// A versioned JSON value addressed by a path within one workspace.
///
/// `version` always equals the version of the latest event applied to this
/// document; it is assigned by the storage layer at event-append time and
/// never by callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
  pub id:              String,
  pub workspace_id:    String,
  pub path:            DocPath,
  /// The last collection segment on the path.
  pub collection_name: String,
  /// The user that first created the document.
  pub owner_id:        String,
  pub data:            Payload,
  pub version:         i64,
  /// Tombstone marker; a document is visible iff this is `None`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deleted_at:      Option<DateTime<Utc>>,
  pub created_at:      DateTime<Utc>,
  pub updated_at:      DateTime<Utc>,
}

impl Document {
  pub fn is_deleted(&self) -> bool {
    self.deleted_at.is_some()
  }
}
