//! Change records — the publications broadcast after committed mutations —
//! and the deterministic channel naming shared by publisher and subscriber.

use serde::{Deserialize, Serialize};

use crate::{
  path::{CollectionPath, DocPath},
  value::Payload,
};

/// How a publication describes its mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
  Created,
  Updated,
  Deleted,
}

/// The payload published on the document and collection channels after a
/// mutation commits. `version` is the event's authoritative version;
/// `data` is the full post-state for `CREATED`/`UPDATED` and absent for
/// `DELETED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
  #[serde(rename = "type")]
  pub kind:    ChangeKind,
  pub id:      String,
  pub path:    String,
  pub version: i64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub data:    Option<Payload>,
}

// ─── Channel naming ──────────────────────────────────────────────────────────

// Broker subjects use `.` as the segment delimiter, so the path transform
// replaces every `/` with `.`. Both sides of the wire use these helpers;
// nothing else may derive channel names.

/// Channel carrying every mutation of one document.
pub fn doc_subject(workspace_id: &str, path: &DocPath) -> String {
  format!("path.{workspace_id}.{}", transform(&path.to_string()))
}

/// Channel carrying every mutation within one collection (one level; no
/// sub-collection fan-out).
pub fn collection_subject(
  workspace_id: &str,
  collection: &CollectionPath,
) -> String {
  format!("collection.{workspace_id}.{}", transform(&collection.to_string()))
}

fn transform(path: &str) -> String {
  path.replace('/', ".")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn subjects_are_deterministic() {
    let doc = DocPath::parse("users/u1/posts/p1").unwrap();
    assert_eq!(doc_subject("default", &doc), "path.default.users.u1.posts.p1");
    assert_eq!(
      collection_subject("default", &doc.parent_collection()),
      "collection.default.users.u1.posts"
    );
  }
}
