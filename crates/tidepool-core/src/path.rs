//! The path model — slash-separated sequences alternating collection
//! segments and document ids.
//!
//! A path with an odd number of segments names a collection
//! (`users/u1/posts`), an even number names a document (`users/u1`).
//! Sub-collections nest to arbitrary depth by continuing the path. The two
//! arities are separate types so that operations which only make sense on
//! one of them are unrepresentable on the other.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Validate a single path segment: non-empty, no separator, no whitespace.
fn check_segment(seg: &str) -> Result<()> {
  if seg.is_empty() {
    return Err(Error::MalformedPath("empty path segment".into()));
  }
  if seg.contains('/') || seg.chars().any(char::is_whitespace) {
    return Err(Error::MalformedPath(format!("invalid segment: {seg:?}")));
  }
  Ok(())
}

fn split_segments(raw: &str) -> Result<Vec<String>> {
  let trimmed = raw.trim_matches('/');
  if trimmed.is_empty() {
    return Err(Error::MalformedPath("empty path".into()));
  }
  let segments: Vec<String> =
    trimmed.split('/').map(str::to_owned).collect();
  for seg in &segments {
    check_segment(seg)?;
  }
  Ok(segments)
}

// ─── DocPath ─────────────────────────────────────────────────────────────────

/// A fully-qualified document path: an even, non-zero number of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocPath {
  segments: Vec<String>,
}

impl DocPath {
  /// Parse from a `/`-separated string. Fails on odd arity or bad segments.
  pub fn parse(raw: &str) -> Result<Self> {
    let segments = split_segments(raw)?;
    if segments.len() % 2 != 0 {
      return Err(Error::MalformedPath(format!(
        "{raw:?} has an odd number of segments; expected a document path"
      )));
    }
    Ok(Self { segments })
  }

  /// The document id — the final segment.
  pub fn doc_id(&self) -> &str {
    self.segments.last().expect("DocPath is never empty")
  }

  /// The path of the collection containing this document.
  pub fn parent_collection(&self) -> CollectionPath {
    CollectionPath {
      segments: self.segments[..self.segments.len() - 1].to_vec(),
    }
  }

  /// The name of the containing collection — the penultimate segment.
  pub fn collection_name(&self) -> &str {
    &self.segments[self.segments.len() - 2]
  }

  /// The parent document, if this document lives in a sub-collection.
  pub fn parent_doc(&self) -> Option<DocPath> {
    (self.segments.len() > 2).then(|| DocPath {
      segments: self.segments[..self.segments.len() - 2].to_vec(),
    })
  }

  /// A sub-collection of this document.
  pub fn collection(&self, name: &str) -> Result<CollectionPath> {
    check_segment(name)?;
    let mut segments = self.segments.clone();
    segments.push(name.to_owned());
    Ok(CollectionPath { segments })
  }

  pub fn segments(&self) -> &[String] {
    &self.segments
  }
}

impl fmt::Display for DocPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.segments.join("/"))
  }
}

impl TryFrom<String> for DocPath {
  type Error = Error;
  fn try_from(s: String) -> Result<Self> {
    Self::parse(&s)
  }
}

impl From<DocPath> for String {
  fn from(p: DocPath) -> String {
    p.to_string()
  }
}

// ─── CollectionPath ──────────────────────────────────────────────────────────

/// A fully-qualified collection path: an odd number of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionPath {
  segments: Vec<String>,
}

impl CollectionPath {
  pub fn parse(raw: &str) -> Result<Self> {
    let segments = split_segments(raw)?;
    if segments.len() % 2 != 1 {
      return Err(Error::MalformedPath(format!(
        "{raw:?} has an even number of segments; expected a collection path"
      )));
    }
    Ok(Self { segments })
  }

  /// Build a collection path from an optional parent document and a bare
  /// collection name — the shape HTTP handlers receive.
  pub fn under(parent: Option<&DocPath>, name: &str) -> Result<Self> {
    match parent {
      Some(doc) => doc.collection(name),
      None => Self::parse(name),
    }
  }

  /// The collection's own name — the final segment.
  pub fn name(&self) -> &str {
    self.segments.last().expect("CollectionPath is never empty")
  }

  /// The parent document, if this is a sub-collection.
  pub fn parent_doc(&self) -> Option<DocPath> {
    (self.segments.len() > 1).then(|| DocPath {
      segments: self.segments[..self.segments.len() - 1].to_vec(),
    })
  }

  /// The path of the document `id` within this collection.
  pub fn doc(&self, id: &str) -> Result<DocPath> {
    check_segment(id)?;
    let mut segments = self.segments.clone();
    segments.push(id.to_owned());
    Ok(DocPath { segments })
  }

  pub fn segments(&self) -> &[String] {
    &self.segments
  }
}

impl fmt::Display for CollectionPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.segments.join("/"))
  }
}

impl TryFrom<String> for CollectionPath {
  type Error = Error;
  fn try_from(s: String) -> Result<Self> {
    Self::parse(&s)
  }
}

impl From<CollectionPath> for String {
  fn from(p: CollectionPath) -> String {
    p.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn doc_path_round_trips() {
    for raw in ["users/u1", "users/u1/posts/p1", "a/b/c/d/e/f"] {
      let path = DocPath::parse(raw).unwrap();
      assert_eq!(path.to_string(), raw);
      assert_eq!(DocPath::parse(&path.to_string()).unwrap(), path);
    }
  }

  #[test]
  fn doc_path_rejects_odd_arity() {
    assert!(DocPath::parse("users").is_err());
    assert!(DocPath::parse("users/u1/posts").is_err());
  }

  #[test]
  fn collection_path_rejects_even_arity() {
    assert!(CollectionPath::parse("users/u1").is_err());
  }

  #[test]
  fn empty_and_bad_segments_rejected() {
    assert!(DocPath::parse("").is_err());
    assert!(DocPath::parse("users//u1").is_err());
    assert!(DocPath::parse("users/u 1").is_err());
  }

  #[test]
  fn leading_and_trailing_slashes_ignored() {
    let path = DocPath::parse("/users/u1/").unwrap();
    assert_eq!(path.to_string(), "users/u1");
  }

  #[test]
  fn chaining_builds_nested_paths() {
    let users = CollectionPath::parse("users").unwrap();
    let u1 = users.doc("u1").unwrap();
    let posts = u1.collection("posts").unwrap();
    let p1 = posts.doc("p1").unwrap();

    assert_eq!(p1.to_string(), "users/u1/posts/p1");
    assert_eq!(p1.doc_id(), "p1");
    assert_eq!(p1.collection_name(), "posts");
    assert_eq!(p1.parent_collection(), posts);
    assert_eq!(p1.parent_doc(), Some(u1.clone()));
    assert_eq!(u1.parent_doc(), None);
  }

  #[test]
  fn under_combines_parent_and_name() {
    let parent = DocPath::parse("users/u1").unwrap();
    let posts = CollectionPath::under(Some(&parent), "posts").unwrap();
    assert_eq!(posts.to_string(), "users/u1/posts");

    let top = CollectionPath::under(None, "users").unwrap();
    assert_eq!(top.to_string(), "users");
  }
}
