//! Path pattern grammar and matching.
//!
//! Patterns are `/`-separated, matched segment-by-segment:
//!
//! - a literal segment matches an equal path segment;
//! - `{name}` matches one segment and binds `name`;
//! - `{name=**}` matches the remainder of the path (must be final);
//! - a trailing `/**` matches any proper-prefix path without binding.

use std::collections::HashMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
  Literal(String),
  /// `{name}` — one segment, bound.
  Capture(String),
  /// `{name=**}` — the rest of the path, bound as a `/`-joined string.
  CaptureTail(String),
  /// `**` — any non-empty remainder, unbound.
  Descendants,
}

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
  source:   String,
  segments: Vec<Segment>,
}

impl Pattern {
  pub fn parse(raw: &str) -> Result<Self> {
    let err = |reason: &str| Error::Pattern {
      pattern: raw.to_owned(),
      reason:  reason.to_owned(),
    };

    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
      return Err(err("empty pattern"));
    }

    let parts: Vec<&str> = trimmed.split('/').collect();
    let mut segments = Vec::with_capacity(parts.len());

    for (i, part) in parts.iter().enumerate() {
      let last = i == parts.len() - 1;
      let segment = if *part == "**" {
        if !last {
          return Err(err("`**` is only allowed as the final segment"));
        }
        Segment::Descendants
      } else if let Some(inner) =
        part.strip_prefix('{').and_then(|p| p.strip_suffix('}'))
      {
        if let Some(name) = inner.strip_suffix("=**") {
          if !last {
            return Err(err("tail capture is only allowed as the final segment"));
          }
          Segment::CaptureTail(check_name(raw, name)?.to_owned())
        } else {
          Segment::Capture(check_name(raw, inner)?.to_owned())
        }
      } else if part.is_empty() {
        return Err(err("empty segment"));
      } else {
        Segment::Literal((*part).to_owned())
      };
      segments.push(segment);
    }

    Ok(Self { source: raw.to_owned(), segments })
  }

  /// Match `path` segments, returning the captured bindings on success.
  pub fn matches(&self, path: &[&str]) -> Option<HashMap<String, String>> {
    let mut bindings = HashMap::new();

    for (i, segment) in self.segments.iter().enumerate() {
      let remaining = &path[i.min(path.len())..];
      match segment {
        Segment::Descendants => {
          // Proper prefix: the path must continue past the fixed part.
          return (!remaining.is_empty()).then_some(bindings);
        }
        Segment::CaptureTail(name) => {
          if remaining.is_empty() {
            return None;
          }
          bindings.insert(name.clone(), remaining.join("/"));
          return Some(bindings);
        }
        Segment::Literal(lit) => {
          if remaining.first() != Some(&lit.as_str()) {
            return None;
          }
        }
        Segment::Capture(name) => {
          let seg = remaining.first()?;
          bindings.insert(name.clone(), (*seg).to_owned());
        }
      }
    }

    (path.len() == self.segments.len()).then_some(bindings)
  }

  pub fn source(&self) -> &str {
    &self.source
  }
}

fn check_name<'a>(pattern: &str, name: &'a str) -> Result<&'a str> {
  let ok = !name.is_empty()
    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    && !name.starts_with(|c: char| c.is_ascii_digit());
  if ok {
    Ok(name)
  } else {
    Err(Error::Pattern {
      pattern: pattern.to_owned(),
      reason:  format!("invalid capture name {name:?}"),
    })
  }
}
