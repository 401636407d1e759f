//! Query types — filter, order, limit — plus the reference matcher used by
//! clients to evaluate the same semantics over cached documents.

use serde::{Deserialize, Serialize};

use crate::value::Payload;

// ─── Filters ─────────────────────────────────────────────────────────────────

/// A comparison operator applied to one extracted field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
  #[serde(rename = "==")]
  Eq,
  #[serde(rename = "!=")]
  Ne,
  #[serde(rename = "<")]
  Lt,
  #[serde(rename = "<=")]
  Le,
  #[serde(rename = ">")]
  Gt,
  #[serde(rename = ">=")]
  Ge,
  /// Value is a list; matches when the field equals any element.
  #[serde(rename = "in")]
  In,
  /// Field is a JSON array; matches when it contains the value.
  #[serde(rename = "array-contains")]
  ArrayContains,
  /// SQL LIKE pattern over a string field.
  #[serde(rename = "like")]
  Like,
}

/// One `(field, op, value)` triple. Filters in a query are ANDed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
  pub field: String,
  pub op:    FilterOp,
  pub value: Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  #[default]
  Asc,
  Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBy {
  pub field:     String,
  pub direction: Direction,
}

/// Parameters for [`crate::store::DocumentStore::query`].
#[derive(Debug, Clone, Default)]
pub struct Query {
  /// Restrict to documents exactly one level inside this collection.
  /// `None` queries the whole workspace.
  pub collection: Option<crate::path::CollectionPath>,
  pub filters:    Vec<Filter>,
  pub order_by:   Option<OrderBy>,
  pub limit:      Option<u32>,
}

/// One query result row. `path` lets consumers key caches and evaluate
/// path-scoped rules without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRow {
  pub id:      String,
  pub path:    String,
  pub data:    Payload,
  pub version: i64,
}

/// Whether a field name is safe to splice into a JSON path. Anything
/// outside `[A-Za-z0-9.]` is rejected; callers silently drop such filters
/// rather than failing the query.
pub fn is_safe_field(field: &str) -> bool {
  !field.is_empty()
    && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
}

// ─── Reference matcher ───────────────────────────────────────────────────────

// The client evaluates queries locally when offline. These functions define
// the shared semantics: extraction via dotted field paths, missing fields
// treated as null, and SQLite's type ordering (null < numeric < text).

/// Extract `$.<field>` from a payload; dotted fields descend into objects.
pub fn extract_field<'a>(data: &'a Payload, field: &str) -> Option<&'a Payload> {
  let mut current = data;
  for part in field.split('.') {
    current = current.as_object()?.get(part)?;
  }
  Some(current)
}

fn type_rank(v: &Payload) -> u8 {
  match v {
    Payload::Null => 0,
    Payload::Bool(_) | Payload::Number(_) => 1,
    Payload::String(_) => 2,
    Payload::Array(_) | Payload::Object(_) => 3,
  }
}

fn as_number(v: &Payload) -> Option<f64> {
  match v {
    Payload::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
    Payload::Number(n) => n.as_f64(),
    _ => None,
  }
}

/// Total order over extracted values, mirroring the storage engine's JSON
/// comparison: null sorts lowest, then numerics, then strings.
pub fn compare_values(a: &Payload, b: &Payload) -> std::cmp::Ordering {
  use std::cmp::Ordering;

  let (ra, rb) = (type_rank(a), type_rank(b));
  if ra != rb {
    return ra.cmp(&rb);
  }
  match (a, b) {
    (Payload::String(x), Payload::String(y)) => x.cmp(y),
    _ => match (as_number(a), as_number(b)) {
      (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
      _ => Ordering::Equal,
    },
  }
}

/// Whether `data` satisfies a single filter, mirroring the storage
/// engine's semantics: equality is null-safe (`IS` / `IS NOT`), while
/// ordered comparisons against or over null never match. Unsafe field
/// names are the server's concern; [`matches_all`] drops them the same
/// way the server does.
pub fn matches(data: &Payload, filter: &Filter) -> bool {
  let null = Payload::Null;
  let field = extract_field(data, &filter.field).unwrap_or(&null);
  let ordered = |f: &Payload, v: &Payload| {
    (!f.is_null() && !v.is_null()).then(|| compare_values(f, v))
  };

  match filter.op {
    FilterOp::Eq => field == &filter.value,
    FilterOp::Ne => field != &filter.value,
    FilterOp::Lt => {
      ordered(field, &filter.value) == Some(std::cmp::Ordering::Less)
    }
    FilterOp::Le => matches!(
      ordered(field, &filter.value),
      Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
    ),
    FilterOp::Gt => {
      ordered(field, &filter.value) == Some(std::cmp::Ordering::Greater)
    }
    FilterOp::Ge => matches!(
      ordered(field, &filter.value),
      Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
    ),
    FilterOp::In => {
      !field.is_null()
        && filter
          .value
          .as_array()
          .is_some_and(|xs| xs.iter().any(|x| x == field))
    }
    FilterOp::ArrayContains => {
      !filter.value.is_null()
        && field
          .as_array()
          .is_some_and(|xs| xs.iter().any(|x| x == &filter.value))
    }
    FilterOp::Like => match (field.as_str(), filter.value.as_str()) {
      (Some(s), Some(pattern)) => like_match(s, pattern),
      _ => false,
    },
  }
}

/// All safe filters must hold; unsafe-field filters are dropped.
pub fn matches_all(data: &Payload, filters: &[Filter]) -> bool {
  filters
    .iter()
    .filter(|f| is_safe_field(&f.field))
    .all(|f| matches(data, f))
}

/// Case-insensitive SQL LIKE: `%` matches any run, `_` one character.
fn like_match(s: &str, pattern: &str) -> bool {
  fn inner(s: &[char], p: &[char]) -> bool {
    match p.split_first() {
      None => s.is_empty(),
      Some((&'%', rest)) => {
        (0..=s.len()).any(|skip| inner(&s[skip..], rest))
      }
      Some((&'_', rest)) => {
        s.split_first().is_some_and(|(_, tail)| inner(tail, rest))
      }
      Some((c, rest)) => s
        .split_first()
        .is_some_and(|(head, tail)| head == c && inner(tail, rest)),
    }
  }
  let s: Vec<char> = s.to_lowercase().chars().collect();
  let p: Vec<char> = pattern.to_lowercase().chars().collect();
  inner(&s, &p)
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn filter(field: &str, op: FilterOp, value: Payload) -> Filter {
    Filter { field: field.into(), op, value }
  }

  #[test]
  fn filter_ops_serialize_to_wire_names() {
    let f = filter("status", FilterOp::ArrayContains, json!("x"));
    let wire = serde_json::to_value(&f).unwrap();
    assert_eq!(wire["op"], json!("array-contains"));
    let back: Filter = serde_json::from_value(wire).unwrap();
    assert_eq!(back.op, FilterOp::ArrayContains);
  }

  #[test]
  fn safe_field_rejects_injection_shapes() {
    assert!(is_safe_field("status"));
    assert!(is_safe_field("nested.count2"));
    assert!(!is_safe_field(""));
    assert!(!is_safe_field("a'); DROP TABLE documents;--"));
    assert!(!is_safe_field("a b"));
  }

  #[test]
  fn dotted_extraction() {
    let data = json!({"a": {"b": {"c": 3}}});
    assert_eq!(extract_field(&data, "a.b.c"), Some(&json!(3)));
    assert_eq!(extract_field(&data, "a.missing"), None);
  }

  #[test]
  fn comparison_ops() {
    let doc = json!({"n": 5, "s": "mid"});
    assert!(matches(&doc, &filter("n", FilterOp::Eq, json!(5))));
    assert!(matches(&doc, &filter("n", FilterOp::Ne, json!(4))));
    assert!(matches(&doc, &filter("n", FilterOp::Lt, json!(6))));
    assert!(matches(&doc, &filter("n", FilterOp::Ge, json!(5))));
    assert!(matches(&doc, &filter("s", FilterOp::Gt, json!("aaa"))));
    assert!(!matches(&doc, &filter("n", FilterOp::Gt, json!(5))));
  }

  #[test]
  fn missing_field_compares_as_null() {
    let doc = json!({"present": 1});
    // Ordered comparisons against null never match.
    assert!(!matches(&doc, &filter("absent", FilterOp::Lt, json!(0))));
    assert!(!matches(&doc, &filter("absent", FilterOp::Ge, json!(0))));
    // Equality is null-safe.
    assert!(!matches(&doc, &filter("absent", FilterOp::Eq, json!(0))));
    assert!(matches(&doc, &filter("absent", FilterOp::Eq, json!(null))));
    assert!(matches(&doc, &filter("absent", FilterOp::Ne, json!(0))));
  }

  #[test]
  fn in_and_array_contains() {
    let doc = json!({"status": "active", "tags": ["a", "b"]});
    assert!(matches(
      &doc,
      &filter("status", FilterOp::In, json!(["active", "archived"]))
    ));
    assert!(!matches(&doc, &filter("status", FilterOp::In, json!(["x"]))));
    assert!(matches(&doc, &filter("tags", FilterOp::ArrayContains, json!("b"))));
    assert!(!matches(
      &doc,
      &filter("tags", FilterOp::ArrayContains, json!("z"))
    ));
  }

  #[test]
  fn like_patterns() {
    let doc = json!({"name": "Alice"});
    assert!(matches(&doc, &filter("name", FilterOp::Like, json!("ali%"))));
    assert!(matches(&doc, &filter("name", FilterOp::Like, json!("_lice"))));
    assert!(!matches(&doc, &filter("name", FilterOp::Like, json!("bob%"))));
  }

  #[test]
  fn unsafe_fields_are_dropped_not_fatal() {
    let doc = json!({"n": 1});
    let filters = vec![
      filter("n", FilterOp::Eq, json!(1)),
      filter("evil; --", FilterOp::Eq, json!("whatever")),
    ];
    assert!(matches_all(&doc, &filters));
  }
}
