//! Compilation of filter/order/limit queries into SQL over JSON fields.
//!
//! Values are always bound as parameters. The only text spliced into the
//! statement is the field name inside the `$.<field>` JSON path, guarded
//! by the `[A-Za-z0-9.]+` whitelist; filters (and orderings) that fail the
//! whitelist are silently dropped, not rejected.

use tidepool_core::query::{Direction, Filter, FilterOp, Query, is_safe_field};

/// A compiled statement plus its positional parameters.
pub struct CompiledQuery {
  pub sql:    String,
  pub params: Vec<rusqlite::types::Value>,
}

fn bind(value: &serde_json::Value) -> rusqlite::types::Value {
  use rusqlite::types::Value as Sql;
  match value {
    serde_json::Value::Null => Sql::Null,
    serde_json::Value::Bool(b) => Sql::Integer(*b as i64),
    serde_json::Value::Number(n) => match n.as_i64() {
      Some(i) => Sql::Integer(i),
      None => Sql::Real(n.as_f64().unwrap_or(f64::NAN)),
    },
    serde_json::Value::String(s) => Sql::Text(s.clone()),
    // Arrays and objects only reach here through degenerate filters;
    // compare their JSON text, which can only match itself.
    other => Sql::Text(other.to_string()),
  }
}

fn extract(field: &str) -> String {
  format!("json_extract(data, '$.{field}')")
}

fn push_filter(
  clauses: &mut Vec<String>,
  params: &mut Vec<rusqlite::types::Value>,
  filter: &Filter,
) {
  let lhs = extract(&filter.field);
  match filter.op {
    // IS / IS NOT are SQLite's null-safe equality, matching the client's
    // local evaluation of missing fields.
    FilterOp::Eq => {
      clauses.push(format!("{lhs} IS ?"));
      params.push(bind(&filter.value));
    }
    FilterOp::Ne => {
      clauses.push(format!("{lhs} IS NOT ?"));
      params.push(bind(&filter.value));
    }
    FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
      let op = match filter.op {
        FilterOp::Lt => "<",
        FilterOp::Le => "<=",
        FilterOp::Gt => ">",
        _ => ">=",
      };
      clauses.push(format!("{lhs} {op} ?"));
      params.push(bind(&filter.value));
    }
    FilterOp::In => match filter.value.as_array() {
      Some(options) if !options.is_empty() => {
        let marks = vec!["?"; options.len()].join(", ");
        clauses.push(format!("{lhs} IN ({marks})"));
        params.extend(options.iter().map(bind));
      }
      // An empty (or non-list) membership test matches nothing.
      _ => clauses.push("0".to_owned()),
    },
    FilterOp::ArrayContains => {
      clauses.push(format!(
        "EXISTS (SELECT 1 FROM json_each(data, '$.{}') \
         WHERE json_each.value = ?)",
        filter.field
      ));
      params.push(bind(&filter.value));
    }
    FilterOp::Like => {
      clauses.push(format!("{lhs} LIKE ?"));
      params.push(bind(&filter.value));
    }
  }
}

/// Escape `%`, `_`, and the escape character itself for a LIKE pattern
/// with `ESCAPE '\'`.
fn like_escape(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  for c in raw.chars() {
    if matches!(c, '%' | '_' | '\\') {
      out.push('\\');
    }
    out.push(c);
  }
  out
}

/// Compile a query against the `documents` table for one workspace.
/// Tombstones are always excluded.
pub fn compile(workspace_id: &str, query: &Query) -> CompiledQuery {
  let mut sql = String::from(
    "SELECT id, path, data, version FROM documents \
     WHERE workspace_id = ? AND deleted_at IS NULL",
  );
  let mut params = vec![rusqlite::types::Value::Text(workspace_id.to_owned())];

  if let Some(collection) = &query.collection {
    // Exactly one level inside the collection: under the prefix, but not
    // under any deeper sub-collection.
    let prefix = like_escape(&collection.to_string());
    sql.push_str(
      " AND path LIKE ? ESCAPE '\\' AND path NOT LIKE ? ESCAPE '\\'",
    );
    params.push(rusqlite::types::Value::Text(format!("{prefix}/%")));
    params.push(rusqlite::types::Value::Text(format!("{prefix}/%/%")));
  }

  let mut clauses = Vec::new();
  for filter in &query.filters {
    if is_safe_field(&filter.field) {
      push_filter(&mut clauses, &mut params, filter);
    }
  }
  for clause in &clauses {
    sql.push_str(" AND ");
    sql.push_str(clause);
  }

  if let Some(order) = &query.order_by
    && is_safe_field(&order.field)
  {
    sql.push_str(" ORDER BY ");
    sql.push_str(&extract(&order.field));
    sql.push_str(match order.direction {
      Direction::Asc => " ASC",
      Direction::Desc => " DESC",
    });
  }

  if let Some(limit) = query.limit {
    sql.push_str(" LIMIT ?");
    params.push(rusqlite::types::Value::Integer(i64::from(limit)));
  }

  CompiledQuery { sql, params }
}

#[cfg(test)]
mod tests {
  use serde_json::json;
  use tidepool_core::query::OrderBy;

  use super::*;

  fn filter(field: &str, op: FilterOp, value: serde_json::Value) -> Filter {
    Filter { field: field.into(), op, value }
  }

  #[test]
  fn unsafe_fields_are_dropped() {
    let q = Query {
      filters: vec![filter("a; DROP TABLE", FilterOp::Eq, json!(1))],
      ..Default::default()
    };
    let compiled = compile("ws", &q);
    assert!(!compiled.sql.contains("DROP"));
    assert_eq!(compiled.params.len(), 1); // workspace only
  }

  #[test]
  fn in_expands_to_parameter_list() {
    let q = Query {
      filters: vec![filter("s", FilterOp::In, json!(["a", "b", "c"]))],
      ..Default::default()
    };
    let compiled = compile("ws", &q);
    assert!(compiled.sql.contains("IN (?, ?, ?)"));
    assert_eq!(compiled.params.len(), 4);
  }

  #[test]
  fn empty_in_matches_nothing() {
    let q = Query {
      filters: vec![filter("s", FilterOp::In, json!([]))],
      ..Default::default()
    };
    let compiled = compile("ws", &q);
    assert!(compiled.sql.ends_with("AND 0"));
  }

  #[test]
  fn order_and_limit_are_appended_in_order() {
    let q = Query {
      order_by: Some(OrderBy {
        field:     "priority".into(),
        direction: Direction::Desc,
      }),
      limit: Some(5),
      ..Default::default()
    };
    let compiled = compile("ws", &q);
    assert!(
      compiled
        .sql
        .ends_with("ORDER BY json_extract(data, '$.priority') DESC LIMIT ?")
    );
    assert_eq!(
      compiled.params.last(),
      Some(&rusqlite::types::Value::Integer(5))
    );
  }

  #[test]
  fn values_bind_as_parameters_only() {
    let q = Query {
      filters: vec![filter("name", FilterOp::Eq, json!("'; DROP--"))],
      ..Default::default()
    };
    let compiled = compile("ws", &q);
    assert!(!compiled.sql.contains("DROP"));
    assert!(
      compiled
        .params
        .contains(&rusqlite::types::Value::Text("'; DROP--".into()))
    );
  }
}
