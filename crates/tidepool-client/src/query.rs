//! The fluent query builder, with server execution and the local-cache
//! fallback used while offline.

use std::cmp::Ordering;

use tidepool_core::{
  path::CollectionPath,
  query::{
    Direction, Filter, FilterOp, OrderBy, Query, QueryRow, compare_values,
    extract_field, matches_all,
  },
  value::Payload,
};

use crate::{
  QuerySnapshot, SnapshotMetadata, Subscription, TidepoolClient,
  error::Result,
};

/// Builds a filter/order/limit query over one collection.
///
/// ```rust,ignore
/// tasks
///   .query()
///   .filter("status", FilterOp::Eq, json!("active"))
///   .order_by("priority", Direction::Desc)
///   .limit(5)
///   .get()
///   .await?
/// ```
#[derive(Clone)]
pub struct QueryBuilder {
  pub(crate) client:     TidepoolClient,
  pub(crate) collection: CollectionPath,
  pub(crate) filters:    Vec<Filter>,
  pub(crate) order_by:   Option<OrderBy>,
  pub(crate) limit:      Option<u32>,
}

impl QueryBuilder {
  pub(crate) fn new(client: TidepoolClient, collection: CollectionPath) -> Self {
    Self { client, collection, filters: Vec::new(), order_by: None, limit: None }
  }

  /// Add one ANDed `(field, op, value)` filter.
  pub fn filter(
    mut self,
    field: &str,
    op: FilterOp,
    value: impl Into<Payload>,
  ) -> Self {
    self.filters.push(Filter {
      field: field.to_owned(),
      op,
      value: value.into(),
    });
    self
  }

  pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
    self.order_by = Some(OrderBy { field: field.to_owned(), direction });
    self
  }

  pub fn limit(mut self, limit: u32) -> Self {
    self.limit = Some(limit);
    self
  }

  pub(crate) fn to_query(&self) -> Query {
    Query {
      collection: Some(self.collection.clone()),
      filters:    self.filters.clone(),
      order_by:   self.order_by.clone(),
      limit:      self.limit,
    }
  }

  /// Execute: server first; the same filter/order/limit semantics over
  /// the cached mirror when the server is unreachable.
  pub async fn get(&self) -> Result<QuerySnapshot> {
    let client = &self.client;
    match client
      .api()
      .query(client.workspace(), &self.to_query(), client.user())
      .await
    {
      Ok(rows) => {
        for row in &rows {
          client
            .absorb_authoritative(&row.path, &row.data, row.version)
            .await?;
        }
        Ok(QuerySnapshot {
          rows,
          metadata: SnapshotMetadata {
            from_cache:         false,
            has_pending_writes: false,
          },
        })
      }
      Err(e) if e.is_network() && client.cache().is_some() => {
        self.get_local().await
      }
      Err(e) => Err(e),
    }
  }

  /// Subscribe to live changes of this query's result set.
  pub async fn listen<F>(&self, callback: F) -> Result<Subscription>
  where
    F: Fn(QuerySnapshot) + Send + Sync + 'static,
  {
    crate::subscribe::listen_query(self.clone(), callback).await
  }

  async fn get_local(&self) -> Result<QuerySnapshot> {
    let cache = self.client.cache().expect("checked by caller");
    let cached = cache.documents_under(&self.collection.to_string()).await?;

    let mut has_pending = false;
    let mut rows: Vec<QueryRow> = cached
      .into_iter()
      .filter(|doc| matches_all(&doc.data, &self.filters))
      .map(|doc| {
        has_pending |= doc.has_pending_writes();
        let id = doc
          .path
          .rsplit('/')
          .next()
          .unwrap_or(doc.path.as_str())
          .to_owned();
        QueryRow { id, path: doc.path, data: doc.data, version: doc.version }
      })
      .collect();

    if let Some(order) = &self.order_by {
      sort_rows(&mut rows, order);
    }
    if let Some(limit) = self.limit {
      rows.truncate(limit as usize);
    }

    Ok(QuerySnapshot {
      rows,
      metadata: SnapshotMetadata {
        from_cache:         true,
        has_pending_writes: has_pending,
      },
    })
  }
}

/// Order rows by the extracted field. Missing fields sort last in
/// ascending order (and first in descending, since the whole order is
/// reversed).
pub(crate) fn sort_rows(rows: &mut [QueryRow], order: &OrderBy) {
  rows.sort_by(|a, b| {
    let va = extract_field(&a.data, &order.field);
    let vb = extract_field(&b.data, &order.field);
    let ordering = match (va, vb) {
      (None, None) => Ordering::Equal,
      (None, Some(_)) => Ordering::Greater,
      (Some(_), None) => Ordering::Less,
      (Some(x), Some(y)) => compare_values(x, y),
    };
    match order.direction {
      Direction::Asc => ordering,
      Direction::Desc => ordering.reverse(),
    }
  });
}
