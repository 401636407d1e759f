//! Integration tests for `SqliteStore` against an in-memory database.

use serde_json::json;
use tidepool_core::{
  Error,
  path::{CollectionPath, DocPath},
  query::{Direction, Filter, FilterOp, OrderBy, Query},
  store::{BatchOp, DocumentStore},
};

use crate::SqliteStore;

const WS: &str = "default";

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory().await.expect("in-memory store")
}

fn doc_path(raw: &str) -> DocPath {
  DocPath::parse(raw).unwrap()
}

fn collection(raw: &str) -> CollectionPath {
  CollectionPath::parse(raw).unwrap()
}

// ─── Create / get ────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_and_get_round_trip() {
  let s = store().await;
  let path = doc_path("items/i1");

  let created = s
    .create(WS, &path, json!({"name": "a", "value": 1}), "u1")
    .await
    .unwrap();
  assert_eq!(created.id, "i1");
  assert_eq!(created.version, 1);

  let doc = s.get(WS, &path).await.unwrap().unwrap();
  assert_eq!(doc.data, json!({"name": "a", "value": 1}));
  assert_eq!(doc.version, created.version);
  assert_eq!(doc.owner_id, "u1");
  assert_eq!(doc.collection_name, "items");
}

#[tokio::test]
async fn get_missing_returns_none() {
  let s = store().await;
  assert!(s.get(WS, &doc_path("items/nope")).await.unwrap().is_none());
}

#[tokio::test]
async fn create_on_occupied_path_conflicts() {
  let s = store().await;
  let path = doc_path("items/i1");
  s.create(WS, &path, json!({}), "u1").await.unwrap();

  let err = s.create(WS, &path, json!({}), "u1").await.unwrap_err();
  assert!(matches!(err, Error::VersionConflict { .. }));
}

// ─── Set ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn set_creates_then_overwrites() {
  let s = store().await;
  let path = doc_path("items/i1");

  let first = s.set(WS, &path, json!({"n": 1}), "u1", None).await.unwrap();
  assert!(first.created);

  let second = s.set(WS, &path, json!({"n": 2}), "u1", None).await.unwrap();
  assert!(!second.created);
  assert!(second.version > first.version);

  let doc = s.get(WS, &path).await.unwrap().unwrap();
  assert_eq!(doc.data, json!({"n": 2}));
  assert_eq!(doc.version, second.version);
}

#[tokio::test]
async fn set_preserves_original_owner() {
  let s = store().await;
  let path = doc_path("items/i1");
  s.set(WS, &path, json!({"n": 1}), "u1", None).await.unwrap();
  s.set(WS, &path, json!({"n": 2}), "u2", None).await.unwrap();

  let doc = s.get(WS, &path).await.unwrap().unwrap();
  assert_eq!(doc.owner_id, "u1");
}

#[tokio::test]
async fn set_with_matching_expected_version_succeeds() {
  let s = store().await;
  let path = doc_path("items/i1");
  let first = s.set(WS, &path, json!({"n": 1}), "u1", None).await.unwrap();

  let second = s
    .set(WS, &path, json!({"n": 2}), "u1", Some(first.version))
    .await
    .unwrap();
  assert!(second.version > first.version);
}

#[tokio::test]
async fn set_with_stale_expected_version_conflicts() {
  let s = store().await;
  let path = doc_path("items/i1");
  let first = s.set(WS, &path, json!({"n": 1}), "u1", None).await.unwrap();
  s.set(WS, &path, json!({"n": 2}), "u1", None).await.unwrap();

  let err = s
    .set(WS, &path, json!({"n": 3}), "u1", Some(first.version))
    .await
    .unwrap_err();
  assert!(
    matches!(err, Error::VersionConflict { expected, actual }
      if expected == first.version && actual > first.version)
  );
}

// ─── Update ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn update_is_merge_patch() {
  let s = store().await;
  let path = doc_path("items/i1");
  s.set(WS, &path, json!({"name": "a", "value": 1}), "u1", None)
    .await
    .unwrap();

  let out = s
    .update(WS, &path, json!({"value": 2}), None)
    .await
    .unwrap();
  assert_eq!(out.data, json!({"name": "a", "value": 2}));

  let doc = s.get(WS, &path).await.unwrap().unwrap();
  assert_eq!(doc.data, json!({"name": "a", "value": 2}));
}

#[tokio::test]
async fn update_null_erases_keys() {
  let s = store().await;
  let path = doc_path("items/i1");
  s.set(WS, &path, json!({"keep": 1, "drop": 2}), "u1", None)
    .await
    .unwrap();

  let out = s
    .update(WS, &path, json!({"drop": null}), None)
    .await
    .unwrap();
  assert_eq!(out.data, json!({"keep": 1}));
}

#[tokio::test]
async fn update_missing_is_not_found() {
  let s = store().await;
  let err = s
    .update(WS, &doc_path("items/nope"), json!({"x": 1}), None)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn concurrent_update_loser_retries_cleanly() {
  // The S2 scenario: both writers read version v, A wins, B conflicts,
  // B re-reads and succeeds.
  let s = store().await;
  let path = doc_path("items/i1");
  let base = s.set(WS, &path, json!({"n": 0}), "u1", None).await.unwrap();

  let a = s
    .update(WS, &path, json!({"n": 1}), Some(base.version))
    .await
    .unwrap();

  let err = s
    .update(WS, &path, json!({"n": 2}), Some(base.version))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::VersionConflict { .. }));

  let fresh = s.get(WS, &path).await.unwrap().unwrap();
  assert_eq!(fresh.version, a.version);
  let b = s
    .update(WS, &path, json!({"n": 2}), Some(fresh.version))
    .await
    .unwrap();
  assert!(b.version > a.version);
}

// ─── Delete / resurrection ───────────────────────────────────────────────────

#[tokio::test]
async fn delete_tombstones_and_get_returns_none() {
  let s = store().await;
  let path = doc_path("items/i1");
  s.set(WS, &path, json!({"n": 1}), "u1", None).await.unwrap();

  let version = s.delete(WS, &path, None).await.unwrap();
  assert!(version.is_some());
  assert!(s.get(WS, &path).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_is_idempotent() {
  let s = store().await;
  let path = doc_path("items/i1");
  s.set(WS, &path, json!({"n": 1}), "u1", None).await.unwrap();
  s.delete(WS, &path, None).await.unwrap();
  let log_len = s.changes_since(WS, 0).await.unwrap().len();

  // Repeating the delete, or deleting something that never existed, is
  // a no-op: no version, no event.
  assert!(s.delete(WS, &path, None).await.unwrap().is_none());
  assert!(s.delete(WS, &doc_path("items/never"), None).await.unwrap().is_none());
  assert_eq!(s.changes_since(WS, 0).await.unwrap().len(), log_len);
}

#[tokio::test]
async fn delete_still_enforces_expected_version() {
  let s = store().await;
  let path = doc_path("items/i1");
  let first = s.set(WS, &path, json!({"n": 1}), "u1", None).await.unwrap();
  s.set(WS, &path, json!({"n": 2}), "u1", None).await.unwrap();

  let err = s.delete(WS, &path, Some(first.version)).await.unwrap_err();
  assert!(matches!(err, Error::VersionConflict { .. }));

  // A precondition against an absent document conflicts too.
  let err = s
    .delete(WS, &doc_path("items/never"), Some(3))
    .await
    .unwrap_err();
  assert!(
    matches!(err, Error::VersionConflict { expected: 3, actual: 0 })
  );
}

#[tokio::test]
async fn set_resurrects_tombstone_with_greater_version() {
  let s = store().await;
  let path = doc_path("items/i1");
  s.set(WS, &path, json!({"n": 1}), "u1", None).await.unwrap();
  let tombstone_version = s.delete(WS, &path, None).await.unwrap().unwrap();

  let revived = s.set(WS, &path, json!({"n": 2}), "u1", None).await.unwrap();
  assert!(revived.created);
  assert!(revived.version > tombstone_version);

  let doc = s.get(WS, &path).await.unwrap().unwrap();
  assert_eq!(doc.data, json!({"n": 2}));
}

#[tokio::test]
async fn occ_applies_against_tombstone_version() {
  let s = store().await;
  let path = doc_path("items/i1");
  let first = s.set(WS, &path, json!({"n": 1}), "u1", None).await.unwrap();
  let tombstone_version = s.delete(WS, &path, None).await.unwrap().unwrap();

  // The tombstone's version is the current one, not the last live write's.
  let err = s
    .set(WS, &path, json!({"n": 2}), "u1", Some(first.version))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::VersionConflict { .. }));

  s.set(WS, &path, json!({"n": 2}), "u1", Some(tombstone_version))
    .await
    .unwrap();
}

// ─── Versions and the event log ──────────────────────────────────────────────

#[tokio::test]
async fn document_version_tracks_latest_event() {
  let s = store().await;
  let path = doc_path("items/i1");
  s.set(WS, &path, json!({"n": 1}), "u1", None).await.unwrap();
  s.update(WS, &path, json!({"n": 2}), None).await.unwrap();
  let doc = s.get(WS, &path).await.unwrap().unwrap();

  let events = s.changes_since(WS, 0).await.unwrap();
  let latest = events
    .iter()
    .filter(|e| e.doc_id == "i1")
    .map(|e| e.version)
    .max()
    .unwrap();
  assert_eq!(doc.version, latest);
}

#[tokio::test]
async fn versions_are_strictly_increasing() {
  let s = store().await;
  s.set(WS, &doc_path("a/1"), json!({}), "u1", None).await.unwrap();
  s.set(WS, &doc_path("b/2"), json!({}), "u1", None).await.unwrap();
  s.update(WS, &doc_path("a/1"), json!({"x": 1}), None)
    .await
    .unwrap();

  let events = s.changes_since(WS, 0).await.unwrap();
  let versions: Vec<i64> = events.iter().map(|e| e.version).collect();
  let mut sorted = versions.clone();
  sorted.sort_unstable();
  sorted.dedup();
  assert_eq!(versions, sorted);
}

#[tokio::test]
async fn changes_since_is_exclusive_and_ordered() {
  let s = store().await;
  s.set(WS, &doc_path("a/1"), json!({"n": 1}), "u1", None)
    .await
    .unwrap();
  let cut = s
    .set(WS, &doc_path("a/2"), json!({"n": 2}), "u1", None)
    .await
    .unwrap();
  s.set(WS, &doc_path("a/3"), json!({"n": 3}), "u1", None)
    .await
    .unwrap();

  let tail = s.changes_since(WS, cut.version).await.unwrap();
  assert_eq!(tail.len(), 1);
  assert!(tail[0].version > cut.version);
}

#[tokio::test]
async fn workspaces_are_isolated() {
  let s = store().await;
  let path = doc_path("items/i1");
  s.set("ws-a", &path, json!({"n": 1}), "u1", None).await.unwrap();

  assert!(s.get("ws-b", &path).await.unwrap().is_none());
  assert!(s.changes_since("ws-b", 0).await.unwrap().is_empty());
}

// ─── Batch ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_versions_are_contiguous_and_final_is_returned() {
  let s = store().await;
  let outcome = s
    .batch(
      WS,
      vec![
        BatchOp::Set {
          path:             doc_path("a/1"),
          data:             json!({"n": 1}),
          expected_version: None,
        },
        BatchOp::Set {
          path:             doc_path("b/2"),
          data:             json!({"n": 2}),
          expected_version: None,
        },
        BatchOp::Update {
          path:             doc_path("a/1"),
          data:             json!({"n": 3}),
          expected_version: None,
        },
      ],
      "u1",
    )
    .await
    .unwrap();

  let versions: Vec<i64> =
    outcome.changes.iter().map(|c| c.version).collect();
  assert_eq!(versions.len(), 3);
  assert_eq!(versions[1], versions[0] + 1);
  assert_eq!(versions[2], versions[1] + 1);
  assert_eq!(outcome.version, versions[2]);
}

#[tokio::test]
async fn failed_batch_applies_nothing() {
  let s = store().await;
  let err = s
    .batch(
      WS,
      vec![
        BatchOp::Set {
          path:             doc_path("a/1"),
          data:             json!({"n": 1}),
          expected_version: None,
        },
        BatchOp::Set {
          path:             doc_path("b/2"),
          data:             json!({"n": 2}),
          expected_version: None,
        },
        // Update of a document that does not exist fails the batch.
        BatchOp::Update {
          path:             doc_path("c/3"),
          data:             json!({"x": 3}),
          expected_version: None,
        },
      ],
      "u1",
    )
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NotFound(_)));

  assert!(s.get(WS, &doc_path("a/1")).await.unwrap().is_none());
  assert!(s.get(WS, &doc_path("b/2")).await.unwrap().is_none());
  assert!(s.changes_since(WS, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_conflict_rolls_back() {
  let s = store().await;
  let base = s
    .set(WS, &doc_path("a/1"), json!({"n": 0}), "u1", None)
    .await
    .unwrap();

  let err = s
    .batch(
      WS,
      vec![
        BatchOp::Set {
          path:             doc_path("b/2"),
          data:             json!({"n": 1}),
          expected_version: None,
        },
        BatchOp::Set {
          path:             doc_path("a/1"),
          data:             json!({"n": 9}),
          expected_version: Some(base.version + 7),
        },
      ],
      "u1",
    )
    .await
    .unwrap_err();
  assert!(matches!(err, Error::VersionConflict { .. }));

  assert!(s.get(WS, &doc_path("b/2")).await.unwrap().is_none());
  let a = s.get(WS, &doc_path("a/1")).await.unwrap().unwrap();
  assert_eq!(a.data, json!({"n": 0}));
}

#[tokio::test]
async fn batch_changes_carry_post_state_in_op_order() {
  let s = store().await;
  s.set(WS, &doc_path("a/1"), json!({"n": 0, "keep": true}), "u1", None)
    .await
    .unwrap();

  let outcome = s
    .batch(
      WS,
      vec![
        BatchOp::Update {
          path:             doc_path("a/1"),
          data:             json!({"n": 5}),
          expected_version: None,
        },
        BatchOp::Delete { path: doc_path("a/1"), expected_version: None },
      ],
      "u1",
    )
    .await
    .unwrap();

  assert_eq!(outcome.changes[0].data, Some(json!({"n": 5, "keep": true})));
  assert_eq!(outcome.changes[1].data, None);
}

#[tokio::test]
async fn batch_tolerates_deletes_of_absent_documents() {
  let s = store().await;
  let outcome = s
    .batch(
      WS,
      vec![
        BatchOp::Delete {
          path:             doc_path("ghosts/g1"),
          expected_version: None,
        },
        BatchOp::Set {
          path:             doc_path("a/1"),
          data:             json!({"n": 1}),
          expected_version: None,
        },
      ],
      "u1",
    )
    .await
    .unwrap();

  // The no-op delete contributes no event and no change record.
  assert_eq!(outcome.changes.len(), 1);
  assert_eq!(outcome.version, outcome.changes[0].version);
  assert!(s.get(WS, &doc_path("a/1")).await.unwrap().is_some());
}

// ─── List ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn list_returns_only_one_nesting_level() {
  // The sub-collection isolation scenario: a post under a user must not
  // appear when listing users, and vice versa.
  let s = store().await;
  s.set(WS, &doc_path("users/u1"), json!({"name": "u"}), "u1", None)
    .await
    .unwrap();
  s.set(WS, &doc_path("users/u1/posts/p1"), json!({"title": "t"}), "u1", None)
    .await
    .unwrap();

  let users = s.list(WS, &collection("users")).await.unwrap();
  assert_eq!(users.len(), 1);
  assert_eq!(users[0].id, "u1");

  let posts = s.list(WS, &collection("users/u1/posts")).await.unwrap();
  assert_eq!(posts.len(), 1);
  assert_eq!(posts[0].id, "p1");
}

#[tokio::test]
async fn list_excludes_tombstones() {
  let s = store().await;
  s.set(WS, &doc_path("items/i1"), json!({}), "u1", None).await.unwrap();
  s.set(WS, &doc_path("items/i2"), json!({}), "u1", None).await.unwrap();
  s.delete(WS, &doc_path("items/i1"), None).await.unwrap();

  let items = s.list(WS, &collection("items")).await.unwrap();
  assert_eq!(items.len(), 1);
  assert_eq!(items[0].id, "i2");
}

// ─── Query ───────────────────────────────────────────────────────────────────

async fn seed_tasks(s: &SqliteStore) {
  for (id, status, priority) in [
    ("t1", "active", 3),
    ("t2", "active", 1),
    ("t3", "done", 2),
    ("t4", "active", 2),
  ] {
    s.set(
      WS,
      &doc_path(&format!("tasks/{id}")),
      json!({"status": status, "priority": priority, "tags": ["work"]}),
      "u1",
      None,
    )
    .await
    .unwrap();
  }
}

#[tokio::test]
async fn query_filters_and_orders() {
  let s = store().await;
  seed_tasks(&s).await;

  let rows = s
    .query(
      WS,
      &Query {
        filters: vec![Filter {
          field: "status".into(),
          op:    FilterOp::Eq,
          value: json!("active"),
        }],
        order_by: Some(OrderBy {
          field:     "priority".into(),
          direction: Direction::Desc,
        }),
        limit: Some(2),
        ..Default::default()
      },
    )
    .await
    .unwrap();

  let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
  assert_eq!(ids, ["t1", "t4"]);
}

#[tokio::test]
async fn query_scoped_to_a_collection_stays_one_level_deep() {
  let s = store().await;
  s.set(WS, &doc_path("tasks/t1"), json!({"n": 1}), "u1", None)
    .await
    .unwrap();
  s.set(WS, &doc_path("tasks/t1/steps/s1"), json!({"n": 2}), "u1", None)
    .await
    .unwrap();
  s.set(WS, &doc_path("other/o1"), json!({"n": 3}), "u1", None)
    .await
    .unwrap();

  let rows = s
    .query(
      WS,
      &Query {
        collection: Some(collection("tasks")),
        ..Default::default()
      },
    )
    .await
    .unwrap();
  let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
  assert_eq!(ids, ["t1"]);
}

#[tokio::test]
async fn query_without_filters_returns_all_live_documents() {
  let s = store().await;
  seed_tasks(&s).await;
  s.delete(WS, &doc_path("tasks/t3"), None).await.unwrap();

  let rows = s.query(WS, &Query::default()).await.unwrap();
  assert_eq!(rows.len(), 3);
}

#[tokio::test]
async fn query_in_and_array_contains_and_like() {
  let s = store().await;
  seed_tasks(&s).await;

  let by_in = s
    .query(
      WS,
      &Query {
        filters: vec![Filter {
          field: "status".into(),
          op:    FilterOp::In,
          value: json!(["done", "archived"]),
        }],
        ..Default::default()
      },
    )
    .await
    .unwrap();
  assert_eq!(by_in.len(), 1);
  assert_eq!(by_in[0].id, "t3");

  let by_contains = s
    .query(
      WS,
      &Query {
        filters: vec![Filter {
          field: "tags".into(),
          op:    FilterOp::ArrayContains,
          value: json!("work"),
        }],
        ..Default::default()
      },
    )
    .await
    .unwrap();
  assert_eq!(by_contains.len(), 4);

  let by_like = s
    .query(
      WS,
      &Query {
        filters: vec![Filter {
          field: "status".into(),
          op:    FilterOp::Like,
          value: json!("act%"),
        }],
        ..Default::default()
      },
    )
    .await
    .unwrap();
  assert_eq!(by_like.len(), 3);
}

#[tokio::test]
async fn query_agrees_with_local_matcher() {
  // The server compilation and the client's offline evaluation must
  // accept exactly the same documents.
  let s = store().await;
  seed_tasks(&s).await;

  let filters = vec![
    Filter { field: "status".into(), op: FilterOp::Ne, value: json!("done") },
    Filter { field: "priority".into(), op: FilterOp::Ge, value: json!(2) },
  ];
  let rows = s
    .query(WS, &Query { filters: filters.clone(), ..Default::default() })
    .await
    .unwrap();

  let all = s.query(WS, &Query::default()).await.unwrap();
  let locally: Vec<&str> = all
    .iter()
    .filter(|r| tidepool_core::query::matches_all(&r.data, &filters))
    .map(|r| r.id.as_str())
    .collect();
  let remotely: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
  assert_eq!(remotely, locally);
}

#[tokio::test]
async fn query_drops_unsafe_filter_fields() {
  let s = store().await;
  seed_tasks(&s).await;

  let rows = s
    .query(
      WS,
      &Query {
        filters: vec![Filter {
          field: "status'; DROP TABLE documents;--".into(),
          op:    FilterOp::Eq,
          value: json!("active"),
        }],
        ..Default::default()
      },
    )
    .await
    .unwrap();
  // The filter is dropped, not rejected: everything comes back.
  assert_eq!(rows.len(), 4);
}

// ─── Reset ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reset_truncates_everything() {
  let s = store().await;
  s.set(WS, &doc_path("items/i1"), json!({}), "u1", None).await.unwrap();

  s.reset().await.unwrap();

  assert!(s.get(WS, &doc_path("items/i1")).await.unwrap().is_none());
  assert!(s.changes_since(WS, 0).await.unwrap().is_empty());

  // The log restarts from version 1.
  let created =
    s.set(WS, &doc_path("items/i2"), json!({}), "u1", None).await.unwrap();
  assert_eq!(created.version, 1);
}
