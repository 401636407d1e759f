//! Live subscriptions — the per-subscription state machines that turn
//! broker publications into debounced snapshot deliveries.
//!
//! Publications are at-least-once; every subscription keeps the highest
//! version it has seen and drops anything at or below it. Queries with an
//! ordering or a limit re-fetch authoritatively instead of patching the
//! result set locally, since limit boundaries cannot be maintained from
//! deltas alone.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::StreamExt as _;
use tidepool_core::{
  change::{ChangeKind, ChangeRecord, collection_subject, doc_subject},
  query::{QueryRow, matches_all},
};
use tokio::{task::JoinHandle, time::Instant};

use crate::{
  DocSnapshot, QuerySnapshot, SnapshotMetadata, error::{Error, Result},
  query::QueryBuilder, refs::DocumentRef,
};

/// Coalescing window for bursts of publications.
const DEBOUNCE: Duration = Duration::from_millis(50);

/// A live subscription. Dropping it (or calling [`Self::dispose`])
/// cancels the listener task and releases the broker subscription and
/// the debounce timer with it.
pub struct Subscription {
  task: JoinHandle<()>,
}

impl Subscription {
  pub fn dispose(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.task.abort();
  }
}

// ─── Collection queries ──────────────────────────────────────────────────────

pub(crate) async fn listen_query<F>(
  builder: QueryBuilder,
  callback: F,
) -> Result<Subscription>
where
  F: Fn(QuerySnapshot) + Send + Sync + 'static,
{
  let client = builder.client.clone();
  let broker = client.broker().await?;
  let subject =
    collection_subject(client.workspace(), &builder.collection);
  let mut subscriber =
    broker.subscribe(subject).await.map_err(Error::broker)?;

  // Initial authoritative fetch, delivered before any delta.
  let initial = builder.get().await?;
  callback(initial.clone());

  let mut results: BTreeMap<String, QueryRow> = initial
    .rows
    .iter()
    .map(|row| (row.path.clone(), row.clone()))
    .collect();
  let mut last_seen =
    initial.rows.iter().map(|r| r.version).max().unwrap_or(0);
  let needs_refetch =
    builder.order_by.is_some() || builder.limit.is_some();

  let task = tokio::spawn(async move {
    let mut dirty = false;
    let mut deadline = Instant::now();
    loop {
      tokio::select! {
        message = subscriber.next() => {
          // The stream only ends when the subscription is dropped; the
          // broker client resubscribes across reconnects on its own.
          let Some(message) = message else { break };
          let Ok(record) =
            serde_json::from_slice::<ChangeRecord>(&message.payload)
          else {
            continue;
          };
          if record.version <= last_seen {
            continue; // duplicate or stale publication
          }
          last_seen = record.version;

          match record.kind {
            ChangeKind::Deleted => {
              results.remove(&record.path);
            }
            ChangeKind::Created | ChangeKind::Updated => {
              let matching = record
                .data
                .as_ref()
                .is_some_and(|d| matches_all(d, &builder.filters));
              if matching {
                let data = record.data.expect("checked above");
                results.insert(record.path.clone(), QueryRow {
                  id: record.id,
                  path: record.path,
                  data,
                  version: record.version,
                });
              } else {
                results.remove(&record.path);
              }
            }
          }
          dirty = true;
          deadline = Instant::now() + DEBOUNCE;
        }
        _ = tokio::time::sleep_until(deadline), if dirty => {
          dirty = false;
          if needs_refetch {
            // Order and limit cannot be maintained from deltas; ask the
            // server for the authoritative result set.
            match builder.get().await {
              Ok(snapshot) => {
                results = snapshot
                  .rows
                  .iter()
                  .map(|row| (row.path.clone(), row.clone()))
                  .collect();
                last_seen = snapshot
                  .rows
                  .iter()
                  .map(|r| r.version)
                  .max()
                  .unwrap_or(last_seen)
                  .max(last_seen);
                callback(snapshot);
              }
              Err(e) => {
                tracing::debug!("live query re-fetch failed: {e}");
                dirty = true; // try again on the next delivery tick
                deadline = Instant::now() + DEBOUNCE;
              }
            }
          } else {
            callback(QuerySnapshot {
              rows:     results.values().cloned().collect(),
              metadata: SnapshotMetadata {
                from_cache:         false,
                has_pending_writes: false,
              },
            });
          }
        }
      }
    }
  });

  Ok(Subscription { task })
}

// ─── Single documents ────────────────────────────────────────────────────────

pub(crate) async fn listen_doc<F>(
  doc: DocumentRef,
  callback: F,
) -> Result<Subscription>
where
  F: Fn(Option<DocSnapshot>) + Send + Sync + 'static,
{
  let client = doc.client_ref().clone();
  let broker = client.broker().await?;
  let subject = doc_subject(client.workspace(), doc.doc_path());
  let mut subscriber =
    broker.subscribe(subject).await.map_err(Error::broker)?;

  // Initial state: the document, or None if it does not exist yet.
  let mut last_seen = 0i64;
  match doc.get().await {
    Ok(snapshot) => {
      last_seen = snapshot.version;
      callback(Some(snapshot));
    }
    Err(Error::NotFound(_)) => callback(None),
    Err(e) => return Err(e),
  }
  let task = tokio::spawn(async move {
    while let Some(message) = subscriber.next().await {
      let Ok(record) =
        serde_json::from_slice::<ChangeRecord>(&message.payload)
      else {
        continue;
      };
      if record.version <= last_seen {
        continue;
      }
      last_seen = record.version;

      match record.kind {
        ChangeKind::Deleted => callback(None),
        ChangeKind::Created | ChangeKind::Updated => {
          // Re-fetch rather than trusting the publication body; the
          // fetch also refreshes the cache.
          match doc.get().await {
            Ok(snapshot) => callback(Some(snapshot)),
            Err(Error::NotFound(_)) => callback(None),
            Err(e) => tracing::debug!("live doc re-fetch failed: {e}"),
          }
        }
      }
    }
  });

  Ok(Subscription { task })
}
