//! The transaction runtime: read-modify-write with OCC retries.
//!
//! The caller's function reads through the transaction handle — each read
//! records the snapshot version — and stages writes against it. Commit
//! submits the staged operations as one atomic batch with per-operation
//! `expected_version` preconditions. A conflict re-runs the function with
//! fresh reads, under full-jitter backoff, up to a bounded attempt count.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng as _;
use tidepool_core::{path::DocPath, store::BatchOp, value::Payload};

use crate::{
  TidepoolClient,
  error::{Error, Result},
};

/// Bounded retry budget for conflicting transactions.
const MAX_ATTEMPTS: u32 = 10;
/// Full-jitter backoff parameters:
/// `delay = random(0, min(BASE · FACTOR^attempt, CAP))`.
const BASE_DELAY_MS: f64 = 100.0;
const BACKOFF_FACTOR: f64 = 1.5;
const MAX_DELAY_MS: f64 = 2000.0;

/// Sample the backoff delay for a (zero-based) attempt.
pub(crate) fn jitter_delay(attempt: u32) -> Duration {
  let cap = (BASE_DELAY_MS * BACKOFF_FACTOR.powi(attempt as i32))
    .min(MAX_DELAY_MS);
  let ms = rand::thread_rng().gen_range(0.0..cap);
  Duration::from_millis(ms as u64)
}

/// The handle the user function reads and stages writes through.
pub struct Transaction {
  client: TidepoolClient,
  /// Version observed for each path read in this attempt. Absent
  /// documents record version 0 so a later write asserts "still absent".
  reads:  HashMap<String, i64>,
  staged: Vec<BatchOp>,
}

impl Transaction {
  fn new(client: TidepoolClient) -> Self {
    Self { client, reads: HashMap::new(), staged: Vec::new() }
  }

  /// Read a document, recording its version for the commit precondition.
  /// Returns `None` when the document does not exist.
  pub async fn get(&mut self, path: &str) -> Result<Option<Payload>> {
    let doc_path = DocPath::parse(path)?;
    match self
      .client
      .api()
      .get_doc(self.client.workspace(), &doc_path, self.client.user())
      .await
    {
      Ok(doc) => {
        self.reads.insert(path.to_owned(), doc.version);
        Ok(Some(doc.data))
      }
      Err(Error::NotFound(_)) => {
        self.reads.insert(path.to_owned(), 0);
        Ok(None)
      }
      Err(e) => Err(e),
    }
  }

  fn expected_for(&self, path: &str) -> Option<i64> {
    self.reads.get(path).copied()
  }

  /// Stage a full overwrite.
  pub fn set(&mut self, path: &str, data: Payload) -> Result<()> {
    let expected_version = self.expected_for(path);
    self.staged.push(BatchOp::Set {
      path: DocPath::parse(path)?,
      data,
      expected_version,
    });
    Ok(())
  }

  /// Stage a merge-patch.
  pub fn update(&mut self, path: &str, data: Payload) -> Result<()> {
    let expected_version = self.expected_for(path);
    self.staged.push(BatchOp::Update {
      path: DocPath::parse(path)?,
      data,
      expected_version,
    });
    Ok(())
  }

  /// Stage a soft delete.
  pub fn delete(&mut self, path: &str) -> Result<()> {
    let expected_version = self.expected_for(path);
    self
      .staged
      .push(BatchOp::Delete { path: DocPath::parse(path)?, expected_version });
    Ok(())
  }
}

/// Run `f` until its staged batch commits. Returns the final committed
/// version, or `0` when the function staged nothing.
pub(crate) async fn run<F>(client: &TidepoolClient, mut f: F) -> Result<i64>
where
  F: AsyncFnMut(&mut Transaction) -> Result<()>,
{
  for attempt in 0..MAX_ATTEMPTS {
    let mut tx = Transaction::new(client.clone());
    f(&mut tx).await?;
    if tx.staged.is_empty() {
      return Ok(0);
    }

    match client
      .api()
      .batch(client.workspace(), &tx.staged, client.user())
      .await
    {
      Ok(version) => {
        // Refresh the cache from the committed writes. Per-operation
        // versions are not reported; the final version is a safe upper
        // bound for every path in the batch.
        for op in &tx.staged {
          match op {
            BatchOp::Set { path, data, .. } => {
              client
                .absorb_authoritative(&path.to_string(), data, version)
                .await?;
            }
            BatchOp::Update { path, data, .. } => {
              // The staged data is a patch; only a cached full document
              // can absorb it.
              if let Some(cache) = client.cache() {
                let path = path.to_string();
                if let Some(cached) = cache.get_document(&path).await?
                  && !cached.has_pending_writes()
                {
                  let mut merged = cached.data;
                  tidepool_core::value::merge_patch(&mut merged, data);
                  cache.upsert_document(&path, &merged, version, false).await?;
                }
              }
            }
            BatchOp::Delete { path, .. } => {
              if let Some(cache) = client.cache() {
                cache.remove_document(&path.to_string()).await?;
              }
            }
          }
        }
        return Ok(version);
      }
      Err(Error::Conflict(reason)) => {
        let delay = jitter_delay(attempt);
        tracing::debug!(
          attempt,
          ?delay,
          "transaction conflicted ({reason}); retrying"
        );
        tokio::time::sleep(delay).await;
      }
      Err(e) => return Err(e),
    }
  }

  Err(Error::TransactionConflict { attempts: MAX_ATTEMPTS })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn jitter_stays_within_the_growing_cap() {
    for attempt in 0..12 {
      let cap = (BASE_DELAY_MS * BACKOFF_FACTOR.powi(attempt as i32))
        .min(MAX_DELAY_MS);
      for _ in 0..50 {
        let delay = jitter_delay(attempt);
        assert!(delay < Duration::from_millis(cap as u64 + 1));
      }
    }
  }

  #[test]
  fn jitter_caps_at_two_seconds() {
    for _ in 0..100 {
      assert!(jitter_delay(30) <= Duration::from_millis(2000));
    }
  }
}
