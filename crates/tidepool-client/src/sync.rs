//! Background convergence: serial queue drain and incremental sync.
//!
//! Two periodic triggers run while the client is alive — queue drain
//! every 5 s and incremental sync every 30 s. Both are cheap when idle
//! and stop when the last clone of the client is dropped.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tidepool_core::{event::EventKind, path::DocPath, value::merge_patch};

use crate::{
  ClientInner, TidepoolClient,
  cache::QueueKind,
  error::Result,
};

const DRAIN_INTERVAL: Duration = Duration::from_secs(5);
const SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Replay the outbound queue in order. The first failure — network or a
/// server refusal — halts the drain; the entry stays queued for the next
/// trigger (or until the caller clears it).
pub(crate) async fn drain(client: &TidepoolClient) -> Result<usize> {
  let Some(cache) = client.cache() else {
    return Ok(0);
  };

  let mut drained = 0;
  while let Some(op) = cache.first_queued().await? {
    let path = match DocPath::parse(&op.path) {
      Ok(p) => p,
      Err(e) => {
        tracing::warn!("dropping unparseable queued path {:?}: {e}", op.path);
        cache.dequeue(op.seq).await?;
        continue;
      }
    };
    let data = op.data.unwrap_or(serde_json::Value::Null);

    let outcome = match op.kind {
      QueueKind::Set => client
        .api()
        .set_doc(client.workspace(), &path, &data, client.user(), None)
        .await
        .map(|ack| Some(ack.version)),
      QueueKind::Update => client
        .api()
        .update_doc(client.workspace(), &path, &data, client.user(), None)
        .await
        .map(|ack| Some(ack.version)),
      QueueKind::Delete => client
        .api()
        .delete_doc(client.workspace(), &path, client.user(), None)
        .await
        .map(|()| None),
    };

    match outcome {
      Ok(Some(version)) => {
        cache.mark_synced(&op.path, version).await?;
        cache.dequeue(op.seq).await?;
        drained += 1;
      }
      Ok(None) => {
        cache.remove_document(&op.path).await?;
        cache.dequeue(op.seq).await?;
        drained += 1;
      }
      Err(e) => {
        tracing::debug!(path = op.path, "queue drain halted: {e}");
        break;
      }
    }
  }
  Ok(drained)
}

/// Pull events past the last synced version and fold them into the
/// cache. Entries with pending local writes are left alone — the drain
/// owns their convergence.
pub(crate) async fn sync_once(client: &TidepoolClient) -> Result<usize> {
  let Some(cache) = client.cache() else {
    return Ok(0);
  };

  let since = cache.last_synced_version().await?;
  let page = client
    .api()
    .changes_since(client.workspace(), since, client.user())
    .await?;

  let mut applied = 0;
  let mut cursor = since;
  for event in page.changes {
    cursor = cursor.max(event.version);

    let cached = cache.get_document(&event.path).await?;
    if cached.as_ref().is_some_and(|c| c.has_pending_writes()) {
      continue;
    }

    match event.event_type {
      EventKind::Insert | EventKind::Set => {
        cache
          .upsert_document(&event.path, &event.payload, event.version, false)
          .await?;
        applied += 1;
      }
      EventKind::Update => {
        // The payload is a patch; only a cached full document can
        // absorb it. Uncached documents are fetched on demand instead.
        if let Some(cached) = cached {
          let mut merged = cached.data;
          merge_patch(&mut merged, &event.payload);
          cache
            .upsert_document(&event.path, &merged, event.version, false)
            .await?;
          applied += 1;
        }
      }
      EventKind::Delete => {
        cache.remove_document(&event.path).await?;
        applied += 1;
      }
    }
  }

  cache.set_last_synced_version(cursor).await?;
  Ok(applied)
}

/// Start the periodic triggers. The tasks hold only a weak handle, so
/// they exit when the last client clone is dropped.
pub(crate) fn spawn_background(client: &TidepoolClient) {
  let weak: Weak<ClientInner> = Arc::downgrade(&client.inner);

  tokio::spawn({
    let weak = weak.clone();
    async move {
      let mut tick = tokio::time::interval(DRAIN_INTERVAL);
      tick.tick().await; // the first tick fires immediately
      loop {
        tick.tick().await;
        let Some(inner) = weak.upgrade() else { break };
        let client = TidepoolClient { inner };
        if let Err(e) = drain(&client).await {
          tracing::debug!("periodic drain failed: {e}");
        }
      }
    }
  });

  tokio::spawn(async move {
    let mut tick = tokio::time::interval(SYNC_INTERVAL);
    tick.tick().await;
    loop {
      tick.tick().await;
      let Some(inner) = weak.upgrade() else { break };
      let client = TidepoolClient { inner };
      if let Err(e) = sync_once(&client).await {
        tracing::debug!("periodic sync failed: {e}");
      }
    }
  });
}
