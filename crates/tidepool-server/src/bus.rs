//! NATS publication fan-out.
//!
//! After a mutation commits, its change record is published on two
//! subjects: the document channel and the containing collection channel.
//! Publication is best-effort — a failure never rolls back the committed
//! write; clients reconcile through periodic incremental sync.

use std::time::Duration;

use async_nats::ConnectOptions;
use bytes::Bytes;
use tidepool_core::{
  change::{ChangeRecord, collection_subject, doc_subject},
  path::DocPath,
};
use tracing::{info, warn};

/// Ping interval for broker keep-alive.
const PING_INTERVAL: Duration = Duration::from_secs(120);

/// Publishes change records onto deterministically named channels.
/// Constructed disabled when no broker is configured; all publishes then
/// become no-ops and clients rely on sync alone.
pub struct EventBus {
  client: Option<async_nats::Client>,
}

impl EventBus {
  /// Connect to the broker. Fails fast if it is unreachable — reconnection
  /// is handled by the client library after a successful initial connect.
  pub async fn connect(url: &str) -> Result<Self, async_nats::ConnectError> {
    let client = ConnectOptions::new()
      .name("tidepool-server")
      .ping_interval(PING_INTERVAL)
      .connection_timeout(Duration::from_secs(5))
      .connect(url)
      .await?;
    info!("connected to broker at {url}");
    Ok(Self { client: Some(client) })
  }

  /// A bus that drops every publication — for broker-less deployments and
  /// tests.
  pub fn disabled() -> Self {
    Self { client: None }
  }

  /// Publish one committed change on its document and collection
  /// channels. Callers publish batch changes in batch order by awaiting
  /// each record before the next.
  pub async fn publish_change(&self, workspace_id: &str, record: &ChangeRecord) {
    let Some(client) = &self.client else {
      return;
    };

    let path = match DocPath::parse(&record.path) {
      Ok(p) => p,
      Err(e) => {
        warn!("unpublishable change record path {:?}: {e}", record.path);
        return;
      }
    };

    let payload: Bytes = match serde_json::to_vec(record) {
      Ok(bytes) => bytes.into(),
      Err(e) => {
        warn!("change record for {:?} failed to serialize: {e}", record.path);
        return;
      }
    };

    let subjects = [
      doc_subject(workspace_id, &path),
      collection_subject(workspace_id, &path.parent_collection()),
    ];
    for subject in subjects {
      if let Err(e) = client.publish(subject.clone(), payload.clone()).await {
        // Best-effort: log and move on; sync will reconcile.
        warn!("publish to {subject} failed: {e}");
      }
    }
  }
}
