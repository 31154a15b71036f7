//! Drains queued mutations against the origin when a sync trigger fires.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::queue::{MutationKind, MutationQueue, PendingMutation};
use crate::config::Config;
use crate::http::Request;
use crate::network::Network;

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Acknowledged by the origin and removed
  pub synced: usize,
  /// Left queued for the next trigger
  pub remaining: usize,
}

pub struct SyncProcessor<Q: MutationQueue> {
  queue: Arc<Q>,
  network: Arc<dyn Network>,
  config: Arc<Config>,
  habit_drain: Mutex<()>,
  journal_drain: Mutex<()>,
}

impl<Q: MutationQueue> SyncProcessor<Q> {
  pub fn new(queue: Arc<Q>, network: Arc<dyn Network>, config: Arc<Config>) -> Self {
    Self {
      queue,
      network,
      config,
      habit_drain: Mutex::new(()),
      journal_drain: Mutex::new(()),
    }
  }

  pub fn queue(&self) -> &Arc<Q> {
    &self.queue
  }

  /// Handle a sync trigger tag. Unknown tags are ignored and return `None`.
  pub async fn handle_tag(&self, tag: &str) -> Result<Option<SyncReport>> {
    match MutationKind::from_tag(tag) {
      Some(kind) => self.drain(kind).await.map(Some),
      None => {
        debug!("Ignoring unknown sync tag: {}", tag);
        Ok(None)
      }
    }
  }

  /// Drain every class in tag order.
  pub async fn drain_all(&self) -> Result<SyncReport> {
    let mut total = SyncReport::default();
    for kind in MutationKind::ALL {
      let report = self.drain(kind).await?;
      total.synced += report.synced;
      total.remaining += report.remaining;
    }
    Ok(total)
  }

  /// Replay each queued mutation of one class, in queue order.
  ///
  /// An entry is removed only after a 2xx from the origin. Failures leave the
  /// entry in place and the drain moves on; nothing is retried within one call.
  /// Concurrent drains of the same class run one after the other.
  pub async fn drain(&self, kind: MutationKind) -> Result<SyncReport> {
    let _guard = match kind {
      MutationKind::HabitCompletion => self.habit_drain.lock().await,
      MutationKind::JournalEntry => self.journal_drain.lock().await,
    };

    let pending = self.queue.pending(kind)?;
    let mut report = SyncReport::default();

    for mutation in &pending {
      if self.deliver(mutation).await {
        match self.queue.remove(&mutation.id) {
          Ok(_) => report.synced += 1,
          Err(e) => {
            // Delivered but still queued: it will be sent again next trigger
            warn!("Failed to remove synced mutation {}: {}", mutation.id, e);
            report.remaining += 1;
          }
        }
      } else {
        report.remaining += 1;
      }
    }

    info!(
      "Sync {}: {} synced, {} remaining",
      kind, report.synced, report.remaining
    );
    Ok(report)
  }

  async fn deliver(&self, mutation: &PendingMutation) -> bool {
    let request = match self
      .config
      .resolve(self.config.sync.endpoint(mutation.kind))
      .and_then(|url| Request::post_json(url, &mutation.payload))
    {
      Ok(request) => request,
      Err(e) => {
        warn!("Cannot build request for mutation {}: {}", mutation.id, e);
        return false;
      }
    };

    match self.network.fetch(&request).await {
      Ok(response) if response.ok() => {
        debug!("Synced {} mutation {}", mutation.kind, mutation.id);
        true
      }
      Ok(response) => {
        debug!(
          "Origin rejected {} mutation {} with status {}",
          mutation.kind, mutation.id, response.status
        );
        false
      }
      Err(e) => {
        debug!("Failed to sync {} mutation {}: {}", mutation.kind, mutation.id, e);
        false
      }
    }
  }
}
