//! Drains the pending-write queue against the remote store
//!
//! Writes are dispatched in fixed-size batches; the writes of one batch run
//! concurrently and batches run one after another. A batch never holds two
//! writes for the same record, so per-record order is the queue order.
//!
//! Outcome per write:
//! - applied or unique violation: removed from the queue
//! - permission denied: removed, reported, never retried
//! - network failure: kept, and no further batch is started
//! - anything else: moved to the dead-letter table

use crate::dispatch::Dispatcher;
use crate::error::{ErrorClass, SyncResult};
use crate::network::NetworkMonitor;
use crate::queue::{PendingWrite, PendingWriteQueue};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Default number of writes dispatched concurrently
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// A write the server refused for lack of permission
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionDenial {
    pub write_id: i64,
    pub kind: &'static str,
    pub message: String,
}

/// Summary of one sync run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub applied: usize,
    pub already_applied: usize,
    pub dead_lettered: usize,
    pub permission_denied: Vec<PermissionDenial>,
    /// Whether a network failure stopped the run
    pub halted: bool,
    /// Writes still queued after the run
    pub remaining: usize,
}

impl SyncReport {
    pub fn is_drained(&self) -> bool {
        self.remaining == 0
    }
}

pub struct SyncEngine {
    dispatcher: Dispatcher,
    queue: PendingWriteQueue,
    network: NetworkMonitor,
    batch_size: usize,
    run_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        dispatcher: Dispatcher,
        queue: PendingWriteQueue,
        network: NetworkMonitor,
        batch_size: usize,
    ) -> Self {
        Self {
            dispatcher,
            queue,
            network,
            batch_size: batch_size.max(1),
            run_lock: Mutex::new(()),
        }
    }

    /// Drain the queue; `true` when nothing is left
    pub async fn sync(&self) -> SyncResult<bool> {
        Ok(self.sync_with_report().await?.is_drained())
    }

    pub async fn sync_with_report(&self) -> SyncResult<SyncReport> {
        let _run = self.run_lock.lock().await;
        let mut report = SyncReport::default();

        if !self.network.is_online() {
            report.remaining = self.queue.len().await?;
            tracing::debug!(remaining = report.remaining, "Offline, skipping sync");
            return Ok(report);
        }

        let writes = self.queue.drain_all().await?;
        if writes.is_empty() {
            return Ok(report);
        }

        tracing::info!(pending = writes.len(), "Starting sync");

        for batch in plan_batches(writes, self.batch_size) {
            let results = join_all(batch.iter().map(|write| self.dispatcher.apply(&write.op))).await;

            for (write, result) in batch.iter().zip(results) {
                let Err(e) = result else {
                    self.queue.remove(write.id).await?;
                    report.applied += 1;
                    continue;
                };

                match e.class() {
                    ErrorClass::Network => {
                        tracing::warn!(write_id = write.id, error = %e, "Network failure, pausing sync");
                        report.halted = true;
                    }
                    ErrorClass::UniqueViolation => {
                        tracing::debug!(write_id = write.id, "Write already applied remotely");
                        self.dispatcher.settle_duplicate(&write.op).await?;
                        self.queue.remove(write.id).await?;
                        report.already_applied += 1;
                    }
                    ErrorClass::Permission => {
                        tracing::error!(
                            write_id = write.id,
                            kind = write.op.kind(),
                            error = %e,
                            "Write rejected for lack of permission"
                        );
                        self.queue.remove(write.id).await?;
                        report.permission_denied.push(PermissionDenial {
                            write_id: write.id,
                            kind: write.op.kind(),
                            message: e.to_string(),
                        });
                    }
                    _ => {
                        self.queue.move_to_dead_letter(write, &e.to_string()).await?;
                        report.dead_lettered += 1;
                    }
                }
            }

            if report.halted {
                break;
            }
        }

        report.remaining = self.queue.len().await?;
        tracing::info!(
            applied = report.applied,
            already_applied = report.already_applied,
            dead_lettered = report.dead_lettered,
            permission_denied = report.permission_denied.len(),
            remaining = report.remaining,
            "Sync finished"
        );
        Ok(report)
    }

    /// Run a sync on every offline-to-online transition
    pub fn spawn_auto_sync(self: Arc<Self>) -> JoinHandle<()> {
        let mut connectivity = self.network.subscribe();
        tokio::spawn(async move {
            while connectivity.changed().await.is_ok() {
                let online = *connectivity.borrow();
                if !online {
                    continue;
                }
                if let Err(e) = self.sync_with_report().await {
                    tracing::warn!(error = %e, "Background sync failed");
                }
            }
        })
    }
}

/// Split writes into batches of at most `size`, keeping queue order and
/// never putting two writes for the same record in one batch
pub fn plan_batches(writes: Vec<PendingWrite>, size: usize) -> Vec<Vec<PendingWrite>> {
    let size = size.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<PendingWrite> = Vec::new();
    let mut entities = HashSet::new();

    for write in writes {
        let key = write.op.entity_key();
        let waits_on_current = entities.contains(&key)
            || write
                .op
                .depends_on()
                .is_some_and(|dependency| entities.contains(&dependency));
        if current.len() >= size || waits_on_current {
            batches.push(std::mem::take(&mut current));
            entities.clear();
        }
        entities.insert(key);
        current.push(write);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
