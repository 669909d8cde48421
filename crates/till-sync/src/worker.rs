//! # Outbox Worker
//!
//! Drains `sync_queue` to a [`RemoteSink`], out of band from the sale path.
//!
//! ## Drain Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         OutboxWorker::drain_once                        │
//! │                                                                         │
//! │  1. Fetch: deliverable(batch_size, max_retries)                        │
//! │            PENDING, by seq, dead letters and their successors excluded │
//! │                                                                         │
//! │  2. For each entry, in order:                                          │
//! │     a. row already failed this pass? → hold back (keep causal order)   │
//! │     b. push(OutboundOperation)                                         │
//! │     c. ok  → mark_synced(id)                                           │
//! │     d. err → record_failure(id, message); block the row                │
//! │                                                                         │
//! │  3. Anything delivered → company.record_sync(now)                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Run Loop
//! ```text
//!   ┌──────────┐   tick / sync_now    ┌──────────────┐   clean    ┌───────┐
//!   │  Waiting │ ───────────────────► │  drain_once  │ ─────────► │ reset │
//!   └──────────┘                      └──────┬───────┘            └───────┘
//!        ▲                                   │ failures
//!        │            sleep(next_backoff)    ▼
//!        └───────────────────────────────────┘
//! ```
//!
//! The worker only moves queue rows and stamps `last_sync_at`; it never
//! touches business rows.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, error, info, warn};

use till_db::{DbError, Store};

use crate::config::{SyncMode, SyncSettings};
use crate::error::{SyncError, SyncResult};
use crate::remote::{DeliveryError, OutboundOperation, RemoteSink};

// =============================================================================
// Reports & Status
// =============================================================================

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Entries pushed to the sink.
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Failures the sink marked as permanent.
    pub rejected: usize,
    /// Entries skipped because an earlier entry for the same row failed.
    pub held_back: usize,
    /// Entries that reached `max_retries` during this pass.
    pub dead_lettered: usize,
    pub last_error: Option<String>,
}

impl DrainReport {
    pub fn had_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn is_empty(&self) -> bool {
        self.attempted == 0 && self.held_back == 0
    }
}

/// Snapshot of the worker for status displays.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStatus {
    pub mode: SyncMode,
    pub running: bool,
    pub pending_count: i64,
    pub dead_letters: usize,
    /// Epoch seconds of the last delivery, from the company row.
    pub last_sync_at: Option<i64>,
    /// `last_sync_at` as RFC 3339.
    pub last_sync: Option<String>,
    pub last_error: Option<String>,
    pub last_report: Option<DrainReport>,
}

// =============================================================================
// Worker Handle
// =============================================================================

/// Handle for controlling a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    sync_now: Arc<Notify>,
    status: Arc<RwLock<WorkerStatus>>,
}

impl WorkerHandle {
    /// Starts a pass without waiting for the next tick.
    ///
    /// A request made while a pass is running schedules one more pass.
    pub fn sync_now(&self) {
        self.sync_now.notify_one();
    }

    /// Triggers graceful shutdown. The current pass finishes first.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    /// Returns the latest status snapshot.
    pub async fn status(&self) -> WorkerStatus {
        self.status.read().await.clone()
    }
}

// =============================================================================
// Outbox Worker
// =============================================================================

/// Delivers the outbox to a remote sink.
pub struct OutboxWorker {
    store: Store,
    sink: Arc<dyn RemoteSink>,
    settings: SyncSettings,
    status: Arc<RwLock<WorkerStatus>>,
    sync_now: Arc<Notify>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl OutboxWorker {
    /// Creates a new worker and returns a handle.
    pub fn new(store: Store, sink: Arc<dyn RemoteSink>, settings: SyncSettings) -> (Self, WorkerHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let sync_now = Arc::new(Notify::new());
        let status = Arc::new(RwLock::new(WorkerStatus {
            mode: settings.mode,
            ..Default::default()
        }));

        let worker = OutboxWorker {
            store,
            sink,
            settings,
            status: status.clone(),
            sync_now: sync_now.clone(),
            shutdown_rx,
        };

        let handle = WorkerHandle {
            shutdown_tx,
            sync_now,
            status,
        };

        (worker, handle)
    }

    /// Runs one drain pass.
    ///
    /// Delivery failures are recorded on their queue rows and reported, not
    /// returned; an `Err` means the store itself could not be read or written.
    pub async fn drain_once(&self) -> SyncResult<DrainReport> {
        let queue = self.store.sync_queue();
        let max_retries = self.settings.max_retries;
        let entries = queue.deliverable(self.settings.batch_size, max_retries).await?;

        let mut report = DrainReport::default();
        if entries.is_empty() {
            debug!("No pending outbox entries");
            self.refresh_status(&report).await?;
            return Ok(report);
        }

        info!(count = entries.len(), "Draining outbox batch");

        let mut blocked: HashSet<(String, String)> = HashSet::new();

        for entry in entries {
            let row = (entry.entity.clone(), entry.entity_id.clone());
            if blocked.contains(&row) {
                debug!(
                    id = %entry.id,
                    entity = %entry.entity,
                    entity_id = %entry.entity_id,
                    "Holding back entry behind a failed one"
                );
                report.held_back += 1;
                continue;
            }

            report.attempted += 1;
            let outcome = match OutboundOperation::from_entry(&entry) {
                Ok(operation) => self.sink.push(&operation).await,
                Err(err) => Err(DeliveryError::from(err)),
            };

            match outcome {
                Ok(()) => {
                    queue.mark_synced(&entry.id).await?;
                    report.delivered += 1;
                }
                Err(err) => {
                    queue.record_failure(&entry.id, &err.message).await?;
                    blocked.insert(row);
                    report.failed += 1;
                    if !err.retryable {
                        report.rejected += 1;
                    }

                    let attempts = entry.retry_count + 1;
                    error!(
                        id = %entry.id,
                        entity = %entry.entity,
                        entity_id = %entry.entity_id,
                        attempts,
                        retryable = err.retryable,
                        error = %err.message,
                        "Outbox delivery failed"
                    );

                    if max_retries > 0 && attempts >= i64::from(max_retries) {
                        warn!(
                            id = %entry.id,
                            entity = %entry.entity,
                            entity_id = %entry.entity_id,
                            attempts,
                            "Entry exhausted its retries, parked as dead letter"
                        );
                        report.dead_lettered += 1;
                    }

                    report.last_error = Some(err.message);
                }
            }
        }

        if report.delivered > 0 {
            match self.store.company().record_sync(self.store.now()).await {
                Ok(()) => {}
                Err(DbError::NotInitialized) => {
                    warn!("Delivered entries but no company is registered to stamp");
                }
                Err(err) => return Err(err.into()),
            }
        }

        info!(
            delivered = report.delivered,
            failed = report.failed,
            held_back = report.held_back,
            "Outbox pass finished"
        );

        self.refresh_status(&report).await?;
        Ok(report)
    }

    /// Runs the drain loop until [`WorkerHandle::shutdown`].
    ///
    /// This should be spawned as a background task. In offline mode it
    /// returns immediately.
    pub async fn run(mut self) {
        if !self.settings.mode.is_sync_enabled() {
            info!("Sync is disabled (mode: offline)");
            return;
        }

        info!(
            batch_size = self.settings.batch_size,
            poll_interval_secs = self.settings.poll_interval_secs,
            max_retries = self.settings.max_retries,
            "Outbox worker starting"
        );
        self.status.write().await.running = true;

        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut backoff = self.create_backoff();
        let mut retry_after: Option<Duration> = None;

        loop {
            match retry_after.take() {
                Some(delay) => {
                    debug!(?delay, "Waiting before retrying failed entries");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.sync_now.notified() => {
                            debug!("Sync requested during backoff");
                        }
                        _ = self.shutdown_rx.recv() => {
                            info!("Shutdown during backoff");
                            break;
                        }
                    }
                }
                None => {
                    tokio::select! {
                        _ = interval.tick() => {}
                        _ = self.sync_now.notified() => {
                            debug!("Sync requested");
                        }
                        _ = self.shutdown_rx.recv() => {
                            info!("Outbox worker shutting down");
                            break;
                        }
                    }
                }
            }

            let clean = match self.drain_once().await {
                Ok(report) => !report.had_failures(),
                Err(e) => {
                    error!(?e, "Outbox pass failed");
                    self.status.write().await.last_error = Some(e.to_string());
                    false
                }
            };

            if clean {
                backoff.reset();
            } else {
                retry_after = backoff.next_backoff();
            }
        }

        self.status.write().await.running = false;
        info!("Outbox worker stopped");
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.settings.initial_backoff(),
            max_interval: self.settings.max_backoff(),
            multiplier: 2.0,
            max_elapsed_time: None, // No limit on total time
            ..Default::default()
        }
    }

    async fn refresh_status(&self, report: &DrainReport) -> SyncResult<()> {
        let queue = self.store.sync_queue();
        let pending_count = queue.count_pending().await?;
        let dead_letters = queue.dead_letters(self.settings.max_retries).await?.len();
        let last_sync_at = self
            .store
            .company()
            .get_company()
            .await?
            .and_then(|company| company.last_sync_at);

        let mut status = self.status.write().await;
        status.pending_count = pending_count;
        status.dead_letters = dead_letters;
        status.last_sync_at = last_sync_at;
        status.last_sync = last_sync_at
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|at| at.to_rfc3339());
        if report.had_failures() {
            status.last_error = report.last_error.clone();
        } else if report.delivered > 0 {
            status.last_error = None;
        }
        status.last_report = Some(report.clone());

        Ok(())
    }
}
