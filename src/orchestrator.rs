//! # Sync Orchestrator
//!
//! The domain-facing surface of the sync engine. Application code calls the
//! typed `on_*` hooks when a project, milestone, deliverable, or lead
//! changes; the orchestrator marks the record `Syncing`, builds a prioritized
//! task, and hands it to the queue. Everything after that is asynchronous.
//!
//! The orchestrator also owns the reverse direction. It registers a finalize
//! hook on the queue, so the domain projection ([`SyncStatus`] per entity)
//! is reconciled the moment a task reaches a terminal state:
//!
//! - `Completed` ⇒ `Synced`, external id recorded, error cleared. A DELETE
//!   leaves the stored external id intact for audit.
//! - `Failed` ⇒ `Failed` with the verbatim executor error.
//!
//! The in-memory queue is not the system of record. The projection is: after
//! a restart, [`SyncOrchestrator::sync_all_pending`] re-enqueues every entity
//! whose projection still says `Pending`, and
//! [`SyncOrchestrator::retry_all_failed`] gives operators a one-call retry
//! sweep for entities stuck in `Failed`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::executor::ExecutorRegistry;
use crate::queue::{FinalizeHook, QueueStats, SyncQueue, TaskOutcome};
use crate::state::SyncStatus;
use crate::task::{EnqueueRequest, SyncTask};
use crate::types::{ChangeKind, EntitySnapshot, EntityType, SyncOperation};

/// Per-entity-type projection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityStatusCounts {
    pub pending: usize,
    pub syncing: usize,
    pub synced: usize,
    pub failed: usize,
}

/// Combined queue and projection view for health dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub queue: QueueStats,
    pub domain: HashMap<EntityType, EntityStatusCounts>,
}

/// The narrow write contract the relational store implements.
///
/// `external_id: None` means "leave the stored external id untouched"; the
/// store is expected to stamp `last_synced_at` whenever it records `Synced`.
#[async_trait]
pub trait SyncStatusStore: Send + Sync {
    async fn update_sync_status(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        status: SyncStatus,
        external_id: Option<String>,
        error: Option<String>,
    ) -> Result<()>;

    /// Snapshots of every entity whose projection currently has `status`,
    /// with `external_id` populated when one is known.
    async fn snapshots_with_status(&self, status: SyncStatus) -> Result<Vec<EntitySnapshot>>;

    async fn status_counts(&self) -> Result<HashMap<EntityType, EntityStatusCounts>>;
}

/// Reconciles the domain projection when a task finalizes.
struct ProjectionHook {
    status_store: Arc<dyn SyncStatusStore>,
}

#[async_trait]
impl FinalizeHook for ProjectionHook {
    async fn on_finalized(&self, task: &SyncTask, outcome: &TaskOutcome) {
        let result = match outcome {
            TaskOutcome::Completed { external_id } => {
                // A DELETE's outcome carries no id worth writing back.
                let recorded_id = match task.operation {
                    SyncOperation::Delete => None,
                    _ => external_id.clone(),
                };
                self.status_store
                    .update_sync_status(
                        task.entity_type,
                        &task.entity_id,
                        SyncStatus::Synced,
                        recorded_id,
                        None,
                    )
                    .await
            }
            TaskOutcome::Failed { error } => {
                self.status_store
                    .update_sync_status(
                        task.entity_type,
                        &task.entity_id,
                        SyncStatus::Failed,
                        None,
                        Some(error.clone()),
                    )
                    .await
            }
        };

        if let Err(e) = result {
            // The task outcome stands; the projection will self-heal on the
            // next sweep.
            warn!(
                task_id = %task.id,
                entity_type = %task.entity_type,
                entity_id = %task.entity_id,
                error = %e,
                "Failed to reconcile sync projection"
            );
        }
    }
}

/// Domain-facing API over the sync queue.
pub struct SyncOrchestrator {
    queue: Arc<SyncQueue>,
    status_store: Arc<dyn SyncStatusStore>,
}

impl SyncOrchestrator {
    /// Wire the queue to the projection store and register the finalize
    /// hook. Call [`SyncOrchestrator::start`] afterwards to begin
    /// dispatching.
    pub fn new(queue: Arc<SyncQueue>, status_store: Arc<dyn SyncStatusStore>) -> Arc<Self> {
        queue.register_finalize_hook(Arc::new(ProjectionHook {
            status_store: Arc::clone(&status_store),
        }));

        Arc::new(Self {
            queue,
            status_store,
        })
    }

    /// Convenience constructor: build the queue from config with the default
    /// workspace executors.
    pub fn with_registry(
        config: crate::config::SyncConfig,
        registry: Arc<ExecutorRegistry>,
        status_store: Arc<dyn SyncStatusStore>,
    ) -> Arc<Self> {
        Self::new(SyncQueue::new(config, registry), status_store)
    }

    pub fn start(&self) {
        let queue = Arc::clone(&self.queue);
        queue.start();
    }

    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    // -- Project hooks --------------------------------------------------

    pub async fn on_project_created(&self, snapshot: EntitySnapshot) -> Result<()> {
        self.enqueue_change(snapshot, ChangeKind::Created).await
    }

    pub async fn on_project_updated(
        &self,
        snapshot: EntitySnapshot,
        kind: ChangeKind,
    ) -> Result<()> {
        self.enqueue_change(snapshot, kind).await
    }

    pub async fn on_project_deleted(&self, snapshot: EntitySnapshot) -> Result<()> {
        self.enqueue_change(snapshot, ChangeKind::Deleted).await
    }

    // -- Milestone hooks ------------------------------------------------

    pub async fn on_milestone_created(&self, snapshot: EntitySnapshot) -> Result<()> {
        self.enqueue_change(snapshot, ChangeKind::Created).await
    }

    pub async fn on_milestone_updated(
        &self,
        snapshot: EntitySnapshot,
        kind: ChangeKind,
    ) -> Result<()> {
        self.enqueue_change(snapshot, kind).await
    }

    pub async fn on_milestone_deleted(&self, snapshot: EntitySnapshot) -> Result<()> {
        self.enqueue_change(snapshot, ChangeKind::Deleted).await
    }

    // -- Deliverable hooks ----------------------------------------------

    pub async fn on_deliverable_created(&self, snapshot: EntitySnapshot) -> Result<()> {
        self.enqueue_change(snapshot, ChangeKind::Created).await
    }

    pub async fn on_deliverable_updated(
        &self,
        snapshot: EntitySnapshot,
        kind: ChangeKind,
    ) -> Result<()> {
        self.enqueue_change(snapshot, kind).await
    }

    pub async fn on_deliverable_deleted(&self, snapshot: EntitySnapshot) -> Result<()> {
        self.enqueue_change(snapshot, ChangeKind::Deleted).await
    }

    // -- Lead hooks ------------------------------------------------------

    pub async fn on_lead_created(&self, snapshot: EntitySnapshot) -> Result<()> {
        self.enqueue_change(snapshot, ChangeKind::Created).await
    }

    pub async fn on_lead_updated(&self, snapshot: EntitySnapshot, kind: ChangeKind) -> Result<()> {
        self.enqueue_change(snapshot, kind).await
    }

    pub async fn on_lead_deleted(&self, snapshot: EntitySnapshot) -> Result<()> {
        self.enqueue_change(snapshot, ChangeKind::Deleted).await
    }

    // -- Sweeps ----------------------------------------------------------

    /// Reset every `Failed` projection to in-flight and re-enqueue. Entities
    /// that already reached the workspace get an UPDATE, the rest a CREATE.
    /// Returns the number of entities re-enqueued.
    pub async fn retry_all_failed(&self) -> Result<usize> {
        let snapshots = self
            .status_store
            .snapshots_with_status(SyncStatus::Failed)
            .await?;
        let count = self.enqueue_sweep(snapshots).await?;
        info!(count, "🔁 Re-enqueued failed entities");
        Ok(count)
    }

    /// Enqueue every entity whose projection is still owed a sync. This is
    /// the crash-recovery path: the queue is in-memory, the projection
    /// durable. `Syncing` rows are included — a row in that state after a
    /// restart belonged to a queue that no longer exists, and re-enqueueing
    /// is safe because executors are idempotent and coalescing dedupes.
    pub async fn sync_all_pending(&self) -> Result<usize> {
        let mut snapshots = self
            .status_store
            .snapshots_with_status(SyncStatus::Pending)
            .await?;
        snapshots.extend(
            self.status_store
                .snapshots_with_status(SyncStatus::Syncing)
                .await?,
        );
        let count = self.enqueue_sweep(snapshots).await?;
        info!(count, "📋 Enqueued pending entities");
        Ok(count)
    }

    /// Queue depth per status plus per-entity-type projection counts.
    pub async fn sync_stats(&self) -> Result<SyncStats> {
        Ok(SyncStats {
            queue: self.queue.stats(),
            domain: self.status_store.status_counts().await?,
        })
    }

    async fn enqueue_sweep(&self, snapshots: Vec<EntitySnapshot>) -> Result<usize> {
        let mut count = 0;
        for snapshot in snapshots {
            let kind = if snapshot.external_id.is_some() {
                ChangeKind::Updated
            } else {
                ChangeKind::Created
            };
            self.enqueue_change(snapshot, kind).await?;
            count += 1;
        }
        Ok(count)
    }

    async fn enqueue_change(&self, snapshot: EntitySnapshot, kind: ChangeKind) -> Result<()> {
        let entity_type = snapshot.entity_type;
        let entity_id = snapshot.entity_id.clone();

        self.status_store
            .update_sync_status(entity_type, &entity_id, SyncStatus::Syncing, None, None)
            .await?;

        let request = EnqueueRequest::new(kind.operation(), snapshot).with_priority(kind.priority());
        let outcome = match self.queue.enqueue(request) {
            Ok(outcome) => outcome,
            Err(e) => {
                // The row must not claim an in-flight task that was never
                // accepted; put it back where the recovery sweep finds it.
                self.status_store
                    .update_sync_status(entity_type, &entity_id, SyncStatus::Pending, None, None)
                    .await?;
                return Err(e);
            }
        };

        debug!(
            task_id = %outcome.task_id(),
            change = ?kind,
            "Sync change accepted"
        );
        Ok(())
    }
}
