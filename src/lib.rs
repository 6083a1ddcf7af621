//! # Portal Sync
//!
//! Asynchronous propagation of project-portal domain changes (projects,
//! milestones, deliverables, leads) to an external page-based workspace,
//! decoupled from request handling by a prioritized, rate-limited,
//! retrying in-process task queue.
//!
//! ## Architecture
//!
//! ```text
//! domain mutation ──► SyncOrchestrator ──► SyncQueue ──► dispatcher loop
//!       │                   │                  │              │
//!       │            marks Syncing      coalesce + order   rate gate
//!       │                                (priority, FIFO)      │
//!       │                                                 SyncExecutor
//!       │                                                      │
//!       └──◄── projection reconciled ◄── finalize hook ◄── workspace API
//! ```
//!
//! - [`orchestrator::SyncOrchestrator`] — domain-facing `on_*` hooks,
//!   recovery sweeps, combined stats.
//! - [`queue::SyncQueue`] — the store, the dispatcher loop, and the
//!   finalized-task event stream.
//! - [`executor::SyncExecutor`] — per-entity-type workspace adapters with
//!   idempotent create/update/archive semantics.
//! - [`resilience::RateLimiter`] — fixed-window budget shared by every
//!   external call.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use portal_sync::config::SyncConfig;
//! use portal_sync::executor::ExecutorRegistry;
//! use portal_sync::orchestrator::{SyncOrchestrator, SyncStatusStore};
//! use portal_sync::queue::SyncQueue;
//!
//! # async fn demo(status_store: Arc<dyn SyncStatusStore>, registry: Arc<ExecutorRegistry>) -> portal_sync::Result<()> {
//! let config = SyncConfig::from_env()?;
//! let queue = SyncQueue::new(config, registry);
//! let orchestrator = SyncOrchestrator::new(queue, status_store);
//! orchestrator.start();
//!
//! // On restart, re-enqueue whatever the durable projection says is owed.
//! orchestrator.sync_all_pending().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Delivery is at-least-once: executors are written to be idempotent, and
//! the durable projection (not the in-memory queue) is the system of record.

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod orchestrator;
pub mod queue;
pub mod resilience;
pub mod state;
pub mod task;
pub mod types;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use executor::{ExecutionOutcome, ExecutorError, ExecutorRegistry, SyncExecutor};
pub use orchestrator::{EntityStatusCounts, SyncOrchestrator, SyncStats, SyncStatusStore};
pub use queue::{
    CoalesceOutcome, FinalizeHook, QueueStats, SyncQueue, SyncTaskStore, TaskEvent, TaskOutcome,
};
pub use state::{SyncStatus, TaskStatus};
pub use task::{EnqueueRequest, SyncTask};
pub use types::{ChangeKind, EntitySnapshot, EntityType, SyncOperation};
