//! # Sync Queue
//!
//! The scheduling heart of the sync engine: an in-memory task store with
//! priority + FIFO ordering and backoff gating, a broadcast stream of
//! task-finalized events, and the dispatcher loop that drives tasks from
//! `Pending` to a terminal state under the external rate budget.

pub mod dispatcher;
pub mod events;
pub mod store;

pub use dispatcher::{FinalizeHook, SyncQueue};
pub use events::{TaskEvent, TaskEventPublisher, TaskOutcome};
pub use store::{CoalesceOutcome, FailDisposition, QueueStats, SyncTaskStore};
