//! Crate-level error types for the sync engine.
//!
//! Boundary-specific errors (`ExecutorError`, `WorkspaceApiError`) live next to
//! their traits in [`crate::executor`]; this module holds the errors that cross
//! component boundaries plus the crate-wide `Result` alias.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the queue, store, and orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The referenced task does not exist in the store.
    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    /// An enqueue request failed validation.
    #[error("invalid enqueue request: {0}")]
    InvalidRequest(String),

    /// The domain store rejected a sync-status write or read.
    #[error("domain store error: {0}")]
    DomainStore(String),

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The engine is shutting down and no longer accepts work.
    #[error("sync engine is shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, SyncError>;
