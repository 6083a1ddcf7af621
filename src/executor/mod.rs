//! # Sync Executor
//!
//! The seam between the queue and the external workspace. One executor per
//! entity type performs the actual create/update/archive call for a task's
//! payload; the dispatcher classifies its typed errors into retryable versus
//! terminal and schedules accordingly. Executors never touch the local
//! database — their side effects are confined to the external system.

pub mod workspace;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

use crate::task::SyncTask;
use crate::types::EntityType;

pub use workspace::{PageProperties, WorkspaceApi, WorkspaceApiError, WorkspacePageExecutor};

/// Successful execution result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// External resource id, when the operation produced or confirmed one
    pub external_id: Option<String>,

    /// True when nothing had to be done (e.g. archiving an already-missing
    /// page); still a success for the task lifecycle
    pub noop: bool,
}

impl ExecutionOutcome {
    /// The operation created or updated an external resource with this id.
    pub fn synced(external_id: impl Into<String>) -> Self {
        Self {
            external_id: Some(external_id.into()),
            noop: false,
        }
    }

    /// Nothing to do; counts as success.
    pub fn noop() -> Self {
        Self {
            external_id: None,
            noop: true,
        }
    }
}

/// Typed execution failures. Classification is by variant, never by message
/// sniffing; [`ExecutorError::is_retryable`] is the single source of truth the
/// dispatcher consults.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Connection-level failure reaching the workspace API (retryable)
    #[error("network error calling workspace API: {0}")]
    Network(String),

    /// The external call exceeded its bound (retryable)
    #[error("workspace call timed out after {0:?}")]
    Timeout(Duration),

    /// The workspace API returned its own rate-limit response (retryable,
    /// optionally with a server-suggested delay)
    #[error("workspace rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// External 5xx (retryable)
    #[error("workspace server error (status {status})")]
    Server { status: u16 },

    /// The workspace rejected the payload; surfaced verbatim in `last_error`
    /// (terminal)
    #[error("workspace rejected payload: {message}")]
    Validation { message: String },

    /// A child page cannot be created without its parent's external id
    /// (terminal)
    #[error("missing required parent external id for {entity_type} {entity_id}")]
    MissingParent {
        entity_type: EntityType,
        entity_id: String,
    },

    /// The domain entity vanished while its task was in flight; treated as a
    /// terminal no-op success by the dispatcher, not as a failure
    #[error("entity no longer exists; nothing to sync")]
    EntityGone,

    /// No executor registered for the task's entity type (terminal)
    #[error("no executor registered for entity type {0}")]
    NoExecutor(EntityType),
}

impl ExecutorError {
    /// Whether the dispatcher should schedule a retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    /// Server-suggested retry delay, when the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Performs the external call for one task. One implementation per entity
/// type, registered in the [`ExecutorRegistry`].
#[async_trait]
pub trait SyncExecutor: Send + Sync {
    /// The entity type this executor serves.
    fn entity_type(&self) -> EntityType;

    /// Perform the task's external operation. Must be side-effect-free on the
    /// local database and idempotent against the external system (a repeated
    /// CREATE upserts rather than duplicating).
    async fn execute(&self, task: &SyncTask) -> Result<ExecutionOutcome, ExecutorError>;
}

/// Registry mapping entity types to their executors.
pub struct ExecutorRegistry {
    executors: DashMap<EntityType, Arc<dyn SyncExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: DashMap::new(),
        }
    }

    /// Build a registry with a workspace page executor for every entity type.
    pub fn with_workspace_defaults(api: Arc<dyn WorkspaceApi>) -> Self {
        let registry = Self::new();
        for entity_type in EntityType::all() {
            registry.register(Arc::new(WorkspacePageExecutor::new(
                entity_type,
                Arc::clone(&api),
            )));
        }
        registry
    }

    /// Register an executor under its own entity type, replacing any previous
    /// registration for that type.
    pub fn register(&self, executor: Arc<dyn SyncExecutor>) {
        let entity_type = executor.entity_type();
        if self.executors.insert(entity_type, executor).is_some() {
            warn!(entity_type = %entity_type, "Replacing previously registered sync executor");
        }
    }

    pub fn resolve(&self, entity_type: EntityType) -> Option<Arc<dyn SyncExecutor>> {
        self.executors
            .get(&entity_type)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn registered_types(&self) -> Vec<EntityType> {
        self.executors.iter().map(|entry| *entry.key()).collect()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
