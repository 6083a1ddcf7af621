//! # Sync Task
//!
//! The unit of work the queue schedules: one external create/update/archive
//! call for one domain entity, carried out from an immutable payload snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::TaskStatus;
use crate::types::{EntitySnapshot, EntityType, SyncOperation, PRIORITY_ROUTINE_UPDATE};

/// A queued unit of external-sync work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTask {
    /// Unique id, assigned at enqueue time
    pub id: Uuid,

    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: SyncOperation,

    /// Lower value is served first; ties broken by `sequence` (FIFO)
    pub priority: u8,

    /// Immutable field snapshot the executor works from
    pub payload: EntitySnapshot,

    pub status: TaskStatus,

    /// Executions started so far (1-based once the dispatcher claims it)
    pub attempts: u32,

    /// Attempt ceiling; a retryable failure at this count is final
    pub max_attempts: u32,

    /// Most recent failure description, kept for operator visibility
    pub last_error: Option<String>,

    /// Backoff gate: the task is not dispatchable before this instant
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Monotonic enqueue counter, the FIFO tie-break within a priority tier
    pub sequence: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// External resource id reported by the executor on success
    pub external_id: Option<String>,
}

impl SyncTask {
    /// Whether the dispatcher may claim this task right now.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Request to enqueue one sync task.
///
/// Entity type and id are taken from the payload snapshot so they can never
/// disagree with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub operation: SyncOperation,
    pub payload: EntitySnapshot,
    pub priority: u8,
    pub max_attempts: Option<u32>,
}

impl EnqueueRequest {
    pub fn new(operation: SyncOperation, payload: EntitySnapshot) -> Self {
        Self {
            operation,
            payload,
            priority: PRIORITY_ROUTINE_UPDATE,
            max_attempts: None,
        }
    }

    /// Set the priority tier (lower is served first)
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Override the attempt ceiling for this task
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn entity_type(&self) -> EntityType {
        self.payload.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.payload.entity_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PRIORITY_CREATE;

    fn snapshot() -> EntitySnapshot {
        EntitySnapshot::new(EntityType::Project, "proj-7").with_name("Dockside")
    }

    #[test]
    fn test_enqueue_request_builder() {
        let request = EnqueueRequest::new(SyncOperation::Create, snapshot())
            .with_priority(PRIORITY_CREATE)
            .with_max_attempts(5);

        assert_eq!(request.entity_type(), EntityType::Project);
        assert_eq!(request.entity_id(), "proj-7");
        assert_eq!(request.priority, PRIORITY_CREATE);
        assert_eq!(request.max_attempts, Some(5));
    }

    #[test]
    fn test_readiness_gating() {
        let now = Utc::now();
        let mut task = SyncTask {
            id: Uuid::new_v4(),
            entity_type: EntityType::Project,
            entity_id: "proj-7".to_string(),
            operation: SyncOperation::Create,
            priority: PRIORITY_CREATE,
            payload: snapshot(),
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts: 3,
            last_error: None,
            next_attempt_at: None,
            sequence: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
            external_id: None,
        };

        assert!(task.is_ready(now));

        task.next_attempt_at = Some(now + chrono::Duration::seconds(10));
        assert!(!task.is_ready(now));
        assert!(task.is_ready(now + chrono::Duration::seconds(11)));

        task.next_attempt_at = None;
        task.status = TaskStatus::Processing;
        assert!(!task.is_ready(now));
    }
}
