//! # Task Lifecycle Events
//!
//! Broadcast stream of task-finalized events. The dispatcher publishes the
//! instant a task reaches `Completed` or `Failed`, so interested parties
//! (operator tooling, tests, notification glue) observe completion without
//! polling task state. Lagging subscribers lose old events rather than
//! blocking the dispatcher.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{EntityType, SyncOperation};

/// Terminal result of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum TaskOutcome {
    Completed { external_id: Option<String> },
    Failed { error: String },
}

/// Event published when a task finalizes.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: SyncOperation,
    pub outcome: TaskOutcome,
    pub finished_at: DateTime<Utc>,
}

/// Broadcast publisher for task lifecycle events.
#[derive(Debug, Clone)]
pub struct TaskEventPublisher {
    sender: broadcast::Sender<TaskEvent>,
}

impl TaskEventPublisher {
    /// Create a publisher with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish a finalization event. Having no subscribers is not an error;
    /// events are advisory.
    pub fn publish(&self, event: TaskEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to finalization events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for TaskEventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(outcome: TaskOutcome) -> TaskEvent {
        TaskEvent {
            task_id: Uuid::new_v4(),
            entity_type: EntityType::Project,
            entity_id: "p-1".to_string(),
            operation: SyncOperation::Create,
            outcome,
            finished_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let publisher = TaskEventPublisher::default();
        let mut receiver = publisher.subscribe();

        publisher.publish(event(TaskOutcome::Completed {
            external_id: Some("ext-1".to_string()),
        }));

        let received = receiver.recv().await.unwrap();
        assert_eq!(
            received.outcome,
            TaskOutcome::Completed {
                external_id: Some("ext-1".to_string())
            }
        );
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let publisher = TaskEventPublisher::default();
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(event(TaskOutcome::Failed {
            error: "no one listening".to_string(),
        }));
    }
}
