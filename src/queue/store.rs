//! # Sync Task Store
//!
//! In-memory store for queued, in-flight, and terminal sync tasks. Tasks live
//! in a concurrent map; dispatch order comes from a separate ready index
//! ordered by `(priority, sequence)`, so the lowest priority value wins and
//! ties go to the earliest enqueue (FIFO). Claiming a task removes its index
//! entry under the index lock, which is what makes `dequeue_next` safe under
//! concurrent callers: a task can be handed out exactly once.
//!
//! Lock order is always ready-index before task map; no path acquires the
//! index while holding a task-map guard.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BackoffConfig;
use crate::error::{Result, SyncError};
use crate::state::TaskStatus;
use crate::task::{EnqueueRequest, SyncTask};
use crate::types::{EntityType, SyncOperation};

/// Ready-index key: priority first, then enqueue sequence, then id for
/// uniqueness.
type ReadyKey = (u8, u64, Uuid);

/// How an enqueue request interacted with tasks already queued for the same
/// entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoalesceOutcome {
    /// No pending task for the entity; a new task was queued.
    Enqueued { task_id: Uuid },
    /// A pending task's payload was refreshed in place; no duplicate queued.
    Replaced { task_id: Uuid },
    /// A DELETE cancelled the entity's pending non-DELETE tasks and was
    /// queued itself.
    Superseded {
        task_id: Uuid,
        cancelled: Vec<Uuid>,
    },
}

impl CoalesceOutcome {
    /// Id of the task that will carry the work.
    pub fn task_id(&self) -> Uuid {
        match self {
            Self::Enqueued { task_id }
            | Self::Replaced { task_id }
            | Self::Superseded { task_id, .. } => *task_id,
        }
    }
}

/// Result of recording a failure.
#[derive(Debug, Clone)]
pub enum FailDisposition {
    /// Task reverted to `Pending`, eligible again at `next_attempt_at`.
    Retrying {
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Task reached its terminal `Failed` state.
    Failed { task: SyncTask },
}

/// Aggregate queue counters for the operator surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total: u64,
    pub by_entity_type: HashMap<EntityType, u64>,
}

/// In-memory task store with priority-ordered, backoff-gated dequeue.
pub struct SyncTaskStore {
    backoff: BackoffConfig,
    default_max_attempts: u32,
    tasks: DashMap<Uuid, SyncTask>,
    ready: Mutex<BTreeSet<ReadyKey>>,
    sequence: AtomicU64,
}

impl SyncTaskStore {
    pub fn new(backoff: BackoffConfig, default_max_attempts: u32) -> Self {
        Self {
            backoff,
            default_max_attempts,
            tasks: DashMap::new(),
            ready: Mutex::new(BTreeSet::new()),
            sequence: AtomicU64::new(0),
        }
    }

    fn validate(&self, request: &EnqueueRequest) -> Result<()> {
        if request.entity_id().is_empty() {
            return Err(SyncError::InvalidRequest("entity id is empty".to_string()));
        }
        if request.max_attempts == Some(0) {
            return Err(SyncError::InvalidRequest(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn build_task(&self, request: EnqueueRequest) -> SyncTask {
        let now = Utc::now();
        SyncTask {
            id: Uuid::new_v4(),
            entity_type: request.entity_type(),
            entity_id: request.entity_id().to_string(),
            operation: request.operation,
            priority: request.priority,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts: request.max_attempts.unwrap_or(self.default_max_attempts),
            last_error: None,
            next_attempt_at: None,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            created_at: now,
            updated_at: now,
            completed_at: None,
            external_id: None,
            payload: request.payload,
        }
    }

    /// Queue a task unconditionally (no coalescing). Returns the task id.
    pub fn enqueue(&self, request: EnqueueRequest) -> Result<Uuid> {
        self.validate(&request)?;
        let task = self.build_task(request);
        let key = (task.priority, task.sequence, task.id);
        let id = task.id;

        self.tasks.insert(id, task);
        self.ready.lock().insert(key);

        debug!(task_id = %id, "Task enqueued");
        Ok(id)
    }

    /// Queue a task, coalescing with any pending task for the same entity.
    ///
    /// Policy: a non-DELETE request refreshes a pending task's payload in
    /// place (freshest snapshot wins, the more urgent priority is kept); a
    /// DELETE cancels every pending non-DELETE task for the entity before
    /// queueing itself — DELETE always wins.
    pub fn coalesce_or_enqueue(&self, request: EnqueueRequest) -> Result<CoalesceOutcome> {
        self.validate(&request)?;

        let entity_type = request.entity_type();
        let entity_id = request.entity_id().to_string();

        let mut ready = self.ready.lock();

        // Pending tasks for this entity, queued order.
        let mut pending: Vec<(Uuid, SyncOperation, u8, u64)> = self
            .tasks
            .iter()
            .filter(|entry| {
                let t = entry.value();
                t.status == TaskStatus::Pending
                    && t.entity_type == entity_type
                    && t.entity_id == entity_id
            })
            .map(|entry| {
                let t = entry.value();
                (t.id, t.operation, t.priority, t.sequence)
            })
            .collect();
        pending.sort_by_key(|(_, _, _, sequence)| *sequence);

        if request.operation == SyncOperation::Delete {
            let mut cancelled = Vec::new();
            let mut existing_delete = None;

            for (id, operation, priority, sequence) in pending {
                if operation == SyncOperation::Delete {
                    existing_delete = Some(id);
                } else {
                    if let Some(mut task) = self.tasks.get_mut(&id) {
                        task.status = TaskStatus::Cancelled;
                        task.updated_at = Utc::now();
                    }
                    ready.remove(&(priority, sequence, id));
                    cancelled.push(id);
                }
            }

            if !cancelled.is_empty() {
                debug!(
                    entity_type = %entity_type,
                    entity_id = %entity_id,
                    cancelled = cancelled.len(),
                    "DELETE superseded pending tasks"
                );
            }

            if let Some(task_id) = existing_delete {
                if let Some(mut task) = self.tasks.get_mut(&task_id) {
                    task.payload = request.payload;
                    task.updated_at = Utc::now();
                }
                return Ok(if cancelled.is_empty() {
                    CoalesceOutcome::Replaced { task_id }
                } else {
                    CoalesceOutcome::Superseded { task_id, cancelled }
                });
            }

            let task = self.build_task(request);
            let key = (task.priority, task.sequence, task.id);
            let task_id = task.id;
            self.tasks.insert(task_id, task);
            ready.insert(key);

            return Ok(if cancelled.is_empty() {
                CoalesceOutcome::Enqueued { task_id }
            } else {
                CoalesceOutcome::Superseded { task_id, cancelled }
            });
        }

        // CREATE/UPDATE: refresh the earliest pending non-DELETE task, if any.
        if let Some(&(task_id, _, old_priority, sequence)) = pending
            .iter()
            .find(|(_, operation, _, _)| *operation != SyncOperation::Delete)
        {
            let new_priority = request.priority.min(old_priority);
            if let Some(mut task) = self.tasks.get_mut(&task_id) {
                // The queued operation stays as-is: a pending CREATE with a
                // fresher snapshot is still a CREATE.
                task.payload = request.payload;
                task.priority = new_priority;
                task.updated_at = Utc::now();
            }
            if new_priority != old_priority {
                ready.remove(&(old_priority, sequence, task_id));
                ready.insert((new_priority, sequence, task_id));
            }
            debug!(task_id = %task_id, "Coalesced enqueue into pending task");
            return Ok(CoalesceOutcome::Replaced { task_id });
        }

        let task = self.build_task(request);
        let key = (task.priority, task.sequence, task.id);
        let task_id = task.id;
        self.tasks.insert(task_id, task);
        ready.insert(key);
        Ok(CoalesceOutcome::Enqueued { task_id })
    }

    /// Claim the highest-priority ready task, marking it `Processing` and
    /// counting the new execution attempt. Non-blocking; `None` when nothing
    /// is dispatchable (empty, all in backoff, or all in flight).
    pub fn dequeue_next(&self) -> Option<SyncTask> {
        let now = Utc::now();
        let mut ready = self.ready.lock();

        let mut claimed: Option<(ReadyKey, SyncTask)> = None;
        let mut stale: Vec<ReadyKey> = Vec::new();

        for &key in ready.iter() {
            let (_, _, id) = key;
            match self.tasks.get_mut(&id) {
                Some(mut task) => {
                    if !task.is_ready(now) {
                        if task.status != TaskStatus::Pending {
                            // Index entry left behind by a cancelled task.
                            stale.push(key);
                        }
                        continue;
                    }
                    task.status = TaskStatus::Processing;
                    task.attempts += 1;
                    task.next_attempt_at = None;
                    task.updated_at = now;
                    claimed = Some((key, task.clone()));
                    break;
                }
                None => stale.push(key),
            }
        }

        for key in stale {
            ready.remove(&key);
        }

        let (key, task) = claimed?;
        ready.remove(&key);
        Some(task)
    }

    /// Whether any task is dispatchable right now. Used by the dispatcher to
    /// avoid burning rate budget on an empty queue.
    pub fn has_ready(&self) -> bool {
        let now = Utc::now();
        let ready = self.ready.lock();
        ready.iter().any(|&(_, _, id)| {
            self.tasks
                .get(&id)
                .map_or(false, |task| task.is_ready(now))
        })
    }

    /// Record success, storing the external id when one was produced.
    pub fn complete(&self, task_id: Uuid, external_id: Option<String>) -> Result<SyncTask> {
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(SyncError::TaskNotFound(task_id))?;

        if task.status != TaskStatus::Processing {
            warn!(task_id = %task_id, status = %task.status, "Completing task not in processing state");
        }

        let now = Utc::now();
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.updated_at = now;
        if external_id.is_some() {
            task.external_id = external_id;
        }
        task.last_error = None;
        Ok(task.clone())
    }

    /// Record a failure. Retryable failures below the attempt ceiling revert
    /// the task to `Pending` with a backoff gate (`base * multiplier^attempts`,
    /// or the server-suggested delay when given); anything else is terminal.
    pub fn fail(
        &self,
        task_id: Uuid,
        error: &str,
        retryable: bool,
        retry_after: Option<Duration>,
    ) -> Result<FailDisposition> {
        let (disposition, ready_key) = {
            let mut task = self
                .tasks
                .get_mut(&task_id)
                .ok_or(SyncError::TaskNotFound(task_id))?;

            let now = Utc::now();
            task.last_error = Some(error.to_string());
            task.updated_at = now;

            if retryable && task.attempts < task.max_attempts {
                let delay =
                    retry_after.unwrap_or_else(|| self.backoff.delay_for_attempt(task.attempts));
                let next_attempt_at = now
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(300));
                task.status = TaskStatus::Pending;
                task.next_attempt_at = Some(next_attempt_at);

                (
                    FailDisposition::Retrying {
                        attempts: task.attempts,
                        next_attempt_at,
                    },
                    Some((task.priority, task.sequence, task.id)),
                )
            } else {
                task.status = TaskStatus::Failed;
                (
                    FailDisposition::Failed { task: task.clone() },
                    None,
                )
            }
        };

        if let Some(key) = ready_key {
            self.ready.lock().insert(key);
        }
        Ok(disposition)
    }

    /// Cancel a pending task. Returns `true` if the task was pending and is
    /// now cancelled; `false` if it was already in flight or terminal.
    pub fn cancel(&self, task_id: Uuid) -> Result<bool> {
        let mut ready = self.ready.lock();
        let mut task = self
            .tasks
            .get_mut(&task_id)
            .ok_or(SyncError::TaskNotFound(task_id))?;

        if task.status != TaskStatus::Pending {
            return Ok(false);
        }

        task.status = TaskStatus::Cancelled;
        task.updated_at = Utc::now();
        ready.remove(&(task.priority, task.sequence, task.id));
        Ok(true)
    }

    pub fn get_task(&self, task_id: Uuid) -> Option<SyncTask> {
        self.tasks.get(&task_id).map(|entry| entry.clone())
    }

    /// Aggregate counters across all stored tasks.
    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for entry in self.tasks.iter() {
            let task = entry.value();
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
            stats.total += 1;
            *stats.by_entity_type.entry(task.entity_type).or_insert(0) += 1;
        }
        stats
    }

    /// Drop terminal tasks whose last update is older than `retention`. The
    /// queue is not the system of record, so this is pure memory hygiene.
    pub fn purge_terminal(&self, retention: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::hours(1));
        let doomed: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|entry| {
                let task = entry.value();
                task.status.is_terminal() && task.updated_at < cutoff
            })
            .map(|entry| *entry.key())
            .collect();

        let purged = doomed.len();
        for id in doomed {
            self.tasks.remove(&id);
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        EntitySnapshot, PRIORITY_CREATE, PRIORITY_DELETE, PRIORITY_STATUS_CHANGE,
    };
    use std::sync::Arc;

    fn store() -> SyncTaskStore {
        let backoff = BackoffConfig {
            base_delay_ms: 40,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter_enabled: false,
            jitter_max_percentage: 0.0,
        };
        SyncTaskStore::new(backoff, 3)
    }

    fn request(entity_id: &str, operation: SyncOperation, priority: u8) -> EnqueueRequest {
        EnqueueRequest::new(
            operation,
            EntitySnapshot::new(EntityType::Project, entity_id),
        )
        .with_priority(priority)
    }

    #[test]
    fn test_priority_then_fifo_ordering() {
        let store = store();
        let low_a = store
            .enqueue(request("a", SyncOperation::Update, PRIORITY_STATUS_CHANGE))
            .unwrap();
        let low_b = store
            .enqueue(request("b", SyncOperation::Update, PRIORITY_STATUS_CHANGE))
            .unwrap();
        let high = store
            .enqueue(request("c", SyncOperation::Create, PRIORITY_CREATE))
            .unwrap();

        assert_eq!(store.dequeue_next().unwrap().id, high);
        assert_eq!(store.dequeue_next().unwrap().id, low_a);
        assert_eq!(store.dequeue_next().unwrap().id, low_b);
        assert!(store.dequeue_next().is_none());
    }

    #[test]
    fn test_dequeue_claims_and_counts_attempt() {
        let store = store();
        let id = store
            .enqueue(request("a", SyncOperation::Create, PRIORITY_CREATE))
            .unwrap();

        let claimed = store.dequeue_next().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, TaskStatus::Processing);
        assert_eq!(claimed.attempts, 1);

        // A claimed task is invisible to further dequeues.
        assert!(store.dequeue_next().is_none());
    }

    #[test]
    fn test_retryable_failure_gates_on_backoff() {
        let store = store();
        let id = store
            .enqueue(request("a", SyncOperation::Create, PRIORITY_CREATE))
            .unwrap();
        store.dequeue_next().unwrap();

        let disposition = store.fail(id, "connection reset", true, None).unwrap();
        match disposition {
            FailDisposition::Retrying { attempts, .. } => assert_eq!(attempts, 1),
            FailDisposition::Failed { .. } => panic!("expected retry"),
        }

        // Not eligible before base * 2^1 = 80ms.
        assert!(store.dequeue_next().is_none());
        assert!(!store.has_ready());

        std::thread::sleep(Duration::from_millis(100));
        let retried = store.dequeue_next().unwrap();
        assert_eq!(retried.id, id);
        assert_eq!(retried.attempts, 2);
    }

    #[test]
    fn test_retries_exhaust_into_failed() {
        let store = store();
        let id = store
            .enqueue(
                request("a", SyncOperation::Create, PRIORITY_CREATE).with_max_attempts(2),
            )
            .unwrap();

        store.dequeue_next().unwrap();
        assert!(matches!(
            store.fail(id, "boom", true, None).unwrap(),
            FailDisposition::Retrying { .. }
        ));

        std::thread::sleep(Duration::from_millis(120));
        let task = store.dequeue_next().unwrap();
        assert_eq!(task.attempts, 2);
        match store.fail(id, "boom again", true, None).unwrap() {
            FailDisposition::Failed { task } => {
                assert_eq!(task.status, TaskStatus::Failed);
                assert_eq!(task.attempts, 2);
                assert_eq!(task.last_error.as_deref(), Some("boom again"));
            }
            FailDisposition::Retrying { .. } => panic!("attempt ceiling ignored"),
        }
    }

    #[test]
    fn test_terminal_failure_skips_retries() {
        let store = store();
        let id = store
            .enqueue(request("a", SyncOperation::Create, PRIORITY_CREATE))
            .unwrap();
        store.dequeue_next().unwrap();

        match store.fail(id, "invalid payload", false, None).unwrap() {
            FailDisposition::Failed { task } => {
                assert_eq!(task.status, TaskStatus::Failed);
                assert_eq!(task.attempts, 1);
            }
            FailDisposition::Retrying { .. } => panic!("terminal failure must not retry"),
        }
    }

    #[test]
    fn test_complete_records_external_id() {
        let store = store();
        let id = store
            .enqueue(request("a", SyncOperation::Create, PRIORITY_CREATE))
            .unwrap();
        store.dequeue_next().unwrap();

        let task = store.complete(id, Some("ext-9".to_string())).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.external_id.as_deref(), Some("ext-9"));
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn test_coalesce_replaces_pending_payload() {
        let store = store();
        let first = EnqueueRequest::new(
            SyncOperation::Create,
            EntitySnapshot::new(EntityType::Project, "a").with_name("v1"),
        )
        .with_priority(PRIORITY_CREATE);
        let outcome = store.coalesce_or_enqueue(first).unwrap();
        let task_id = outcome.task_id();
        assert!(matches!(outcome, CoalesceOutcome::Enqueued { .. }));

        let fresher = EnqueueRequest::new(
            SyncOperation::Update,
            EntitySnapshot::new(EntityType::Project, "a").with_name("v2"),
        )
        .with_priority(PRIORITY_STATUS_CHANGE);
        let outcome = store.coalesce_or_enqueue(fresher).unwrap();
        assert_eq!(outcome, CoalesceOutcome::Replaced { task_id });

        let task = store.get_task(task_id).unwrap();
        // Payload refreshed, original CREATE operation kept.
        assert_eq!(task.payload.name.as_deref(), Some("v2"));
        assert_eq!(task.operation, SyncOperation::Create);

        // Only one dispatchable task exists.
        assert!(store.dequeue_next().is_some());
        assert!(store.dequeue_next().is_none());
    }

    #[test]
    fn test_delete_supersedes_pending_tasks() {
        let store = store();
        let create_id = store
            .coalesce_or_enqueue(request("a", SyncOperation::Create, PRIORITY_CREATE))
            .unwrap()
            .task_id();

        let outcome = store
            .coalesce_or_enqueue(request("a", SyncOperation::Delete, PRIORITY_DELETE))
            .unwrap();
        let delete_id = match outcome {
            CoalesceOutcome::Superseded { task_id, cancelled } => {
                assert_eq!(cancelled, vec![create_id]);
                task_id
            }
            other => panic!("expected supersede, got {other:?}"),
        };

        assert_eq!(
            store.get_task(create_id).unwrap().status,
            TaskStatus::Cancelled
        );

        // Only the DELETE is dispatchable.
        let next = store.dequeue_next().unwrap();
        assert_eq!(next.id, delete_id);
        assert_eq!(next.operation, SyncOperation::Delete);
        assert!(store.dequeue_next().is_none());
    }

    #[test]
    fn test_concurrent_dequeue_is_exclusive() {
        let store = Arc::new(store());
        for i in 0..4 {
            store
                .enqueue(request(&format!("e{i}"), SyncOperation::Create, PRIORITY_CREATE))
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || store.dequeue_next()));
        }

        let mut claimed: Vec<Uuid> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .map(|t| t.id)
            .collect();
        claimed.sort();
        claimed.dedup();
        assert_eq!(claimed.len(), 4, "each task claimed exactly once");
    }

    #[test]
    fn test_stats_and_purge() {
        let store = store();
        let done = store
            .enqueue(request("a", SyncOperation::Create, PRIORITY_CREATE))
            .unwrap();
        store
            .enqueue(request("b", SyncOperation::Update, PRIORITY_STATUS_CHANGE))
            .unwrap();
        store.dequeue_next().unwrap();
        store.complete(done, Some("ext-1".to_string())).unwrap();

        let stats = store.stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_entity_type[&EntityType::Project], 2);

        assert_eq!(store.purge_terminal(Duration::ZERO), 1);
        assert_eq!(store.stats().total, 1);
    }

    #[test]
    fn test_invalid_requests_rejected() {
        let store = store();
        assert!(store
            .enqueue(request("", SyncOperation::Create, PRIORITY_CREATE))
            .is_err());
        assert!(store
            .enqueue(request("a", SyncOperation::Create, PRIORITY_CREATE).with_max_attempts(0))
            .is_err());
    }
}
