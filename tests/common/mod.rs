//! Shared fixtures for the integration suite: an in-memory projection store,
//! a scriptable workspace API, and executors that record dispatch order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use portal_sync::config::{
    BackoffConfig, DispatcherConfig, ExecutorConfig, RateLimitConfig, SyncConfig,
};
use portal_sync::executor::workspace::{PageProperties, WorkspaceApi, WorkspaceApiError};
use portal_sync::executor::{ExecutionOutcome, ExecutorError, SyncExecutor};
use portal_sync::orchestrator::{EntityStatusCounts, SyncStatusStore};
use portal_sync::{EntitySnapshot, EntityType, Result, SyncStatus, SyncTask};

/// Tight timings so the suite runs in milliseconds, generous rate budget
/// unless a test narrows it.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        rate_limit: RateLimitConfig {
            max_requests_per_window: 100,
            window_ms: 1000,
        },
        backoff: BackoffConfig {
            base_delay_ms: 10,
            backoff_multiplier: 2.0,
            max_delay_ms: 1000,
            jitter_enabled: false,
            jitter_max_percentage: 0.0,
        },
        dispatcher: DispatcherConfig {
            tick_ms: 20,
            default_max_attempts: 3,
        },
        executor: ExecutorConfig {
            call_timeout_ms: 500,
        },
    }
}

#[derive(Debug, Clone)]
pub struct ProjectionRow {
    pub status: SyncStatus,
    pub external_id: Option<String>,
    pub error: Option<String>,
}

/// Durable-projection stand-in backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryStatusStore {
    rows: DashMap<(EntityType, String), ProjectionRow>,
}

impl InMemoryStatusStore {
    pub fn row(&self, entity_type: EntityType, entity_id: &str) -> Option<ProjectionRow> {
        self.rows
            .get(&(entity_type, entity_id.to_string()))
            .map(|r| r.clone())
    }

    /// Wait until the projection for an entity reaches `status`.
    pub async fn wait_for(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        status: SyncStatus,
    ) -> ProjectionRow {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(row) = self.row(entity_type, entity_id) {
                    if row.status == status {
                        return row;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("projection never reached expected status")
    }
}

#[async_trait]
impl SyncStatusStore for InMemoryStatusStore {
    async fn update_sync_status(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        status: SyncStatus,
        external_id: Option<String>,
        error: Option<String>,
    ) -> Result<()> {
        let key = (entity_type, entity_id.to_string());
        let mut row = self.rows.entry(key).or_insert(ProjectionRow {
            status: SyncStatus::Pending,
            external_id: None,
            error: None,
        });
        row.status = status;
        if let Some(id) = external_id {
            row.external_id = Some(id);
        }
        row.error = error;
        Ok(())
    }

    async fn snapshots_with_status(&self, status: SyncStatus) -> Result<Vec<EntitySnapshot>> {
        Ok(self
            .rows
            .iter()
            .filter(|entry| entry.value().status == status)
            .map(|entry| {
                let (entity_type, entity_id) = entry.key().clone();
                let mut snapshot = EntitySnapshot::new(entity_type, entity_id);
                snapshot.external_id = entry.value().external_id.clone();
                snapshot
            })
            .collect())
    }

    async fn status_counts(&self) -> Result<HashMap<EntityType, EntityStatusCounts>> {
        let mut counts: HashMap<EntityType, EntityStatusCounts> = HashMap::new();
        for entry in self.rows.iter() {
            let counter = counts.entry(entry.key().0).or_default();
            match entry.value().status {
                SyncStatus::Pending => counter.pending += 1,
                SyncStatus::Syncing => counter.syncing += 1,
                SyncStatus::Synced => counter.synced += 1,
                SyncStatus::Failed => counter.failed += 1,
            }
        }
        Ok(counts)
    }
}

/// Recorded workspace call, enough to assert on ordering and idempotency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Create { parent: Option<String>, title: String },
    Update { page_id: String, title: String },
    Archive { page_id: String },
}

/// Workspace API double: succeeds after an optional number of injected
/// failures, hands out sequential page ids, and records every call.
pub struct ScriptedWorkspaceApi {
    pub calls: Mutex<Vec<ApiCall>>,
    failures_remaining: AtomicUsize,
    failure: Mutex<Option<WorkspaceApiError>>,
    next_id: AtomicUsize,
}

impl ScriptedWorkspaceApi {
    pub fn reliable() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failures_remaining: AtomicUsize::new(0),
            failure: Mutex::new(None),
            next_id: AtomicUsize::new(1),
        })
    }

    /// Fail the first `count` calls with clones of `error`, then succeed.
    pub fn failing_first(count: usize, error: WorkspaceApiError) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failures_remaining: AtomicUsize::new(count),
            failure: Mutex::new(Some(error)),
            next_id: AtomicUsize::new(1),
        })
    }

    pub fn call_log(&self) -> Vec<ApiCall> {
        self.calls.lock().clone()
    }

    fn maybe_fail(&self) -> std::result::Result<(), WorkspaceApiError> {
        loop {
            let remaining = self.failures_remaining.load(Ordering::SeqCst);
            if remaining == 0 {
                return Ok(());
            }
            if self
                .failures_remaining
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let failure = self.failure.lock();
                return Err(clone_error(failure.as_ref()));
            }
        }
    }
}

fn clone_error(error: Option<&WorkspaceApiError>) -> WorkspaceApiError {
    match error {
        Some(WorkspaceApiError::Network(msg)) => WorkspaceApiError::Network(msg.clone()),
        Some(WorkspaceApiError::Timeout(d)) => WorkspaceApiError::Timeout(*d),
        Some(WorkspaceApiError::RateLimited { retry_after }) => WorkspaceApiError::RateLimited {
            retry_after: *retry_after,
        },
        Some(WorkspaceApiError::Server { status }) => WorkspaceApiError::Server { status: *status },
        Some(WorkspaceApiError::Validation { message }) => WorkspaceApiError::Validation {
            message: message.clone(),
        },
        Some(WorkspaceApiError::NotFound { page_id }) => WorkspaceApiError::NotFound {
            page_id: page_id.clone(),
        },
        None => WorkspaceApiError::Server { status: 500 },
    }
}

#[async_trait]
impl WorkspaceApi for ScriptedWorkspaceApi {
    async fn create_page(
        &self,
        parent_id: Option<&str>,
        properties: &PageProperties,
    ) -> std::result::Result<String, WorkspaceApiError> {
        self.maybe_fail()?;
        let id = format!("ext-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.calls.lock().push(ApiCall::Create {
            parent: parent_id.map(String::from),
            title: properties.title.clone(),
        });
        Ok(id)
    }

    async fn update_page(
        &self,
        page_id: &str,
        properties: &PageProperties,
    ) -> std::result::Result<(), WorkspaceApiError> {
        self.maybe_fail()?;
        self.calls.lock().push(ApiCall::Update {
            page_id: page_id.to_string(),
            title: properties.title.clone(),
        });
        Ok(())
    }

    async fn archive_page(&self, page_id: &str) -> std::result::Result<(), WorkspaceApiError> {
        self.maybe_fail()?;
        self.calls.lock().push(ApiCall::Archive {
            page_id: page_id.to_string(),
        });
        Ok(())
    }
}

/// Executor that records which entity it served, in dispatch order.
pub struct OrderRecordingExecutor {
    entity_type: EntityType,
    pub order: Arc<Mutex<Vec<String>>>,
    delay: Duration,
}

impl OrderRecordingExecutor {
    pub fn new(entity_type: EntityType, order: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            entity_type,
            order,
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SyncExecutor for OrderRecordingExecutor {
    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    async fn execute(
        &self,
        task: &SyncTask,
    ) -> std::result::Result<ExecutionOutcome, ExecutorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.order.lock().push(task.entity_id.clone());
        Ok(ExecutionOutcome::synced(format!("ext-{}", task.entity_id)))
    }
}
