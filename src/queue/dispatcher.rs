//! # Sync Queue Dispatcher
//!
//! Drives tasks from `Pending` to a terminal state while respecting the
//! external rate budget. A single background loop wakes on a fixed tick or an
//! enqueue signal and drains ready work:
//!
//! 1. Check for ready work, then consume rate budget — gating *before*
//!    dequeue, so a task is never pulled that cannot be served.
//! 2. Claim the highest-priority ready task.
//! 3. Run the entity type's executor under a bounded timeout.
//! 4. Success completes the task; failures are classified by their typed
//!    error into retryable (backoff, revert to pending) versus terminal.
//!
//! When a task finalizes, registered [`FinalizeHook`]s run synchronously
//! (the orchestrator updates the domain projection here) and a
//! [`TaskEvent`](crate::queue::events::TaskEvent) is broadcast.
//!
//! A single dispatcher is deliberate: throughput is bounded by the external
//! rate budget, so concurrency beyond it cannot help. Priority is strict with
//! FIFO inside a tier; the orchestrator alone assigns tiers, so a sustained
//! high-priority flood would require a matching flood of domain creations.
//!
//! The queue is explicitly constructed and carries its own `start`/`shutdown`
//! lifecycle; shutdown drains the in-flight task before returning.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::executor::{ExecutorError, ExecutorRegistry};
use crate::queue::events::{TaskEvent, TaskEventPublisher, TaskOutcome};
use crate::queue::store::{CoalesceOutcome, FailDisposition, QueueStats, SyncTaskStore};
use crate::task::{EnqueueRequest, SyncTask};

/// Invoked synchronously by the dispatcher the instant a task finalizes.
/// The orchestrator registers one to reconcile the domain projection.
#[async_trait]
pub trait FinalizeHook: Send + Sync {
    async fn on_finalized(&self, task: &SyncTask, outcome: &TaskOutcome);
}

/// The sync queue: task store + rate limiter + dispatcher loop.
pub struct SyncQueue {
    config: SyncConfig,
    store: Arc<SyncTaskStore>,
    limiter: Arc<crate::resilience::RateLimiter>,
    registry: Arc<ExecutorRegistry>,
    events: TaskEventPublisher,
    hooks: RwLock<Vec<Arc<dyn FinalizeHook>>>,
    wake: Notify,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SyncQueue {
    pub fn new(config: SyncConfig, registry: Arc<ExecutorRegistry>) -> Arc<Self> {
        let store = Arc::new(SyncTaskStore::new(
            config.backoff.clone(),
            config.dispatcher.default_max_attempts,
        ));
        let limiter = Arc::new(crate::resilience::RateLimiter::new(&config.rate_limit));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Arc::new(Self {
            config,
            store,
            limiter,
            registry,
            events: TaskEventPublisher::default(),
            hooks: RwLock::new(Vec::new()),
            wake: Notify::new(),
            shutdown_tx,
            shutdown_rx,
            worker: Mutex::new(None),
        })
    }

    /// Register a hook invoked on every task finalization.
    pub fn register_finalize_hook(&self, hook: Arc<dyn FinalizeHook>) {
        self.hooks.write().push(hook);
    }

    /// Subscribe to the task-finalized event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Direct access to the task store (lookups, stats, operator tooling).
    pub fn store(&self) -> &SyncTaskStore {
        &self.store
    }

    /// Queue depth and status counters.
    pub fn stats(&self) -> QueueStats {
        self.store.stats()
    }

    /// Enqueue through the coalescing path and wake the dispatcher.
    /// Non-blocking: callers never wait on external-API completion.
    pub fn enqueue(&self, request: EnqueueRequest) -> Result<CoalesceOutcome> {
        if *self.shutdown_rx.borrow() {
            return Err(SyncError::ShuttingDown);
        }

        let outcome = self.store.coalesce_or_enqueue(request)?;
        debug!(task_id = %outcome.task_id(), "Enqueued sync task");
        self.wake.notify_one();
        Ok(outcome)
    }

    /// Enqueue without coalescing (duplicates allowed) and wake the
    /// dispatcher.
    pub fn enqueue_uncoalesced(&self, request: EnqueueRequest) -> Result<Uuid> {
        if *self.shutdown_rx.borrow() {
            return Err(SyncError::ShuttingDown);
        }

        let task_id = self.store.enqueue(request)?;
        self.wake.notify_one();
        Ok(task_id)
    }

    /// Start the dispatcher loop. Idempotent: a second call while running is
    /// a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("Sync queue dispatcher already running");
            return;
        }

        info!(
            tick_ms = self.config.dispatcher.tick_ms,
            rate_budget = self.config.rate_limit.max_requests_per_window,
            "▶️ Sync queue dispatcher started"
        );

        let queue = Arc::clone(self);
        *worker = Some(tokio::spawn(async move { queue.run_loop().await }));
    }

    /// Stop dispatching and drain the in-flight task. Pending tasks stay in
    /// the store; the domain projection is the source of truth for recovery.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.wake.notify_one();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Dispatcher task join failed during shutdown");
            }
        }

        info!("⏹️ Sync queue dispatcher stopped");
    }

    async fn run_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut tick = tokio::time::interval(self.config.dispatcher.tick());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = self.wake.notified() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }

            self.drain().await;

            if *shutdown_rx.borrow() {
                break;
            }
        }

        debug!("Dispatcher loop exited");
    }

    /// Serve ready tasks until the queue is empty, the rate budget runs out,
    /// or shutdown is requested.
    async fn drain(&self) {
        loop {
            if *self.shutdown_rx.borrow() {
                return;
            }

            // Emptiness first: an idle tick must not burn rate budget.
            if !self.store.has_ready() {
                return;
            }

            if !self.limiter.try_acquire() {
                debug!("Rate budget exhausted; deferring to next tick");
                return;
            }

            // Gated before dequeue, so a claimed task is always served.
            let Some(task) = self.store.dequeue_next() else {
                return;
            };

            self.process(task).await;
        }
    }

    async fn process(&self, task: SyncTask) {
        let task_id = task.id;

        debug!(
            task_id = %task_id,
            entity_type = %task.entity_type,
            entity_id = %task.entity_id,
            operation = %task.operation,
            attempt = task.attempts,
            max_attempts = task.max_attempts,
            "Dispatching sync task"
        );

        let result = match self.registry.resolve(task.entity_type) {
            Some(executor) => {
                match tokio::time::timeout(
                    self.config.executor.call_timeout(),
                    executor.execute(&task),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ExecutorError::Timeout(self.config.executor.call_timeout())),
                }
            }
            None => Err(ExecutorError::NoExecutor(task.entity_type)),
        };

        match result {
            Ok(outcome) => {
                match self.store.complete(task_id, outcome.external_id.clone()) {
                    Ok(completed) => {
                        info!(
                            task_id = %task_id,
                            entity_type = %completed.entity_type,
                            entity_id = %completed.entity_id,
                            external_id = completed.external_id.as_deref(),
                            noop = outcome.noop,
                            attempts = completed.attempts,
                            "🟢 Sync task completed"
                        );
                        self.finalize(
                            &completed,
                            TaskOutcome::Completed {
                                external_id: completed.external_id.clone(),
                            },
                        )
                        .await;
                    }
                    Err(e) => error!(task_id = %task_id, error = %e, "Failed to record completion"),
                }
            }
            Err(ExecutorError::EntityGone) => {
                // The local entity vanished mid-flight; nothing left to sync.
                match self.store.complete(task_id, None) {
                    Ok(completed) => {
                        info!(
                            task_id = %task_id,
                            entity_type = %completed.entity_type,
                            entity_id = %completed.entity_id,
                            "Entity gone; sync task completed as no-op"
                        );
                        self.finalize(
                            &completed,
                            TaskOutcome::Completed {
                                external_id: completed.external_id.clone(),
                            },
                        )
                        .await;
                    }
                    Err(e) => error!(task_id = %task_id, error = %e, "Failed to record no-op completion"),
                }
            }
            Err(err) => {
                let retryable = err.is_retryable();
                let retry_after = err.retry_after();
                let message = err.to_string();

                match self.store.fail(task_id, &message, retryable, retry_after) {
                    Ok(FailDisposition::Retrying {
                        attempts,
                        next_attempt_at,
                    }) => {
                        warn!(
                            task_id = %task_id,
                            attempts,
                            next_attempt_at = %next_attempt_at,
                            error = %message,
                            "🔁 Sync task failed; retry scheduled"
                        );
                    }
                    Ok(FailDisposition::Failed { task }) => {
                        error!(
                            task_id = %task_id,
                            entity_type = %task.entity_type,
                            entity_id = %task.entity_id,
                            attempts = task.attempts,
                            retryable,
                            error = %message,
                            "🔴 Sync task failed terminally"
                        );
                        self.finalize(&task, TaskOutcome::Failed { error: message }).await;
                    }
                    Err(e) => error!(task_id = %task_id, error = %e, "Failed to record failure"),
                }
            }
        }
    }

    async fn finalize(&self, task: &SyncTask, outcome: TaskOutcome) {
        let hooks: Vec<Arc<dyn FinalizeHook>> = self.hooks.read().clone();
        for hook in hooks {
            hook.on_finalized(task, &outcome).await;
        }

        self.events.publish(TaskEvent {
            task_id: task.id,
            entity_type: task.entity_type,
            entity_id: task.entity_id.clone(),
            operation: task.operation,
            outcome,
            finished_at: Utc::now(),
        });
    }
}
