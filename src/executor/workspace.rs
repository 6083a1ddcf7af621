//! # Workspace Page Adapters
//!
//! The boundary to the external page-based workspace service. The concrete
//! HTTP client lives outside this crate; it implements [`WorkspaceApi`] and is
//! responsible for translating the service's rate-limit responses (429 plus
//! `Retry-After`) into [`WorkspaceApiError::RateLimited`]. The generic
//! [`WorkspacePageExecutor`] maps entity snapshots onto page properties and
//! keeps every operation idempotent:
//!
//! - CREATE with a known external id runs as an update (idempotent create)
//! - UPDATE without an external id falls back to a create
//! - UPDATE of a page the workspace no longer knows recreates it
//! - DELETE archives; a missing external id or already-archived page is a
//!   no-op success

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::executor::{ExecutionOutcome, ExecutorError, SyncExecutor};
use crate::task::SyncTask;
use crate::types::{EntitySnapshot, EntityType, SyncOperation};

/// Properties of one workspace page, as the external API understands them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageProperties {
    /// Page title
    pub title: String,

    /// Named fields shown on the page, keyed by property name. Ordered map so
    /// request bodies are stable across retries.
    pub fields: BTreeMap<String, Value>,
}

impl PageProperties {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// Failures reported by the workspace client.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("workspace rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("workspace server error (status {status})")]
    Server { status: u16 },

    #[error("workspace rejected the request: {message}")]
    Validation { message: String },

    #[error("page {page_id} not found")]
    NotFound { page_id: String },
}

impl From<WorkspaceApiError> for ExecutorError {
    fn from(err: WorkspaceApiError) -> Self {
        match err {
            WorkspaceApiError::Network(msg) => ExecutorError::Network(msg),
            WorkspaceApiError::Timeout(after) => ExecutorError::Timeout(after),
            WorkspaceApiError::RateLimited { retry_after } => {
                ExecutorError::RateLimited { retry_after }
            }
            WorkspaceApiError::Server { status } => ExecutorError::Server { status },
            WorkspaceApiError::Validation { message } => ExecutorError::Validation { message },
            // Call sites that can recover from a missing page match NotFound
            // before converting; reaching this conversion means the page was
            // required.
            WorkspaceApiError::NotFound { page_id } => ExecutorError::Validation {
                message: format!("workspace page {page_id} not found"),
            },
        }
    }
}

/// The external workspace client contract: create, update, archive pages.
#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    /// Create a page, optionally nested under a parent page. Returns the new
    /// page id.
    async fn create_page(
        &self,
        parent_id: Option<&str>,
        properties: &PageProperties,
    ) -> Result<String, WorkspaceApiError>;

    /// Update an existing page's properties.
    async fn update_page(
        &self,
        page_id: &str,
        properties: &PageProperties,
    ) -> Result<(), WorkspaceApiError>;

    /// Archive (hide) a page. The page still exists afterwards.
    async fn archive_page(&self, page_id: &str) -> Result<(), WorkspaceApiError>;
}

/// Generic per-entity-type executor that renders snapshots as workspace pages.
pub struct WorkspacePageExecutor {
    entity_type: EntityType,
    api: Arc<dyn WorkspaceApi>,
}

impl WorkspacePageExecutor {
    pub fn new(entity_type: EntityType, api: Arc<dyn WorkspaceApi>) -> Self {
        Self { entity_type, api }
    }

    /// Render the snapshot as page properties. The shapes differ per entity
    /// type: projects carry tier and address, milestones and deliverables
    /// carry status and any scheduling extras, leads carry contact fields.
    fn page_properties(&self, payload: &EntitySnapshot) -> PageProperties {
        let title = payload
            .name
            .clone()
            .unwrap_or_else(|| format!("Untitled {}", self.entity_type));
        let mut properties = PageProperties::titled(title);

        if let Some(status) = &payload.status {
            properties = properties.with_field("Status", Value::String(status.clone()));
        }

        match self.entity_type {
            EntityType::Project => {
                if let Some(tier) = &payload.tier {
                    properties = properties.with_field("Tier", Value::String(tier.clone()));
                }
                if let Some(address) = &payload.address {
                    properties = properties.with_field("Address", Value::String(address.clone()));
                }
            }
            EntityType::Lead => {
                if let Some(address) = &payload.address {
                    properties = properties.with_field("Address", Value::String(address.clone()));
                }
                if let Some(tier) = &payload.tier {
                    properties =
                        properties.with_field("Interested tier", Value::String(tier.clone()));
                }
            }
            EntityType::Milestone | EntityType::Deliverable => {}
        }

        for (key, value) in &payload.properties {
            properties = properties.with_field(key.clone(), value.clone());
        }

        properties
    }

    fn parent_id<'a>(&self, payload: &'a EntitySnapshot) -> Result<Option<&'a str>, ExecutorError> {
        match payload.parent_external_id.as_deref() {
            Some(parent) => Ok(Some(parent)),
            None if self.entity_type.requires_parent() => Err(ExecutorError::MissingParent {
                entity_type: self.entity_type,
                entity_id: payload.entity_id.clone(),
            }),
            None => Ok(None),
        }
    }

    async fn create(
        &self,
        payload: &EntitySnapshot,
        properties: &PageProperties,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let parent = self.parent_id(payload)?;
        let page_id = self.api.create_page(parent, properties).await?;

        info!(
            entity_type = %self.entity_type,
            entity_id = %payload.entity_id,
            external_id = %page_id,
            "🟢 Workspace page created"
        );
        Ok(ExecutionOutcome::synced(page_id))
    }

    async fn update(
        &self,
        payload: &EntitySnapshot,
        properties: &PageProperties,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let Some(page_id) = payload.external_id.as_deref() else {
            // Never created externally; fall back to create.
            debug!(
                entity_type = %self.entity_type,
                entity_id = %payload.entity_id,
                "Update without external id - falling back to create"
            );
            return self.create(payload, properties).await;
        };

        match self.api.update_page(page_id, properties).await {
            Ok(()) => Ok(ExecutionOutcome::synced(page_id)),
            Err(WorkspaceApiError::NotFound { .. }) => {
                // The page disappeared on the workspace side; recreate it.
                debug!(
                    entity_type = %self.entity_type,
                    entity_id = %payload.entity_id,
                    external_id = %page_id,
                    "Workspace page vanished - recreating"
                );
                self.create(payload, properties).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn archive(&self, payload: &EntitySnapshot) -> Result<ExecutionOutcome, ExecutorError> {
        let Some(page_id) = payload.external_id.as_deref() else {
            // Never synced; there is nothing external to archive.
            return Ok(ExecutionOutcome::noop());
        };

        match self.api.archive_page(page_id).await {
            Ok(()) => {
                info!(
                    entity_type = %self.entity_type,
                    entity_id = %payload.entity_id,
                    external_id = %page_id,
                    "🗄️ Workspace page archived"
                );
                Ok(ExecutionOutcome::synced(page_id))
            }
            Err(WorkspaceApiError::NotFound { .. }) => Ok(ExecutionOutcome::noop()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl SyncExecutor for WorkspacePageExecutor {
    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    async fn execute(&self, task: &SyncTask) -> Result<ExecutionOutcome, ExecutorError> {
        let payload = &task.payload;
        let properties = self.page_properties(payload);

        match task.operation {
            SyncOperation::Create => {
                if payload.external_id.is_some() {
                    // Already created externally; run as an update.
                    self.update(payload, &properties).await
                } else {
                    self.create(payload, &properties).await
                }
            }
            SyncOperation::Update => self.update(payload, &properties).await,
            SyncOperation::Delete => self.archive(payload).await,
        }
    }
}
