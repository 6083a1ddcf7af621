//! Core entity and payload types shared across the sync engine.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Priority tier for entity creation (served first).
pub const PRIORITY_CREATE: u8 = 1;
/// Priority tier for status changes.
pub const PRIORITY_STATUS_CHANGE: u8 = 2;
/// Priority tier for routine field updates.
pub const PRIORITY_ROUTINE_UPDATE: u8 = 3;
/// Priority tier for deletions (served last).
pub const PRIORITY_DELETE: u8 = 4;

/// Domain object classes whose mutations are synced to the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Project,
    Milestone,
    Deliverable,
    Lead,
}

impl EntityType {
    /// All entity types, in sync-priority order.
    pub fn all() -> [EntityType; 4] {
        [
            Self::Project,
            Self::Milestone,
            Self::Deliverable,
            Self::Lead,
        ]
    }

    /// Whether this entity's workspace page nests under a parent page.
    ///
    /// Milestones and deliverables live under their project's page; projects
    /// and leads are created at the workspace root.
    pub fn requires_parent(&self) -> bool {
        matches!(self, Self::Milestone | Self::Deliverable)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Project => write!(f, "project"),
            Self::Milestone => write!(f, "milestone"),
            Self::Deliverable => write!(f, "deliverable"),
            Self::Lead => write!(f, "lead"),
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(Self::Project),
            "milestone" => Ok(Self::Milestone),
            "deliverable" => Ok(Self::Deliverable),
            "lead" => Ok(Self::Lead),
            _ => Err(format!("Invalid entity type: {s}")),
        }
    }
}

/// The external operation a sync task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl std::str::FromStr for SyncOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            _ => Err(format!("Invalid sync operation: {s}")),
        }
    }
}

/// The kind of domain mutation that triggered a sync.
///
/// Drives both the operation and the priority tier: creations outrank status
/// changes, which outrank routine touch-ups, which outrank deletions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    StatusChanged,
    Updated,
    Deleted,
}

impl ChangeKind {
    /// The sync operation this change maps to.
    pub fn operation(&self) -> SyncOperation {
        match self {
            Self::Created => SyncOperation::Create,
            Self::StatusChanged | Self::Updated => SyncOperation::Update,
            Self::Deleted => SyncOperation::Delete,
        }
    }

    /// The priority tier this change is served in (lower is sooner).
    pub fn priority(&self) -> u8 {
        match self {
            Self::Created => PRIORITY_CREATE,
            Self::StatusChanged => PRIORITY_STATUS_CHANGE,
            Self::Updated => PRIORITY_ROUTINE_UPDATE,
            Self::Deleted => PRIORITY_DELETE,
        }
    }
}

/// Immutable snapshot of a domain entity captured at enqueue time.
///
/// The executor works exclusively from this snapshot; it never re-reads the
/// database mid-flight, so a payload enqueued before a later mutation cannot
/// observe half of that mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_type: EntityType,
    pub entity_id: String,

    /// Display name; becomes the workspace page title
    pub name: Option<String>,

    /// Domain status string (e.g. "active", "on_hold")
    pub status: Option<String>,

    /// Service tier, where the entity carries one
    pub tier: Option<String>,

    /// Postal address, where the entity carries one
    pub address: Option<String>,

    /// External id of the parent entity's page (projects for milestones and
    /// deliverables)
    pub parent_external_id: Option<String>,

    /// External id of this entity's own page, when it has been synced before
    pub external_id: Option<String>,

    /// Executor-specific extra fields (due dates, owner emails, ...)
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

impl EntitySnapshot {
    pub fn new(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.into(),
            name: None,
            status: None,
            tier: None,
            address: None,
            parent_external_id: None,
            external_id: None,
            properties: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_parent_external_id(mut self, parent: impl Into<String>) -> Self {
        self.parent_external_id = Some(parent.into());
        self
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}
