//! Task and entity sync-status state definitions.
//!
//! Two small state machines: [`TaskStatus`] for queue tasks and [`SyncStatus`]
//! for the denormalized projection on domain entities. The queue is not the
//! system of record; the projection is, which is what makes the in-memory
//! queue safe to lose on restart.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a queued sync task.
///
/// Transitions: `Pending -> Processing -> {Completed | Failed}`, with
/// `Processing -> Pending` on retryable failure and `Pending -> Cancelled`
/// when a DELETE supersedes a queued task for the same entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be dispatched (possibly not before `next_attempt_at`)
    Pending,
    /// Claimed by the dispatcher; an external call is in flight
    Processing,
    /// External call succeeded
    Completed,
    /// Exhausted retries or hit a terminal error
    Failed,
    /// Superseded before dispatch; never executed
    Cancelled,
}

impl TaskStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if this is an active state (an external call is in flight)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// Sync-status projection carried on each domain entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Never synced, or reset for re-sync
    Pending,
    /// A task for this entity is queued or in flight
    Syncing,
    /// External representation is up to date
    Synced,
    /// The last sync attempt failed terminally; operator attention needed
    Failed,
}

impl SyncStatus {
    /// Check if this entity needs work from the sync engine
    pub fn needs_sync(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Syncing => write!(f, "syncing"),
            Self::Synced => write!(f, "synced"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid sync status: {s}")),
        }
    }
}
