//! Ingestion task bookkeeping types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Status of a live ingestion task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Paused,
    Failed,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-flight ingestion run for an integration
///
/// Owned by the task registry; callers only ever see a [`TaskSnapshot`].
#[derive(Debug, Clone)]
pub struct IngestionTask {
    /// Distinguishes successive runs of the same integration
    pub run_id: Uuid,
    pub integration_id: String,
    pub project_id: String,
    pub platform: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
    /// Set by the health check when the run has gone too long without a sync
    pub stale: bool,
    pub(crate) cancel: CancellationToken,
}

impl IngestionTask {
    /// Create a running task whose cancellation is tied to `cancel`
    pub fn new(
        integration_id: impl Into<String>,
        project_id: impl Into<String>,
        platform: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            integration_id: integration_id.into(),
            project_id: project_id.into(),
            platform: platform.into(),
            status: TaskStatus::Running,
            started_at: Utc::now(),
            last_sync_at: None,
            error_count: 0,
            last_error: None,
            stale: false,
            cancel,
        }
    }

    /// Carry over the failure count persisted by previous runs
    pub fn with_error_count(mut self, error_count: u32) -> Self {
        self.error_count = error_count;
        self
    }

    /// Cancellation handle of this run
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Read-only view for callers outside the orchestrator
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            run_id: self.run_id,
            integration_id: self.integration_id.clone(),
            project_id: self.project_id.clone(),
            platform: self.platform.clone(),
            status: self.status,
            started_at: self.started_at,
            last_sync_at: self.last_sync_at,
            error_count: self.error_count,
            last_error: self.last_error.clone(),
            stale: self.stale,
        }
    }
}

/// Opaque copy of a task's state at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub run_id: Uuid,
    pub integration_id: String,
    pub project_id: String,
    pub platform: String,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub stale: bool,
}

impl TaskSnapshot {
    /// Time since the last successful sync, or since start if none
    pub fn time_since_sync(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_sync_at.unwrap_or(self.started_at)
    }
}
