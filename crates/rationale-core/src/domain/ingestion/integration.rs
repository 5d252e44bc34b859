//! Persisted integration and data source records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::checkpoint::SyncCheckpoint;

/// Lifecycle status of an integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    #[default]
    Active,
    Inactive,
    /// Terminal until the failed ingestion is retried explicitly
    Error,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the most recent sync attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Success,
    Failed,
}

/// A connection from a project to one collaboration platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub id: String,
    pub project_id: String,
    pub platform: String,
    pub name: String,
    #[serde(default)]
    pub status: IntegrationStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncOutcome>,
    pub error_message: Option<String>,
    /// Consecutive failed runs; reset by a successful run or an explicit retry
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub sync_checkpoint: SyncCheckpoint,
    pub created_at: DateTime<Utc>,
}

impl Integration {
    /// Create an active integration with an empty checkpoint
    pub fn new(
        id: impl Into<String>,
        project_id: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        let platform = platform.into();
        Self {
            id: id.into(),
            project_id: project_id.into(),
            name: platform.clone(),
            platform,
            status: IntegrationStatus::Active,
            last_sync_at: None,
            last_sync_status: None,
            error_message: None,
            error_count: 0,
            sync_checkpoint: SyncCheckpoint::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_status(mut self, status: IntegrationStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: SyncCheckpoint) -> Self {
        self.sync_checkpoint = checkpoint;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == IntegrationStatus::Active
    }
}

/// A channel, repository or board fetched through an integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    pub integration_id: String,
    pub name: String,
    /// Platform-specific kind, e.g. "repository" or "channel"
    pub kind: String,
    /// Identifier on the remote platform
    pub external_id: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl DataSource {
    pub fn new(
        id: impl Into<String>,
        integration_id: impl Into<String>,
        kind: impl Into<String>,
        external_id: impl Into<String>,
    ) -> Self {
        let external_id = external_id.into();
        Self {
            id: id.into(),
            integration_id: integration_id.into(),
            name: external_id.clone(),
            kind: kind.into(),
            external_id,
            is_active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

fn default_true() -> bool {
    true
}

/// Partial update of an integration's sync fields
///
/// `None` leaves a field unchanged; `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStatusUpdate {
    pub status: Option<IntegrationStatus>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncOutcome>,
    pub error_message: Option<Option<String>>,
    pub error_count: Option<u32>,
}

impl SyncStatusUpdate {
    /// A run completed
    pub fn success(at: DateTime<Utc>) -> Self {
        Self {
            status: None,
            last_sync_at: Some(at),
            last_sync_status: Some(SyncOutcome::Success),
            error_message: Some(None),
            error_count: Some(0),
        }
    }

    /// A run failed and will be retried
    pub fn failure(message: impl Into<String>, error_count: u32) -> Self {
        Self {
            status: None,
            last_sync_at: None,
            last_sync_status: Some(SyncOutcome::Failed),
            error_message: Some(Some(message.into())),
            error_count: Some(error_count),
        }
    }

    /// A run failed for the last time; the integration moves to `error`
    pub fn terminal(message: impl Into<String>, error_count: u32) -> Self {
        Self {
            status: Some(IntegrationStatus::Error),
            ..Self::failure(message, error_count)
        }
    }

    /// Error state cleared before an explicit retry
    pub fn cleared() -> Self {
        Self {
            status: Some(IntegrationStatus::Active),
            last_sync_at: None,
            last_sync_status: None,
            error_message: Some(None),
            error_count: Some(0),
        }
    }

    /// Apply the update in place
    pub fn apply(&self, integration: &mut Integration) {
        if let Some(status) = self.status {
            integration.status = status;
        }
        if let Some(at) = self.last_sync_at {
            integration.last_sync_at = Some(at);
        }
        if let Some(outcome) = self.last_sync_status {
            integration.last_sync_status = Some(outcome);
        }
        if let Some(message) = &self.error_message {
            integration.error_message = message.clone();
        }
        if let Some(count) = self.error_count {
            integration.error_count = count;
        }
    }
}
