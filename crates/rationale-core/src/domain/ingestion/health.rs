//! Health rollups over persisted integration state and live tasks

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::integration::{Integration, IntegrationStatus, SyncOutcome};
use super::task::{TaskSnapshot, TaskStatus};

/// Health of one integration, or of a whole project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    /// Recent failures, but still retrying
    Degraded,
    /// Some integrations are healthy, others are not (project level only)
    Partial,
    Failed,
    /// Integration is switched off
    Inactive,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a single integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationHealthStatus {
    pub integration_id: String,
    pub platform: String,
    pub state: HealthState,
    pub integration_status: IntegrationStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncOutcome>,
    pub error_count: u32,
    pub last_error: Option<String>,
    /// Live task, if a run is in flight
    pub task: Option<TaskSnapshot>,
}

impl IntegrationHealthStatus {
    /// Derive health from the persisted record and the live task, if any
    pub fn evaluate(integration: &Integration, task: Option<TaskSnapshot>) -> Self {
        let task_failed = task.as_ref().is_some_and(|t| t.status == TaskStatus::Failed);
        let task_stale = task.as_ref().is_some_and(|t| t.stale);
        let error_count = task
            .as_ref()
            .map_or(integration.error_count, |t| t.error_count.max(integration.error_count));

        let state = match integration.status {
            IntegrationStatus::Inactive => HealthState::Inactive,
            IntegrationStatus::Error => HealthState::Failed,
            IntegrationStatus::Active if task_failed => HealthState::Failed,
            IntegrationStatus::Active
                if error_count > 0
                    || task_stale
                    || integration.last_sync_status == Some(SyncOutcome::Failed) =>
            {
                HealthState::Degraded
            }
            IntegrationStatus::Active => HealthState::Healthy,
        };

        let last_error = task
            .as_ref()
            .and_then(|t| t.last_error.clone())
            .or_else(|| integration.error_message.clone());

        Self {
            integration_id: integration.id.clone(),
            platform: integration.platform.clone(),
            state,
            integration_status: integration.status,
            last_sync_at: task
                .as_ref()
                .and_then(|t| t.last_sync_at)
                .or(integration.last_sync_at),
            last_sync_status: integration.last_sync_status,
            error_count,
            last_error,
            task,
        }
    }
}

/// Health of every integration in a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub project_id: String,
    pub overall: HealthState,
    pub integrations: Vec<IntegrationHealthStatus>,
    pub active_tasks: usize,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    /// Roll integration health up to the project level
    ///
    /// Any failed integration fails the project. The project is healthy when
    /// every integration that is not switched off is healthy, and partial
    /// otherwise.
    pub fn aggregate(
        project_id: impl Into<String>,
        integrations: Vec<IntegrationHealthStatus>,
    ) -> Self {
        let overall = if integrations.iter().any(|i| i.state == HealthState::Failed) {
            HealthState::Failed
        } else if integrations
            .iter()
            .filter(|i| i.state != HealthState::Inactive)
            .all(|i| i.state == HealthState::Healthy)
        {
            HealthState::Healthy
        } else {
            HealthState::Partial
        };

        let active_tasks = integrations
            .iter()
            .filter(|i| i.task.as_ref().is_some_and(|t| t.status == TaskStatus::Running))
            .count();

        Self {
            project_id: project_id.into(),
            overall,
            integrations,
            active_tasks,
            checked_at: Utc::now(),
        }
    }
}

/// Summary of one health-check sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSweep {
    /// Live tasks inspected
    pub checked: usize,
    /// Tasks newly flagged as stale
    pub stale: usize,
    /// Tasks force-cancelled for exceeding the retry budget
    pub terminated: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    use crate::domain::ingestion::task::IngestionTask;

    fn health(state: HealthState) -> IntegrationHealthStatus {
        let integration = Integration::new("i", "p", "github");
        let mut status = IntegrationHealthStatus::evaluate(&integration, None);
        status.state = state;
        status
    }

    #[test]
    fn test_evaluate_states() {
        let mut integration = Integration::new("int-1", "p1", "github");
        assert_eq!(
            IntegrationHealthStatus::evaluate(&integration, None).state,
            HealthState::Healthy
        );

        integration.error_count = 1;
        integration.last_sync_status = Some(SyncOutcome::Failed);
        assert_eq!(
            IntegrationHealthStatus::evaluate(&integration, None).state,
            HealthState::Degraded
        );

        integration.status = IntegrationStatus::Error;
        assert_eq!(
            IntegrationHealthStatus::evaluate(&integration, None).state,
            HealthState::Failed
        );

        integration.status = IntegrationStatus::Inactive;
        assert_eq!(
            IntegrationHealthStatus::evaluate(&integration, None).state,
            HealthState::Inactive
        );
    }

    #[test]
    fn test_stale_task_degrades() {
        let integration = Integration::new("int-1", "p1", "github");
        let mut task = IngestionTask::new("int-1", "p1", "github", CancellationToken::new());
        task.stale = true;

        let status = IntegrationHealthStatus::evaluate(&integration, Some(task.snapshot()));
        assert_eq!(status.state, HealthState::Degraded);
        assert!(status.task.is_some());
    }

    #[test]
    fn test_aggregate_rules() {
        let healthy = HealthStatus::aggregate(
            "p",
            vec![health(HealthState::Healthy), health(HealthState::Inactive)],
        );
        assert_eq!(healthy.overall, HealthState::Healthy);

        let partial = HealthStatus::aggregate(
            "p",
            vec![health(HealthState::Healthy), health(HealthState::Degraded)],
        );
        assert_eq!(partial.overall, HealthState::Partial);

        let failed = HealthStatus::aggregate(
            "p",
            vec![health(HealthState::Failed), health(HealthState::Healthy)],
        );
        assert_eq!(failed.overall, HealthState::Failed);

        let empty = HealthStatus::aggregate("p", Vec::new());
        assert_eq!(empty.overall, HealthState::Healthy);
    }
}
