//! Registry of live ingestion tasks
//!
//! The registry is the only structure shared between concurrently running
//! ingestion tasks. It enforces the one-task-per-integration invariant: the
//! "already running" check and the insert happen under a single write lock.
//!
//! Registration hands back a [`TaskRegistration`] guard. Dropping the guard
//! unregisters the task, so a run is removed from the registry however it
//! exits.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::task::{IngestionTask, TaskSnapshot, TaskStatus};
use crate::error::{Error, Result};

/// Concurrency-safe map of integration ID to its live task
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    tasks: RwLock<HashMap<String, IngestionTask>>,
    /// Signalled whenever a task is removed
    removed: Notify,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, IngestionTask>> {
        self.inner.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, IngestionTask>> {
        self.inner.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a task, failing if its integration already has one
    pub fn register(&self, task: IngestionTask) -> Result<TaskRegistration> {
        let mut tasks = self.write();

        if tasks.contains_key(&task.integration_id) {
            return Err(Error::IngestionAlreadyRunning(task.integration_id.clone()));
        }

        let registration = TaskRegistration {
            registry: self.clone(),
            integration_id: task.integration_id.clone(),
            run_id: task.run_id,
            cancel: task.cancel.clone(),
        };

        debug!(
            integration_id = %task.integration_id,
            run_id = %task.run_id,
            "Task registered"
        );
        tasks.insert(task.integration_id.clone(), task);

        Ok(registration)
    }

    /// Whether a task is registered for the integration
    pub fn contains(&self, integration_id: &str) -> bool {
        self.read().contains_key(integration_id)
    }

    /// Snapshot of one task
    pub fn snapshot(&self, integration_id: &str) -> Option<TaskSnapshot> {
        self.read().get(integration_id).map(IngestionTask::snapshot)
    }

    /// Snapshots of every live task
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.read().values().map(IngestionTask::snapshot).collect()
    }

    /// Snapshots of the live tasks that belong to a project
    pub fn project_snapshots(&self, project_id: &str) -> Vec<TaskSnapshot> {
        self.read()
            .values()
            .filter(|t| t.project_id == project_id)
            .map(IngestionTask::snapshot)
            .collect()
    }

    /// Number of live tasks
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// True when no task is live
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Cancel one task and set its status
    pub fn cancel(&self, integration_id: &str, status: TaskStatus) -> bool {
        let mut tasks = self.write();
        match tasks.get_mut(integration_id) {
            Some(task) => {
                task.status = status;
                task.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every task of a project, returning the affected integration IDs
    pub fn cancel_project(&self, project_id: &str, status: TaskStatus) -> Vec<String> {
        let mut tasks = self.write();
        tasks
            .values_mut()
            .filter(|t| t.project_id == project_id)
            .map(|task| {
                task.status = status;
                task.cancel.cancel();
                task.integration_id.clone()
            })
            .collect()
    }

    /// Mark tasks as stale, returning how many flags were newly set
    pub fn mark_stale(&self, integration_ids: &[String]) -> usize {
        let mut tasks = self.write();
        let mut newly_stale = 0;
        for id in integration_ids {
            if let Some(task) = tasks.get_mut(id) {
                if !task.stale {
                    task.stale = true;
                    newly_stale += 1;
                }
            }
        }
        newly_stale
    }

    /// Wait until no task is registered for the integration
    pub async fn wait_until_absent(&self, integration_id: &str) {
        loop {
            let notified = self.inner.removed.notified();
            tokio::pin!(notified);
            // Register interest before checking, so a removal in between is not missed
            notified.as_mut().enable();

            if !self.contains(integration_id) {
                return;
            }
            notified.await;
        }
    }

    /// Apply `f` to the task only if it is still the given run
    fn update_run<F>(&self, integration_id: &str, run_id: Uuid, f: F) -> Option<u32>
    where
        F: FnOnce(&mut IngestionTask),
    {
        let mut tasks = self.write();
        let task = tasks
            .get_mut(integration_id)
            .filter(|t| t.run_id == run_id)?;
        f(task);
        Some(task.error_count)
    }

    fn remove_run(&self, integration_id: &str, run_id: Uuid) {
        let removed = {
            let mut tasks = self.write();
            match tasks.get(integration_id) {
                Some(task) if task.run_id == run_id => tasks.remove(integration_id).is_some(),
                _ => false,
            }
        };
        if removed {
            debug!(integration_id = %integration_id, run_id = %run_id, "Task unregistered");
            self.inner.removed.notify_waiters();
        }
    }
}

/// RAII handle for a registered task
///
/// Gives the owning run write access to its own registry entry. The entry
/// is removed when the handle is dropped.
#[derive(Debug)]
pub struct TaskRegistration {
    registry: TaskRegistry,
    integration_id: String,
    run_id: Uuid,
    cancel: CancellationToken,
}

impl TaskRegistration {
    pub fn integration_id(&self) -> &str {
        &self.integration_id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Cancellation handle of the run
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Current snapshot of the registered task
    pub fn snapshot(&self) -> Option<TaskSnapshot> {
        self.registry
            .snapshot(&self.integration_id)
            .filter(|s| s.run_id == self.run_id)
    }

    /// Set the task status
    ///
    /// A status set externally (paused by a stop, failed by the health
    /// check) is not overwritten once the run has been cancelled.
    pub fn set_status(&self, status: TaskStatus) {
        let cancelled = self.cancel.is_cancelled();
        self.registry.update_run(&self.integration_id, self.run_id, |task| {
            if !cancelled || task.status == TaskStatus::Running {
                task.status = status;
            }
        });
    }

    /// Record a failure, returning the new error count
    pub fn record_error(&self, message: &str) -> u32 {
        self.registry
            .update_run(&self.integration_id, self.run_id, |task| {
                task.error_count = task.error_count.saturating_add(1);
                task.last_error = Some(message.to_string());
            })
            .unwrap_or(0)
    }

    /// Record a successful sync
    pub fn record_sync(&self, at: DateTime<Utc>) {
        self.registry.update_run(&self.integration_id, self.run_id, |task| {
            task.last_sync_at = Some(at);
            task.error_count = 0;
            task.last_error = None;
            task.stale = false;
        });
    }
}

impl Drop for TaskRegistration {
    fn drop(&mut self) {
        self.registry.remove_run(&self.integration_id, self.run_id);
    }
}
