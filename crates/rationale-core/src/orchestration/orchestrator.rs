//! Ingestion orchestrator
//!
//! Owns the lifecycle of ingestion runs. Every run, retry timer and the
//! health loop is a task on one [`TaskTracker`], and every cancellation token
//! is a child of one root token, so [`IngestionOrchestrator::stop_orchestrator`]
//! reaches all of them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::report::ProjectStartReport;
use crate::connectors::ConnectorFactory;
use crate::domain::ingestion::{
    CheckpointPolicy, HealthStatus, HealthSweep, IngestionTask, Integration,
    IntegrationHealthStatus, SyncCheckpoint, SyncStatusUpdate, TaskRegistry, TaskSnapshot,
    TaskStatus,
};
use crate::error::{Error, Result};
use crate::processing::{ContextProcessor, linear_backoff};
use crate::storage::{IngestionStore, KnowledgeSink};

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Consecutive failed runs before an integration is marked `error`
    pub max_retries: u32,
    /// Base delay before a retry; attempt `n` waits `n` times this
    pub retry_backoff: Duration,
    pub health_check_interval: Duration,
    /// A running task without a sync for this long is flagged stale
    pub stale_sync_threshold: Duration,
    /// Maximum events fetched per run
    pub fetch_limit: usize,
    /// How long `stop_orchestrator` waits for tasks to finish
    pub shutdown_timeout: Duration,
    pub checkpoint: CheckpointPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_secs(5 * 60),
            health_check_interval: Duration::from_secs(5 * 60),
            stale_sync_threshold: Duration::from_secs(60 * 60),
            fetch_limit: 1000,
            shutdown_timeout: Duration::from_secs(30),
            checkpoint: CheckpointPolicy::default(),
        }
    }
}

/// A scheduled retry that has not fired yet
#[derive(Debug)]
pub(super) struct PendingRetry {
    pub(super) id: Uuid,
    pub(super) project_id: String,
    pub(super) cancel: CancellationToken,
}

pub(super) struct Inner {
    pub(super) config: OrchestratorConfig,
    pub(super) store: Arc<dyn IngestionStore>,
    pub(super) connectors: Arc<dyn ConnectorFactory>,
    pub(super) processor: ContextProcessor,
    pub(super) sink: Arc<dyn KnowledgeSink>,
    pub(super) registry: TaskRegistry,
    pub(super) tracker: TaskTracker,
    pub(super) root: CancellationToken,
    retries: Mutex<HashMap<String, PendingRetry>>,
    health_loop: Mutex<Option<CancellationToken>>,
}

/// Schedules, retries and supervises per-integration ingestion runs
///
/// Cheap to clone; clones share the same registry and tasks.
#[derive(Clone)]
pub struct IngestionOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for IngestionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionOrchestrator")
            .field("config", &self.inner.config)
            .field("active_tasks", &self.inner.registry.len())
            .finish()
    }
}

impl IngestionOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        processor: ContextProcessor,
        store: Arc<dyn IngestionStore>,
        connectors: Arc<dyn ConnectorFactory>,
        sink: Arc<dyn KnowledgeSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                connectors,
                processor,
                sink,
                registry: TaskRegistry::new(),
                tracker: TaskTracker::new(),
                root: CancellationToken::new(),
                retries: Mutex::new(HashMap::new()),
                health_loop: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Start every active integration of a project
    ///
    /// Inactive integrations are skipped. A failure to start one integration
    /// is recorded in the report and does not stop the others.
    pub async fn start_project_ingestion(&self, project_id: &str) -> Result<ProjectStartReport> {
        let integrations = self.inner.store.list_project_integrations(project_id).await?;
        let mut report = ProjectStartReport::new(project_id);

        for integration in integrations {
            if !integration.is_active() {
                debug!(
                    integration_id = %integration.id,
                    status = %integration.status,
                    "Skipping integration that is not active"
                );
                report.skipped.push(integration.id);
                continue;
            }
            let id = integration.id.clone();
            match self.inner.launch(integration) {
                Ok(()) => report.started.push(id),
                Err(e) => {
                    warn!(integration_id = %id, error = %e, "Failed to start ingestion");
                    report.failed.push((id, e.to_string()));
                }
            }
        }

        info!(
            project_id = %project_id,
            started = report.started.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Project ingestion started"
        );
        Ok(report)
    }

    /// Start a run for one integration without waiting for it
    pub async fn start_integration_ingestion(&self, integration_id: &str) -> Result<()> {
        self.inner.start_integration(integration_id).await
    }

    /// Start the integration that owns a data source
    pub async fn start_data_source_ingestion(&self, data_source_id: &str) -> Result<()> {
        let data_source = self
            .inner
            .store
            .get_data_source(data_source_id)
            .await?
            .ok_or_else(|| Error::DataSourceNotFound(data_source_id.to_string()))?;
        if !data_source.is_active {
            return Err(Error::DataSourceInactive(data_source_id.to_string()));
        }
        self.inner.start_integration(&data_source.integration_id).await
    }

    /// Cancel every run and pending retry of a project
    ///
    /// Cancelled runs are marked paused and exit without touching their
    /// checkpoint. Returns the integrations whose run was cancelled.
    pub fn stop_project_ingestion(&self, project_id: &str) -> Vec<String> {
        let stopped = self
            .inner
            .registry
            .cancel_project(project_id, TaskStatus::Paused);
        let retries = self.inner.cancel_project_retries(project_id);

        info!(
            project_id = %project_id,
            stopped = stopped.len(),
            retries_cancelled = retries,
            "Project ingestion stopped"
        );
        stopped
    }

    /// Health of every integration in a project
    pub async fn get_ingestion_health(&self, project_id: &str) -> Result<HealthStatus> {
        let integrations = self.inner.store.list_project_integrations(project_id).await?;
        let statuses = integrations
            .iter()
            .map(|i| IntegrationHealthStatus::evaluate(i, self.inner.registry.snapshot(&i.id)))
            .collect();
        Ok(HealthStatus::aggregate(project_id, statuses))
    }

    /// Health of one integration
    pub async fn get_integration_health(
        &self,
        integration_id: &str,
    ) -> Result<IntegrationHealthStatus> {
        let integration = self.inner.integration(integration_id).await?;
        Ok(IntegrationHealthStatus::evaluate(
            &integration,
            self.inner.registry.snapshot(integration_id),
        ))
    }

    pub async fn get_sync_checkpoint(&self, integration_id: &str) -> Result<SyncCheckpoint> {
        Ok(self.inner.integration(integration_id).await?.sync_checkpoint)
    }

    /// Replace an integration's checkpoint
    ///
    /// Refused while a run is in flight, since the run owns the checkpoint
    /// until it exits.
    pub async fn update_sync_checkpoint(
        &self,
        integration_id: &str,
        checkpoint: &SyncCheckpoint,
    ) -> Result<()> {
        self.inner.integration(integration_id).await?;
        if self.inner.registry.contains(integration_id) {
            return Err(Error::IngestionAlreadyRunning(integration_id.to_string()));
        }
        self.inner.store.save_checkpoint(integration_id, checkpoint).await?;
        info!(integration_id = %integration_id, "Checkpoint updated");
        Ok(())
    }

    /// Clear an integration's error state and start it again
    ///
    /// Refused while a run is in flight, leaving its error accounting intact.
    pub async fn retry_failed_ingestion(&self, integration_id: &str) -> Result<()> {
        self.inner.integration(integration_id).await?;
        if self.inner.registry.contains(integration_id) {
            return Err(Error::IngestionAlreadyRunning(integration_id.to_string()));
        }
        self.inner.cancel_retry(integration_id);
        self.inner
            .store
            .update_sync_status(integration_id, &SyncStatusUpdate::cleared())
            .await?;
        info!(integration_id = %integration_id, "Error state cleared, retrying ingestion");
        self.inner.start_integration(integration_id).await
    }

    /// Start the periodic health check
    ///
    /// Starting an already started orchestrator is a no-op.
    pub fn start_orchestrator(&self) -> Result<()> {
        if self.inner.root.is_cancelled() {
            return Err(Error::Other("orchestrator has been stopped".to_string()));
        }

        let mut health_loop = self.inner.lock_health_loop();
        if health_loop.is_some() {
            return Ok(());
        }

        let cancel = self.inner.root.child_token();
        *health_loop = Some(cancel.clone());
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move { inner.health_loop(cancel).await });

        info!(
            interval_secs = self.inner.config.health_check_interval.as_secs(),
            "Orchestrator started"
        );
        Ok(())
    }

    /// Cancel everything and wait for owned tasks to finish
    ///
    /// Bounded by the configured shutdown timeout. A stopped orchestrator
    /// cannot be started again.
    pub async fn stop_orchestrator(&self) -> Result<()> {
        info!(active_tasks = self.inner.registry.len(), "Stopping orchestrator");

        self.inner.root.cancel();
        self.inner.lock_retries().clear();
        self.inner.lock_health_loop().take();
        self.inner.tracker.close();

        let timeout = self.inner.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.inner.tracker.wait()).await.is_err() {
            error!(
                timeout_secs = timeout.as_secs(),
                remaining = self.inner.tracker.len(),
                "Orchestrator shutdown timed out"
            );
            return Err(Error::ShutdownTimeout(timeout.as_secs()));
        }

        info!("Orchestrator stopped");
        Ok(())
    }

    /// Wait until no run is registered for the integration
    pub async fn wait_for_idle(&self, integration_id: &str) {
        self.inner.registry.wait_until_absent(integration_id).await;
    }

    /// Run one health-check sweep now
    pub async fn run_health_check(&self) -> HealthSweep {
        self.inner.health_check().await
    }

    /// Whether a retry is scheduled for the integration
    pub fn has_pending_retry(&self, integration_id: &str) -> bool {
        self.inner.lock_retries().contains_key(integration_id)
    }

    /// Snapshots of every live run
    pub fn active_tasks(&self) -> Vec<TaskSnapshot> {
        self.inner.registry.snapshots()
    }
}

impl Inner {
    pub(super) fn lock_retries(&self) -> MutexGuard<'_, HashMap<String, PendingRetry>> {
        self.retries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_health_loop(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.health_loop.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) async fn integration(&self, integration_id: &str) -> Result<Integration> {
        self.store
            .get_integration(integration_id)
            .await?
            .ok_or_else(|| Error::IntegrationNotFound(integration_id.to_string()))
    }

    pub(super) async fn start_integration(self: &Arc<Self>, integration_id: &str) -> Result<()> {
        if self.registry.contains(integration_id) {
            return Err(Error::IngestionAlreadyRunning(integration_id.to_string()));
        }
        let integration = self.integration(integration_id).await?;
        self.launch(integration)
    }

    /// Register a task for an active integration and spawn its run
    ///
    /// The registry insert is the point where a concurrent start loses.
    pub(super) fn launch(self: &Arc<Self>, integration: Integration) -> Result<()> {
        if self.root.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if !integration.is_active() {
            return Err(Error::IntegrationNotActive {
                id: integration.id.clone(),
                status: integration.status.to_string(),
            });
        }

        let task = IngestionTask::new(
            &integration.id,
            &integration.project_id,
            &integration.platform,
            self.root.child_token(),
        )
        .with_error_count(integration.error_count);
        let registration = self.registry.register(task)?;

        // A manual start supersedes a scheduled retry
        self.cancel_retry(&integration.id);

        info!(
            integration_id = %integration.id,
            project_id = %integration.project_id,
            platform = %integration.platform,
            run_id = %registration.run_id(),
            "Ingestion run scheduled"
        );

        let inner = Arc::clone(self);
        self.tracker
            .spawn(async move { inner.run(integration, registration).await });
        Ok(())
    }

    /// Schedule another attempt after `retry_backoff * attempt`
    pub(super) fn schedule_retry(self: &Arc<Self>, integration: &Integration, attempt: u32) {
        if self.root.is_cancelled() {
            return;
        }

        let delay = linear_backoff(self.config.retry_backoff, attempt);
        let cancel = self.root.child_token();
        let retry_id = Uuid::new_v4();
        let integration_id = integration.id.clone();

        let previous = self.lock_retries().insert(
            integration_id.clone(),
            PendingRetry {
                id: retry_id,
                project_id: integration.project_id.clone(),
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        info!(
            integration_id = %integration_id,
            attempt,
            delay_secs = delay.as_secs(),
            "Retry scheduled"
        );

        let inner = Arc::clone(self);
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            // The failed run may still be unwinding
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = inner.registry.wait_until_absent(&integration_id) => {}
            }
            inner.finish_retry(&integration_id, retry_id);

            match inner.start_integration(&integration_id).await {
                Ok(()) => debug!(integration_id = %integration_id, attempt, "Retry started"),
                Err(e) => {
                    warn!(integration_id = %integration_id, error = %e, "Retry could not start")
                }
            }
        });
    }

    /// Remove a fired retry, unless it was replaced meanwhile
    fn finish_retry(&self, integration_id: &str, retry_id: Uuid) {
        let mut retries = self.lock_retries();
        if retries.get(integration_id).is_some_and(|r| r.id == retry_id) {
            retries.remove(integration_id);
        }
    }

    pub(super) fn cancel_retry(&self, integration_id: &str) -> bool {
        match self.lock_retries().remove(integration_id) {
            Some(retry) => {
                retry.cancel.cancel();
                debug!(integration_id = %integration_id, "Pending retry cancelled");
                true
            }
            None => false,
        }
    }

    fn cancel_project_retries(&self, project_id: &str) -> usize {
        let mut retries = self.lock_retries();
        let before = retries.len();
        retries.retain(|_, retry| {
            if retry.project_id == project_id {
                retry.cancel.cancel();
                false
            } else {
                true
            }
        });
        before - retries.len()
    }

    async fn health_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.health_check_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Health check loop cancelled");
                    return;
                }
                _ = interval.tick() => {
                    let sweep = self.health_check().await;
                    debug!(
                        checked = sweep.checked,
                        stale = sweep.stale,
                        terminated = sweep.terminated,
                        "Health check completed"
                    );
                }
            }
        }
    }

    /// Flag stale runs and terminate runs over the retry budget
    pub(super) async fn health_check(&self) -> HealthSweep {
        let snapshots = self.registry.snapshots();
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(self.config.stale_sync_threshold)
            .unwrap_or(chrono::Duration::MAX);

        let stale: Vec<String> = snapshots
            .iter()
            .filter(|s| s.status == TaskStatus::Running && !s.stale)
            .filter(|s| s.time_since_sync(now) > threshold)
            .map(|s| {
                warn!(
                    integration_id = %s.integration_id,
                    project_id = %s.project_id,
                    minutes_since_sync = s.time_since_sync(now).num_minutes(),
                    "Ingestion task has not synced recently"
                );
                s.integration_id.clone()
            })
            .collect();
        let newly_stale = self.registry.mark_stale(&stale);

        let mut terminated = 0;
        for snapshot in snapshots
            .iter()
            .filter(|s| s.error_count >= self.config.max_retries)
        {
            if !self.registry.cancel(&snapshot.integration_id, TaskStatus::Failed) {
                continue;
            }
            self.cancel_retry(&snapshot.integration_id);
            terminated += 1;

            let message = snapshot
                .last_error
                .clone()
                .unwrap_or_else(|| "exceeded retry budget".to_string());
            error!(
                integration_id = %snapshot.integration_id,
                error_count = snapshot.error_count,
                "Terminating ingestion task over retry budget"
            );
            if let Err(e) = self
                .store
                .update_sync_status(
                    &snapshot.integration_id,
                    &SyncStatusUpdate::terminal(message, snapshot.error_count),
                )
                .await
            {
                warn!(
                    integration_id = %snapshot.integration_id,
                    error = %e,
                    "Failed to persist terminal status"
                );
            }
        }

        HealthSweep {
            checked: snapshots.len(),
            stale: newly_stale,
            terminated,
        }
    }
}
