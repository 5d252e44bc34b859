//! One background ingestion run
//!
//! Steps run strictly in order. Every await on a connector or the store is a
//! cancellation point; a cancelled run returns before the checkpoint write
//! and never touches it.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::orchestrator::Inner;
use crate::domain::ingestion::{
    Integration, SyncProgress, SyncStatusUpdate, TaskRegistration, TaskStatus,
};
use crate::error::{Error, Result};

/// Race `fut` against cancellation
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// Summary of a finished run
#[derive(Debug, Default)]
struct RunSummary {
    fetched: usize,
    duplicates: usize,
    processed: usize,
    unextracted: usize,
}

impl Inner {
    /// Drive one run to completion and settle its outcome
    ///
    /// `registration` is dropped on return, which unregisters the task.
    pub(super) async fn run(
        self: Arc<Self>,
        integration: Integration,
        registration: TaskRegistration,
    ) {
        info!(
            integration_id = %integration.id,
            platform = %integration.platform,
            run_id = %registration.run_id(),
            "Ingestion run started"
        );

        match self.execute(&integration, &registration).await {
            Ok(summary) => {
                registration.set_status(TaskStatus::Completed);
                info!(
                    integration_id = %integration.id,
                    fetched = summary.fetched,
                    duplicates = summary.duplicates,
                    processed = summary.processed,
                    unextracted = summary.unextracted,
                    "Ingestion run completed"
                );
            }
            Err(Error::Cancelled) => {
                info!(integration_id = %integration.id, "Ingestion run cancelled");
            }
            Err(e) => self.handle_failure(&integration, &registration, e).await,
        }
    }

    async fn execute(
        &self,
        integration: &Integration,
        registration: &TaskRegistration,
    ) -> Result<RunSummary> {
        let cancel = registration.cancel_token();
        let mut summary = RunSummary::default();

        let connector = cancellable(cancel, self.connectors.connector_for(integration)).await?;

        let sources: Vec<_> = cancellable(cancel, self.store.list_data_sources(&integration.id))
            .await?
            .into_iter()
            .filter(|s| s.is_active)
            .collect();
        if sources.is_empty() {
            debug!(integration_id = %integration.id, "No active data sources");
            return Ok(summary);
        }

        // The run start snapshot may be stale after a checkpoint update
        let mut checkpoint = cancellable(cancel, self.integration(&integration.id))
            .await?
            .sync_checkpoint;

        let sync_started = Utc::now();
        let since = checkpoint.since_time(sync_started, &self.config.checkpoint);

        let raw = cancellable(
            cancel,
            connector.fetch_events(&sources, since, self.config.fetch_limit),
        )
        .await?;
        summary.fetched = raw.len();

        // A full page may have left older events behind; resume at its last one
        let resume_at = if raw.len() >= self.config.fetch_limit {
            raw.iter().map(|e| e.timestamp).max()
        } else {
            None
        };

        let dedup = checkpoint.deduplicate(raw);
        summary.duplicates = dedup.duplicates;
        debug!(
            integration_id = %integration.id,
            since = %since,
            fetched = summary.fetched,
            duplicates = dedup.duplicates,
            "Events fetched"
        );

        if dedup.fresh.is_empty() {
            match resume_at {
                Some(at) if at > since => {
                    let progress = SyncProgress::default().with_resume_at(Some(at));
                    checkpoint.advance(&progress, sync_started, &self.config.checkpoint);
                    cancellable(cancel, self.store.save_checkpoint(&integration.id, &checkpoint))
                        .await?;
                }
                Some(_) => warn!(
                    integration_id = %integration.id,
                    since = %since,
                    limit = self.config.fetch_limit,
                    "Fetch limit filled by already processed events at the cursor"
                ),
                None => {}
            }
            self.record_success(integration, registration, sync_started).await;
            return Ok(summary);
        }

        let events = cancellable(cancel, connector.normalize(&dedup.fresh)).await?;

        let result = self.processor.process_events(&events, cancel).await?;
        summary.processed = result.processed_events;
        summary.unextracted = result.failed_event_count();

        if let Err(e) = cancellable(cancel, self.sink.store(&integration.id, &result)).await {
            if matches!(e, Error::Cancelled) {
                return Err(e);
            }
            warn!(
                integration_id = %integration.id,
                error = %e,
                events = dedup.fresh.len(),
                "Failed to store extracted knowledge"
            );
            summary.unextracted = dedup.fresh.len();
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let progress = SyncProgress::from_events(&dedup.fresh)
            .with_unextracted(summary.unextracted)
            .with_resume_at(resume_at);
        checkpoint.advance(&progress, sync_started, &self.config.checkpoint);
        cancellable(cancel, self.store.save_checkpoint(&integration.id, &checkpoint)).await?;

        self.record_success(integration, registration, sync_started).await;
        Ok(summary)
    }

    /// Persist a successful sync
    ///
    /// Runs after the checkpoint commit, so it is not a cancellation point
    /// and a storage failure here does not fail the run.
    async fn record_success(
        &self,
        integration: &Integration,
        registration: &TaskRegistration,
        at: chrono::DateTime<Utc>,
    ) {
        if let Err(e) = self
            .store
            .update_sync_status(&integration.id, &SyncStatusUpdate::success(at))
            .await
        {
            warn!(integration_id = %integration.id, error = %e, "Failed to persist sync status");
        }
        registration.record_sync(at);
    }

    async fn handle_failure(
        self: &Arc<Self>,
        integration: &Integration,
        registration: &TaskRegistration,
        err: Error,
    ) {
        let message = err.to_string();
        let attempt = registration.record_error(&message);
        registration.set_status(TaskStatus::Failed);

        if attempt >= self.config.max_retries {
            error!(
                integration_id = %integration.id,
                project_id = %integration.project_id,
                attempt,
                error = %err,
                "Ingestion failed, retry budget exhausted"
            );
            let update = SyncStatusUpdate::terminal(&message, attempt);
            if let Err(e) = self.store.update_sync_status(&integration.id, &update).await {
                warn!(
                    integration_id = %integration.id,
                    error = %e,
                    "Failed to persist terminal status"
                );
            }
            return;
        }

        warn!(
            integration_id = %integration.id,
            attempt,
            max_retries = self.config.max_retries,
            error = %err,
            "Ingestion run failed"
        );
        if let Err(e) = self
            .store
            .update_sync_status(&integration.id, &SyncStatusUpdate::failure(&message, attempt))
            .await
        {
            warn!(integration_id = %integration.id, error = %e, "Failed to persist sync status");
        }

        // A run cancelled while failing does not come back on its own
        if registration.cancel_token().is_cancelled() {
            return;
        }
        self.schedule_retry(integration, attempt);
    }
}
