//! In-process storage
//!
//! Used by the CLI's one-shot runs and by tests.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{IngestionStore, KnowledgeSink};
use crate::domain::ingestion::{DataSource, Integration, SyncCheckpoint, SyncStatusUpdate};
use crate::domain::knowledge::ProcessingResult;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct StoreState {
    projects: BTreeSet<String>,
    integrations: HashMap<String, Integration>,
    data_sources: HashMap<String, DataSource>,
}

/// Integration store held in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project with no integrations yet
    pub async fn add_project(&self, project_id: impl Into<String>) {
        self.state.write().await.projects.insert(project_id.into());
    }

    /// Insert or replace an integration, registering its project
    pub async fn insert_integration(&self, integration: Integration) {
        let mut state = self.state.write().await;
        state.projects.insert(integration.project_id.clone());
        state.integrations.insert(integration.id.clone(), integration);
    }

    /// Insert or replace a data source
    pub async fn insert_data_source(&self, data_source: DataSource) {
        self.state
            .write()
            .await
            .data_sources
            .insert(data_source.id.clone(), data_source);
    }
}

#[async_trait]
impl IngestionStore for MemoryStore {
    async fn get_integration(&self, id: &str) -> Result<Option<Integration>> {
        Ok(self.state.read().await.integrations.get(id).cloned())
    }

    async fn list_project_integrations(&self, project_id: &str) -> Result<Vec<Integration>> {
        let state = self.state.read().await;
        if !state.projects.contains(project_id) {
            return Err(Error::ProjectNotFound(project_id.to_string()));
        }
        let mut integrations: Vec<Integration> = state
            .integrations
            .values()
            .filter(|i| i.project_id == project_id)
            .cloned()
            .collect();
        integrations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(integrations)
    }

    async fn get_data_source(&self, id: &str) -> Result<Option<DataSource>> {
        Ok(self.state.read().await.data_sources.get(id).cloned())
    }

    async fn list_data_sources(&self, integration_id: &str) -> Result<Vec<DataSource>> {
        let state = self.state.read().await;
        let mut sources: Vec<DataSource> = state
            .data_sources
            .values()
            .filter(|d| d.integration_id == integration_id)
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sources)
    }

    async fn save_checkpoint(
        &self,
        integration_id: &str,
        checkpoint: &SyncCheckpoint,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let integration = state
            .integrations
            .get_mut(integration_id)
            .ok_or_else(|| Error::IntegrationNotFound(integration_id.to_string()))?;
        integration.sync_checkpoint = checkpoint.clone();
        debug!(
            integration_id = %integration_id,
            remembered_ids = checkpoint.processed_event_ids.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn update_sync_status(
        &self,
        integration_id: &str,
        update: &SyncStatusUpdate,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let integration = state
            .integrations
            .get_mut(integration_id)
            .ok_or_else(|| Error::IntegrationNotFound(integration_id.to_string()))?;
        update.apply(integration);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SinkState {
    stored: Vec<(String, ProcessingResult)>,
    failure: Option<String>,
}

/// Knowledge sink that keeps every result in memory
#[derive(Debug, Default)]
pub struct MemoryKnowledgeSink {
    state: RwLock<SinkState>,
}

impl MemoryKnowledgeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent stores fail with `message`, or succeed again with `None`
    pub async fn set_failure(&self, message: Option<String>) {
        self.state.write().await.failure = message;
    }

    /// Every stored result with its integration ID, in arrival order
    pub async fn results(&self) -> Vec<(String, ProcessingResult)> {
        self.state.read().await.stored.clone()
    }

    /// Number of stored results
    pub async fn len(&self) -> usize {
        self.state.read().await.stored.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KnowledgeSink for MemoryKnowledgeSink {
    async fn store(&self, integration_id: &str, result: &ProcessingResult) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(message) = &state.failure {
            return Err(Error::StorageError(message.clone()));
        }
        state.stored.push((integration_id.to_string(), result.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ingestion::IntegrationStatus;

    #[tokio::test]
    async fn test_unknown_project_is_an_error() {
        let store = MemoryStore::new();
        let err = store.list_project_integrations("nope").await.unwrap_err();
        assert!(matches!(err, Error::ProjectNotFound(_)));

        store.add_project("empty").await;
        assert!(store.list_project_integrations("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_update_and_checkpoint() {
        let store = MemoryStore::new();
        store.insert_integration(Integration::new("int-1", "p1", "github")).await;

        store
            .update_sync_status("int-1", &SyncStatusUpdate::terminal("boom", 3))
            .await
            .unwrap();
        let checkpoint = SyncCheckpoint {
            total_events_processed: 7,
            ..Default::default()
        };
        store.save_checkpoint("int-1", &checkpoint).await.unwrap();

        let integration = store.get_integration("int-1").await.unwrap().unwrap();
        assert_eq!(integration.status, IntegrationStatus::Error);
        assert_eq!(integration.sync_checkpoint.total_events_processed, 7);

        let err = store.save_checkpoint("missing", &checkpoint).await.unwrap_err();
        assert!(matches!(err, Error::IntegrationNotFound(_)));
    }

    #[tokio::test]
    async fn test_data_sources_by_integration() {
        let store = MemoryStore::new();
        store.insert_data_source(DataSource::new("ds-2", "int-1", "channel", "C2")).await;
        store.insert_data_source(DataSource::new("ds-1", "int-1", "channel", "C1")).await;
        store.insert_data_source(DataSource::new("ds-3", "int-2", "channel", "C3")).await;

        let sources = store.list_data_sources("int-1").await.unwrap();
        let ids: Vec<_> = sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ds-1", "ds-2"]);
    }

    #[tokio::test]
    async fn test_sink_failure_toggle() {
        let sink = MemoryKnowledgeSink::new();
        sink.set_failure(Some("disk full".into())).await;
        assert!(sink.store("int-1", &ProcessingResult::default()).await.is_err());

        sink.set_failure(None).await;
        sink.store("int-1", &ProcessingResult::default()).await.unwrap();
        assert_eq!(sink.len().await, 1);
    }
}
