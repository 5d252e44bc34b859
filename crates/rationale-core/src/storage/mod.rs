//! Storage seams
//!
//! The orchestrator reads integrations and data sources and writes
//! checkpoints and sync status through [`IngestionStore`]. Extracted
//! knowledge is handed to a [`KnowledgeSink`]. Durable backends live outside
//! this crate; [`memory`] provides in-process implementations.

pub mod memory;

use async_trait::async_trait;

use crate::domain::ingestion::{DataSource, Integration, SyncCheckpoint, SyncStatusUpdate};
use crate::domain::knowledge::ProcessingResult;
use crate::error::Result;

pub use memory::{MemoryKnowledgeSink, MemoryStore};

/// Persistence for integration state
///
/// Implementations serialize concurrent writers per integration.
#[async_trait]
pub trait IngestionStore: Send + Sync {
    /// Get an integration by ID
    async fn get_integration(&self, id: &str) -> Result<Option<Integration>>;

    /// List every integration of a project
    ///
    /// Fails with `ProjectNotFound` for an unknown project.
    async fn list_project_integrations(&self, project_id: &str) -> Result<Vec<Integration>>;

    /// Get a data source by ID
    async fn get_data_source(&self, id: &str) -> Result<Option<DataSource>>;

    /// List the data sources of an integration, active or not
    async fn list_data_sources(&self, integration_id: &str) -> Result<Vec<DataSource>>;

    /// Replace an integration's checkpoint
    async fn save_checkpoint(
        &self,
        integration_id: &str,
        checkpoint: &SyncCheckpoint,
    ) -> Result<()>;

    /// Apply a partial sync status update
    async fn update_sync_status(
        &self,
        integration_id: &str,
        update: &SyncStatusUpdate,
    ) -> Result<()>;
}

/// Destination for extracted knowledge
#[async_trait]
pub trait KnowledgeSink: Send + Sync {
    /// Persist the knowledge extracted during one run
    async fn store(&self, integration_id: &str, result: &ProcessingResult) -> Result<()>;
}
