//! Ingestion domain module
//!
//! Bookkeeping for per-integration ingestion runs: the persisted integration
//! and checkpoint records, the live task registry, and health rollups.

mod checkpoint;
mod health;
mod integration;
mod registry;
mod task;

pub use checkpoint::{
    CHECKPOINT_VERSION, CheckpointPolicy, DedupOutcome, ProcessedEventId, SyncCheckpoint,
    SyncProgress, merge_processed_ids,
};
pub use health::{HealthState, HealthStatus, HealthSweep, IntegrationHealthStatus};
pub use integration::{DataSource, Integration, IntegrationStatus, SyncOutcome, SyncStatusUpdate};
pub use registry::{TaskRegistration, TaskRegistry};
pub use task::{IngestionTask, TaskSnapshot, TaskStatus};
