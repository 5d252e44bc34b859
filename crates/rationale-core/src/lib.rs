//! Rationale Core Library
//!
//! This crate turns collaboration activity into a knowledge graph:
//! - Ingestion orchestration (one supervised run per integration, retries, health)
//! - Sync checkpoints with a bounded deduplication window
//! - Knowledge extraction (decisions, discussions, features, file histories)
//! - Relationship inference between extracted entities
//! - Platform connector and storage seams, with in-process implementations

pub mod config;
pub mod connectors;
pub mod domain;
pub mod error;
pub mod orchestration;
pub mod processing;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::connectors::{ConnectorFactory, ConnectorRegistry, PlatformConnector};
    pub use crate::domain::events::{NormalizedEvent, RawEvent};
    pub use crate::domain::knowledge::ProcessingResult;
    pub use crate::error::{Error, Result};
    pub use crate::orchestration::{IngestionOrchestrator, OrchestratorConfig};
    pub use crate::processing::{ContextProcessor, ProcessorConfig};
    pub use crate::storage::{IngestionStore, KnowledgeSink};
}
