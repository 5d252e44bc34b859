//! Ingestion orchestration
//!
//! [`IngestionOrchestrator`] starts, stops and supervises one background run
//! per integration. A run fetches raw events through a
//! [`PlatformConnector`](crate::connectors::PlatformConnector), drops events
//! the checkpoint has already seen, extracts knowledge with the
//! [`ContextProcessor`](crate::processing::ContextProcessor) and advances the
//! checkpoint.

mod orchestrator;
mod report;
mod run;

pub use orchestrator::{IngestionOrchestrator, OrchestratorConfig};
pub use report::ProjectStartReport;
