//! Domain model
//!
//! - [`events`]: raw and normalized platform events
//! - [`ingestion`]: integrations, checkpoints, live tasks and health
//! - [`knowledge`]: extracted knowledge records and relationships

pub mod events;
pub mod ingestion;
pub mod knowledge;
