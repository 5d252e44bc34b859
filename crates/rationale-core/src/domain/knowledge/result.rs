//! Output of one context-processing pass

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{DecisionRecord, DiscussionSummary, FeatureContext, FileContextHistory};
use super::relationship::Relationship;

/// A per-event extraction failure
///
/// Accumulated in [`ProcessingResult::errors`]; never aborts the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingError {
    pub event_id: String,
    pub platform: String,
    pub message: String,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
}

impl ProcessingError {
    pub fn new(
        event_id: impl Into<String>,
        platform: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            platform: platform.into(),
            message: message.into(),
            retryable,
            timestamp: Utc::now(),
        }
    }
}

/// Knowledge extracted from a set of normalized events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub decisions: Vec<DecisionRecord>,
    pub discussions: Vec<DiscussionSummary>,
    pub features: Vec<FeatureContext>,
    pub file_contexts: Vec<FileContextHistory>,
    pub relationships: Vec<Relationship>,
    pub processed_events: usize,
    pub errors: Vec<ProcessingError>,
}

impl ProcessingResult {
    /// Fold another partial result into this one
    ///
    /// Arrays are concatenated and counters summed. Relationships are left
    /// alone; they are computed once over the fully merged result.
    pub fn merge(&mut self, other: ProcessingResult) {
        self.decisions.extend(other.decisions);
        self.discussions.extend(other.discussions);
        self.features.extend(other.features);
        self.file_contexts.extend(other.file_contexts);
        self.processed_events += other.processed_events;
        self.errors.extend(other.errors);
    }

    /// Number of knowledge records, excluding relationships
    pub fn entity_count(&self) -> usize {
        self.decisions.len()
            + self.discussions.len()
            + self.features.len()
            + self.file_contexts.len()
    }

    /// True when nothing at all was produced
    pub fn is_empty(&self) -> bool {
        self.entity_count() == 0
            && self.relationships.is_empty()
            && self.processed_events == 0
            && self.errors.is_empty()
    }

    /// Distinct events that were seen but yielded no knowledge because of an error
    pub fn failed_event_count(&self) -> usize {
        self.errors
            .iter()
            .map(|e| e.event_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}
