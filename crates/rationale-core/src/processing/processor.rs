//! Context processor
//!
//! Turns normalized events into a [`ProcessingResult`]. Events are split into
//! fixed-size batches; each batch is retried as a unit on transient failures,
//! and inside a batch every group of related events is extracted in
//! isolation so one bad group cannot poison its siblings.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::extractor::{ExtractionStrategy, GroupKnowledge, HeuristicExtractor};
use super::grouping::{EventGroup, group_events};
use super::relationships::{DEFAULT_MIN_STRENGTH, RelationshipExtractor};
use crate::domain::events::NormalizedEvent;
use crate::domain::knowledge::{
    FeatureContext, FileContextHistory, ProcessingError, ProcessingResult, push_unique,
};
use crate::error::{Error, Result};

/// Context processor settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    /// Events per batch
    pub batch_size: usize,
    /// Attempts per batch, including the first
    pub max_retries: u32,
    /// Base delay between attempts; attempt `n` waits `n` times this
    pub retry_delay: Duration,
    /// Relationships weaker than this are dropped
    pub min_relationship_strength: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            min_relationship_strength: DEFAULT_MIN_STRENGTH,
        }
    }
}

/// Extracts knowledge from normalized events
#[derive(Clone)]
pub struct ContextProcessor {
    config: ProcessorConfig,
    strategy: Arc<dyn ExtractionStrategy>,
    relationships: RelationshipExtractor,
}

impl std::fmt::Debug for ContextProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextProcessor")
            .field("config", &self.config)
            .field("strategy", &self.strategy.name())
            .finish()
    }
}

impl Default for ContextProcessor {
    fn default() -> Self {
        Self::new(ProcessorConfig::default())
    }
}

impl ContextProcessor {
    /// Create a processor using the heuristic extractor
    pub fn new(config: ProcessorConfig) -> Self {
        Self::with_strategy(config, Arc::new(HeuristicExtractor::new()))
    }

    /// Create a processor with custom extraction rules
    pub fn with_strategy(config: ProcessorConfig, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        let relationships = RelationshipExtractor::new(config.min_relationship_strength);
        Self {
            config,
            strategy,
            relationships,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Process events into knowledge
    ///
    /// Batch failures are recorded in the result's `errors` and never fail
    /// the call. The only error returned is [`Error::Cancelled`].
    pub async fn process_events(
        &self,
        events: &[NormalizedEvent],
        cancel: &CancellationToken,
    ) -> Result<ProcessingResult> {
        let mut merged = ProcessingResult::default();
        if events.is_empty() {
            return Ok(merged);
        }

        let batch_size = self.config.batch_size.max(1);
        let batch_count = events.len().div_ceil(batch_size);
        debug!(
            events = events.len(),
            batches = batch_count,
            strategy = self.strategy.name(),
            "Processing events"
        );

        for (index, batch) in events.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let partial = self.process_batch_with_retry(batch, index, cancel).await?;
            merged.merge(partial);
        }

        merged.relationships = self.relationships.extract(&merged);

        info!(
            events = events.len(),
            processed = merged.processed_events,
            decisions = merged.decisions.len(),
            discussions = merged.discussions.len(),
            features = merged.features.len(),
            files = merged.file_contexts.len(),
            relationships = merged.relationships.len(),
            errors = merged.errors.len(),
            "Events processed"
        );

        Ok(merged)
    }

    /// Process one batch, retrying transient failures with linear backoff
    ///
    /// A batch that still fails after the last attempt, or fails with a
    /// permanent error, is converted into one error per event.
    pub async fn process_batch_with_retry(
        &self,
        batch: &[NormalizedEvent],
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<ProcessingResult> {
        let max_attempts = self.config.max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match self.process_single_batch(batch) {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            let retryable = error.is_retryable();
            if !retryable || attempt >= max_attempts {
                warn!(
                    batch = index,
                    attempt,
                    retryable,
                    error = %error,
                    "Batch failed, recording errors"
                );
                return Ok(batch_failure(batch, &error.to_string(), retryable));
            }

            let delay = linear_backoff(self.config.retry_delay, attempt);
            debug!(
                batch = index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Batch failed, retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Extract one batch
    ///
    /// Groups are extracted independently. Invalid events, permanent
    /// strategy errors and panics are recorded against their group; a
    /// retryable strategy error fails the whole batch.
    pub fn process_single_batch(&self, batch: &[NormalizedEvent]) -> Result<ProcessingResult> {
        let mut result = ProcessingResult::default();
        let mut features: BTreeMap<String, FeatureContext> = BTreeMap::new();
        let mut files: BTreeMap<String, FileContextHistory> = BTreeMap::new();

        for group in group_events(batch) {
            if let Err(e) = validate_group(&group) {
                record_group_failure(&mut result, &group, &e.to_string(), false);
                continue;
            }

            let strategy = &self.strategy;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| strategy.extract_group(&group)));

            match outcome {
                Ok(Ok(knowledge)) => {
                    result.processed_events += group.events.len();
                    merge_group(&mut result, &mut features, &mut files, knowledge);
                }
                Ok(Err(e)) if e.is_retryable() => return Err(e),
                Ok(Err(e)) => record_group_failure(&mut result, &group, &e.to_string(), false),
                Err(payload) => {
                    let message =
                        format!("extraction panicked: {}", panic_message(payload.as_ref()));
                    warn!(group = ?group.key, "{}", message);
                    record_group_failure(&mut result, &group, &message, false);
                }
            }
        }

        result.features = features.into_values().collect();
        result.file_contexts = files.into_values().collect();
        Ok(result)
    }
}

fn validate_group(group: &EventGroup<'_>) -> Result<()> {
    for event in &group.events {
        if event.platform_id.trim().is_empty() {
            return Err(Error::InvalidEvent("missing platform id".to_string()));
        }
        if event.platform.trim().is_empty() {
            return Err(Error::InvalidEvent(format!(
                "event '{}' has no platform",
                event.platform_id
            )));
        }
    }
    Ok(())
}

/// Fold one group's knowledge into the batch
fn merge_group(
    result: &mut ProcessingResult,
    features: &mut BTreeMap<String, FeatureContext>,
    files: &mut BTreeMap<String, FileContextHistory>,
    knowledge: GroupKnowledge,
) {
    result.decisions.extend(knowledge.decisions);
    result.discussions.extend(knowledge.discussion);

    for mention in knowledge.features {
        let feature = features
            .entry(mention.name.clone())
            .or_insert_with(|| FeatureContext::new(&mention.name, mention.status, mention.at));
        feature.touch(mention.status, mention.at);
        if feature.description.is_empty() {
            feature.description = mention.description;
        }
        push_unique(&mut feature.contributors, &mention.contributor);
        for path in &mention.files {
            push_unique(&mut feature.related_files, path);
        }
        for id in &mention.decision_ids {
            push_unique(&mut feature.decision_ids, id);
        }
        if let Some(id) = &mention.discussion_id {
            push_unique(&mut feature.discussion_ids, id);
        }
    }

    for mention in knowledge.files {
        let file = files.entry(mention.path.clone()).or_insert_with(|| {
            FileContextHistory::new(&mention.path, &mention.change_reason, mention.at)
        });
        if mention.at < file.created_at {
            file.created_at = mention.at;
        }
        file.append_context(&mention.text);
        push_unique(&mut file.contributors, &mention.contributor);
        for id in &mention.decision_ids {
            push_unique(&mut file.related_decisions, id);
        }
        file.add_provenance(&mention.platform, &mention.event_id);
    }
}

fn record_group_failure(
    result: &mut ProcessingResult,
    group: &EventGroup<'_>,
    message: &str,
    retryable: bool,
) {
    result.errors.extend(
        group
            .events
            .iter()
            .map(|e| ProcessingError::new(&e.platform_id, &e.platform, message, retryable)),
    );
}

fn batch_failure(batch: &[NormalizedEvent], message: &str, retryable: bool) -> ProcessingResult {
    ProcessingResult {
        errors: batch
            .iter()
            .map(|e| ProcessingError::new(&e.platform_id, &e.platform, message, retryable))
            .collect(),
        ..Default::default()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `base * attempt`, saturating instead of overflowing
pub fn linear_backoff(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(attempt).unwrap_or(Duration::MAX)
}
