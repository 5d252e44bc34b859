//! Sync checkpoint and windowed deduplication
//!
//! A checkpoint is persisted alongside each integration. It holds the
//! incremental-fetch cursor plus a bounded window of recently processed event
//! IDs, so events re-delivered by at-least-once sources are dropped before
//! normalization.
//!
//! Everything here is pure: callers pass `now` explicitly.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::events::RawEvent;

/// Current on-disk layout version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Knobs that govern windowing and backfill
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointPolicy {
    /// How long processed IDs are remembered
    pub dedup_window: Duration,
    /// Hard cap on remembered IDs
    pub max_processed_ids: usize,
    /// How far back the first run fetches
    pub initial_backfill: Duration,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            dedup_window: Duration::hours(24),
            max_processed_ids: 10_000,
            initial_backfill: Duration::hours(24),
        }
    }
}

/// An event ID remembered by the dedup window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEventId {
    pub id: String,
    pub seen_at: DateTime<Utc>,
}

/// Persisted per-integration sync cursor
///
/// Older records store `processed_event_ids` as bare strings; those load with
/// `last_sync_time` (or the load time) as their `seen_at` stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredCheckpoint")]
pub struct SyncCheckpoint {
    pub version: u32,

    /// Where the next incremental fetch starts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,

    /// Recently processed IDs, most recent first
    pub processed_event_ids: Vec<ProcessedEventId>,

    pub total_events_processed: u64,

    pub last_batch_size: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_event_timestamp: Option<DateTime<Utc>>,

    /// Events that advanced the checkpoint without yielding knowledge
    pub unextracted_events: u64,

    /// Keys written by other versions, preserved verbatim
    #[serde(flatten)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl Default for SyncCheckpoint {
    fn default() -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            last_sync_time: None,
            processed_event_ids: Vec::new(),
            total_events_processed: 0,
            last_batch_size: 0,
            latest_event_timestamp: None,
            unextracted_events: 0,
            extensions: BTreeMap::new(),
        }
    }
}

/// A dedup window entry as found on disk
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredProcessedId {
    Stamped(ProcessedEventId),
    Bare(String),
}

/// On-disk checkpoint layout, accepted from every version
#[derive(Deserialize)]
struct StoredCheckpoint {
    #[serde(default = "current_version")]
    version: u32,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    processed_event_ids: Vec<StoredProcessedId>,
    #[serde(default)]
    total_events_processed: u64,
    #[serde(default)]
    last_batch_size: usize,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    latest_event_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    unextracted_events: u64,
    #[serde(flatten)]
    extensions: BTreeMap<String, serde_json::Value>,
}

impl From<StoredCheckpoint> for SyncCheckpoint {
    fn from(stored: StoredCheckpoint) -> Self {
        let stamp = stored.last_sync_time.unwrap_or_else(Utc::now);
        let processed_event_ids = stored
            .processed_event_ids
            .into_iter()
            .map(|entry| match entry {
                StoredProcessedId::Stamped(p) => p,
                StoredProcessedId::Bare(id) => ProcessedEventId { id, seen_at: stamp },
            })
            .collect();

        Self {
            version: stored.version,
            last_sync_time: stored.last_sync_time,
            processed_event_ids,
            total_events_processed: stored.total_events_processed,
            last_batch_size: stored.last_batch_size,
            latest_event_timestamp: stored.latest_event_timestamp,
            unextracted_events: stored.unextracted_events,
            extensions: stored.extensions,
        }
    }
}

/// What a completed fetch+process cycle contributes to the checkpoint
#[derive(Debug, Clone, Default)]
pub struct SyncProgress {
    /// IDs of the deduplicated events that went through the pipeline
    pub event_ids: Vec<String>,
    pub latest_event_timestamp: Option<DateTime<Utc>>,
    /// How many of those events produced no knowledge
    pub unextracted: usize,
    /// Set when the fetch hit its limit: the next fetch resumes here instead
    /// of at the sync start, so events past the limit are not skipped
    pub resume_at: Option<DateTime<Utc>>,
}

impl SyncProgress {
    /// Build progress from the deduplicated raw events of a run
    pub fn from_events(events: &[RawEvent]) -> Self {
        Self {
            event_ids: events.iter().map(|e| e.id.clone()).collect(),
            latest_event_timestamp: events.iter().map(|e| e.timestamp).max(),
            unextracted: 0,
            resume_at: None,
        }
    }

    pub fn with_unextracted(mut self, unextracted: usize) -> Self {
        self.unextracted = unextracted.min(self.event_ids.len());
        self
    }

    pub fn with_resume_at(mut self, resume_at: Option<DateTime<Utc>>) -> Self {
        self.resume_at = resume_at;
        self
    }
}

/// Result of filtering a fetch against the dedup window
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub fresh: Vec<RawEvent>,
    pub duplicates: usize,
}

impl SyncCheckpoint {
    /// Lower bound for the next incremental fetch
    pub fn since_time(&self, now: DateTime<Utc>, policy: &CheckpointPolicy) -> DateTime<Utc> {
        self.last_sync_time.unwrap_or_else(|| now - policy.initial_backfill)
    }

    /// Whether `id` is inside the remembered window
    pub fn has_processed(&self, id: &str) -> bool {
        self.processed_event_ids.iter().any(|p| p.id == id)
    }

    /// Drop events already processed, and repeats within the same fetch
    pub fn deduplicate(&self, events: Vec<RawEvent>) -> DedupOutcome {
        let seen: HashSet<&str> = self
            .processed_event_ids
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        let mut batch_seen: HashSet<String> = HashSet::new();
        let total = events.len();

        let fresh: Vec<RawEvent> = events
            .into_iter()
            .filter(|event| {
                if seen.contains(event.id.as_str()) {
                    return false;
                }
                batch_seen.insert(event.id.clone())
            })
            .collect();

        DedupOutcome {
            duplicates: total - fresh.len(),
            fresh,
        }
    }

    /// Advance the cursor after a completed cycle
    ///
    /// `sync_started` is the `seen_at` stamp of the newly processed IDs and,
    /// unless the fetch was truncated, the next `since`.
    pub fn advance(
        &mut self,
        progress: &SyncProgress,
        sync_started: DateTime<Utc>,
        policy: &CheckpointPolicy,
    ) {
        self.version = CHECKPOINT_VERSION;
        self.last_sync_time = Some(progress.resume_at.unwrap_or(sync_started));
        self.processed_event_ids = merge_processed_ids(
            &self.processed_event_ids,
            &progress.event_ids,
            sync_started,
            policy,
        );
        self.total_events_processed += progress.event_ids.len() as u64;
        self.last_batch_size = progress.event_ids.len();
        self.latest_event_timestamp =
            match (self.latest_event_timestamp, progress.latest_event_timestamp) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        self.unextracted_events += progress.unextracted as u64;
    }
}

/// Combine the previous window with newly processed IDs
///
/// Entries older than the window are dropped, duplicates keep their newest
/// stamp, and the cap keeps the most recent entries.
pub fn merge_processed_ids(
    previous: &[ProcessedEventId],
    new_ids: &[String],
    now: DateTime<Utc>,
    policy: &CheckpointPolicy,
) -> Vec<ProcessedEventId> {
    let cutoff = now - policy.dedup_window;

    let mut merged: Vec<ProcessedEventId> = new_ids
        .iter()
        .map(|id| ProcessedEventId {
            id: id.clone(),
            seen_at: now,
        })
        .chain(previous.iter().filter(|p| p.seen_at >= cutoff).cloned())
        .collect();

    // Stable sort: among equal stamps, new IDs stay ahead of old ones
    merged.sort_by(|a, b| b.seen_at.cmp(&a.seen_at));

    let mut seen = HashSet::new();
    merged.retain(|p| seen.insert(p.id.clone()));
    merged.truncate(policy.max_processed_ids);
    merged
}

fn current_version() -> u32 {
    CHECKPOINT_VERSION
}

/// Parse an RFC3339 timestamp, treating anything unparseable as absent
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        _ => None,
    })
}
