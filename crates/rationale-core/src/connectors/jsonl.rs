//! Connector backed by a JSON Lines export
//!
//! Each line is a [`RawEvent`]: `{"id", "platform", "timestamp", "payload"}`.
//! Payloads carry the fields of a [`NormalizedEvent`]; `platform_id`,
//! `platform` and `timestamp` fall back to the raw event's values.
//!
//! A payload with a string `source` field only matches data sources whose
//! `external_id` equals it. Events without one match every source.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::PlatformConnector;
use crate::domain::events::{NormalizedEvent, RawEvent};
use crate::domain::ingestion::DataSource;
use crate::error::{Error, Result};

/// Reads raw events for one platform from a `.jsonl` file
#[derive(Debug, Clone)]
pub struct JsonlConnector {
    platform: String,
    path: PathBuf,
}

impl JsonlConnector {
    pub fn new(platform: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            platform: platform.into(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse every raw event in the file
    pub async fn read_all(&self) -> Result<Vec<RawEvent>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::ConnectorError(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        parse_lines(&content)
    }
}

/// Parse raw events from JSON Lines, skipping blank lines
pub fn parse_lines(content: &str) -> Result<Vec<RawEvent>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<RawEvent>(line).map_err(|e| {
                Error::ConnectorError(format!("invalid event on line {}: {}", n + 1, e))
            })
        })
        .collect()
}

fn matches_sources(event: &RawEvent, sources: &[DataSource]) -> bool {
    match event.payload.get("source").and_then(Value::as_str) {
        Some(source) => sources.iter().any(|s| s.external_id == source),
        None => true,
    }
}

#[async_trait]
impl PlatformConnector for JsonlConnector {
    fn platform(&self) -> &str {
        &self.platform
    }

    async fn fetch_events(
        &self,
        sources: &[DataSource],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<RawEvent>> {
        let mut events: Vec<RawEvent> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| e.platform == self.platform)
            .filter(|e| e.timestamp >= since)
            .filter(|e| matches_sources(e, sources))
            .collect();

        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        events.truncate(limit);

        debug!(
            platform = %self.platform,
            path = %self.path.display(),
            since = %since,
            count = events.len(),
            "Fetched events"
        );
        Ok(events)
    }

    async fn normalize(&self, raw: &[RawEvent]) -> Result<Vec<NormalizedEvent>> {
        raw.iter().map(normalize_one).collect()
    }
}

fn normalize_one(raw: &RawEvent) -> Result<NormalizedEvent> {
    let Value::Object(mut fields) = raw.payload.clone() else {
        return Err(Error::ConnectorError(format!(
            "invalid payload for event '{}': expected an object",
            raw.id
        )));
    };

    fields
        .entry("platform_id")
        .or_insert_with(|| Value::String(raw.id.clone()));
    fields
        .entry("platform")
        .or_insert_with(|| Value::String(raw.platform.clone()));
    fields
        .entry("timestamp")
        .or_insert_with(|| Value::String(raw.timestamp.to_rfc3339()));

    serde_json::from_value(Value::Object(fields)).map_err(|e| {
        Error::ConnectorError(format!("invalid payload for event '{}': {}", raw.id, e))
    })
}
