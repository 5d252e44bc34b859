//! Platform events as they flow from connectors into the pipeline
//!
//! Connectors produce [`RawEvent`]s, which are deduplicated by ID and then
//! normalized into platform-agnostic [`NormalizedEvent`]s.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A connector-native event before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Platform-unique identifier, used for deduplication
    pub id: String,
    /// Source platform (e.g. "github", "slack")
    pub platform: String,
    /// When the event happened on the platform
    pub timestamp: DateTime<Utc>,
    /// Opaque platform payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RawEvent {
    /// Create a raw event with an empty payload
    pub fn new(
        id: impl Into<String>,
        platform: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            platform: platform.into(),
            timestamp,
            payload: serde_json::Value::Null,
        }
    }

    /// Attach a payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Kind of platform activity an event represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PullRequest,
    Issue,
    Commit,
    Message,
    Thread,
    Reaction,
    FileChange,
    Discussion,
}

impl EventType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullRequest => "pull_request",
            Self::Issue => "issue",
            Self::Commit => "commit",
            Self::Message => "message",
            Self::Thread => "thread",
            Self::Reaction => "reaction",
            Self::FileChange => "file_change",
            Self::Discussion => "discussion",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pull_request" | "pullrequest" | "pr" => Some(Self::PullRequest),
            "issue" => Some(Self::Issue),
            "commit" => Some(Self::Commit),
            "message" => Some(Self::Message),
            "thread" => Some(Self::Thread),
            "reaction" => Some(Self::Reaction),
            "file_change" | "filechange" => Some(Self::FileChange),
            "discussion" => Some(Self::Discussion),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform-agnostic event produced by a connector
///
/// Immutable once produced; the context processor only ever borrows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Identifier unique within the source platform
    pub platform_id: String,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Referenced file paths, in order of appearance
    #[serde(default)]
    pub file_refs: Vec<String>,
    /// Referenced feature names, in order of appearance
    #[serde(default)]
    pub feature_refs: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Source platform identifier
    pub platform: String,
}

impl NormalizedEvent {
    /// Create an event with the required fields
    pub fn new(
        platform_id: impl Into<String>,
        platform: impl Into<String>,
        event_type: EventType,
        author: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            platform_id: platform_id.into(),
            event_type,
            timestamp,
            author: author.into(),
            content: content.into(),
            title: None,
            thread_id: None,
            parent_id: None,
            file_refs: Vec::new(),
            feature_refs: Vec::new(),
            labels: Vec::new(),
            state: None,
            metadata: BTreeMap::new(),
            platform: platform.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.file_refs = files;
        self
    }

    pub fn with_features(mut self, features: Vec<String>) -> Self {
        self.feature_refs = features;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
