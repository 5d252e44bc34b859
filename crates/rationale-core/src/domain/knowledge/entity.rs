//! Knowledge records extracted from platform activity
//!
//! These are the nodes of the knowledge graph: decisions, discussion
//! summaries, feature contexts and per-file change histories.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a recorded decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    #[default]
    Active,
    Superseded,
    Deprecated,
}

/// A decision recognized in an event's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: String,
    /// First sentence of the content, truncated
    pub title: String,
    /// Full decision text
    pub decision: String,
    pub rationale: String,
    pub alternatives: Vec<String>,
    pub consequences: Vec<String>,
    pub status: DecisionStatus,
    pub platform: String,
    pub source_event_ids: Vec<String>,
    pub participants: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl DecisionRecord {
    /// Create a decision with empty rationale, alternatives and consequences
    pub fn new(
        title: impl Into<String>,
        decision: impl Into<String>,
        platform: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            decision: decision.into(),
            rationale: String::new(),
            alternatives: Vec::new(),
            consequences: Vec::new(),
            status: DecisionStatus::Active,
            platform: platform.into(),
            source_event_ids: Vec::new(),
            participants: Vec::new(),
            created_at,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn with_alternatives(mut self, alternatives: Vec<String>) -> Self {
        self.alternatives = alternatives;
        self
    }

    pub fn with_consequences(mut self, consequences: Vec<String>) -> Self {
        self.consequences = consequences;
        self
    }

    pub fn with_source_events(mut self, ids: Vec<String>) -> Self {
        self.source_event_ids = ids;
        self
    }

    pub fn with_participants(mut self, participants: Vec<String>) -> Self {
        self.participants = participants;
        self
    }
}

/// Summary of a multi-event conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionSummary {
    pub id: String,
    pub thread_id: Option<String>,
    pub platform: String,
    pub participants: Vec<String>,
    pub summary: String,
    pub key_points: Vec<String>,
    pub action_items: Vec<String>,
    pub file_refs: Vec<String>,
    pub feature_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl DiscussionSummary {
    /// Create an empty summary for a conversation on `platform`
    pub fn new(platform: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread_id: None,
            platform: platform.into(),
            participants: Vec::new(),
            summary: String::new(),
            key_points: Vec::new(),
            action_items: Vec::new(),
            file_refs: Vec::new(),
            feature_refs: Vec::new(),
            created_at,
        }
    }
}

/// Where a feature is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Planned,
    #[default]
    InProgress,
    Completed,
    Deprecated,
}

impl FeatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Deprecated => "deprecated",
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated context for a named feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContext {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: FeatureStatus,
    pub contributors: Vec<String>,
    pub related_files: Vec<String>,
    pub discussion_ids: Vec<String>,
    pub decision_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeatureContext {
    /// Create an empty feature context first seen at `at`
    pub fn new(name: impl Into<String>, status: FeatureStatus, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            status,
            contributors: Vec::new(),
            related_files: Vec::new(),
            discussion_ids: Vec::new(),
            decision_ids: Vec::new(),
            created_at: at,
            updated_at: at,
        }
    }

    /// Fold another observation into this feature
    pub fn touch(&mut self, status: FeatureStatus, at: DateTime<Utc>) {
        if at >= self.updated_at {
            self.status = status;
            self.updated_at = at;
        }
        if at < self.created_at {
            self.created_at = at;
        }
    }
}

/// Change history and discussion provenance for one file path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContextHistory {
    pub id: String,
    pub file_path: String,
    pub change_reason: String,
    pub discussion_context: String,
    pub related_decisions: Vec<String>,
    pub contributors: Vec<String>,
    /// Platform -> IDs of events on that platform that mention the file
    pub platform_events: BTreeMap<String, Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl FileContextHistory {
    pub fn new(
        file_path: impl Into<String>,
        change_reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_path: file_path.into(),
            change_reason: change_reason.into(),
            discussion_context: String::new(),
            related_decisions: Vec::new(),
            contributors: Vec::new(),
            platform_events: BTreeMap::new(),
            created_at: at,
        }
    }

    /// Record that `event_id` on `platform` discussed this file
    pub fn add_provenance(&mut self, platform: &str, event_id: &str) {
        let ids = self.platform_events.entry(platform.to_string()).or_default();
        if !ids.iter().any(|id| id == event_id) {
            ids.push(event_id.to_string());
        }
    }

    /// Append a block of discussion text
    pub fn append_context(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.discussion_context.is_empty() {
            self.discussion_context.push_str("\n\n");
        }
        self.discussion_context.push_str(text);
    }

    /// File extension including the dot, if the path has one
    pub fn extension(&self) -> Option<&str> {
        let name = self.file_path.rsplit('/').next().unwrap_or(&self.file_path);
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx..]),
        }
    }
}

/// Push `value` if not already present, preserving insertion order
pub(crate) fn push_unique(list: &mut Vec<String>, value: &str) {
    if !value.is_empty() && !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_file_extension() {
        let at = Utc::now();
        assert_eq!(FileContextHistory::new("src/main.go", "", at).extension(), Some(".go"));
        assert_eq!(FileContextHistory::new("Makefile", "", at).extension(), None);
        assert_eq!(FileContextHistory::new(".github/ci", "", at).extension(), None);
        assert_eq!(FileContextHistory::new("a.b/c.tar.gz", "", at).extension(), Some(".gz"));
    }

    #[test]
    fn test_provenance_is_deduplicated() {
        let mut file = FileContextHistory::new("main.go", "", Utc::now());
        file.add_provenance("github", "pr-1");
        file.add_provenance("github", "pr-1");
        file.add_provenance("slack", "msg-1");
        assert_eq!(file.platform_events["github"], vec!["pr-1"]);
        assert_eq!(file.platform_events.len(), 2);
    }

    #[test]
    fn test_feature_touch_keeps_latest_status() {
        let t0 = Utc::now();
        let mut feature = FeatureContext::new("search", FeatureStatus::Planned, t0);
        feature.touch(FeatureStatus::Completed, t0 + Duration::hours(1));
        feature.touch(FeatureStatus::InProgress, t0 - Duration::hours(1));
        assert_eq!(feature.status, FeatureStatus::Completed);
        assert_eq!(feature.created_at, t0 - Duration::hours(1));
        assert_eq!(feature.updated_at, t0 + Duration::hours(1));
    }

    #[test]
    fn test_append_context_skips_blank() {
        let mut file = FileContextHistory::new("a.rs", "", Utc::now());
        file.append_context("first");
        file.append_context("   ");
        file.append_context("second");
        assert_eq!(file.discussion_context, "first\n\nsecond");
    }
}
