//! Knowledge extraction strategies
//!
//! An [`ExtractionStrategy`] turns one [`EventGroup`] into raw knowledge: the
//! decisions found in it, a summary when the group is a conversation, and
//! per-event feature and file mentions. Merging mentions into feature and
//! file contexts is left to the processor, so strategies stay pure.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::grouping::EventGroup;
use super::text::{first_sentence, sentences, truncate_chars};
use crate::domain::events::NormalizedEvent;
use crate::domain::knowledge::{DecisionRecord, DiscussionSummary, FeatureStatus, push_unique};
use crate::error::Result;

/// Maximum length of a decision title, in characters
pub const MAX_TITLE_CHARS: usize = 100;

/// Maximum length of a discussion summary, in characters
pub const MAX_SUMMARY_CHARS: usize = 500;

/// How many leading events contribute to a discussion summary
const SUMMARY_EVENTS: usize = 3;

static DECISION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:decided|decision|we should|going with|agreed|resolved|final decision|approved)\b",
    )
    .expect("valid regex")
});

static RATIONALE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:because|since|due to|reason|rationale)\b[:\s]*([^.!?\n]+)")
        .expect("valid regex")
});

static ALTERNATIVES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:alternatives?|other options?|could also)\s*:\s*([^\n]+)")
        .expect("valid regex")
});

static CONSEQUENCES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:consequences?|impact|this means)\s*:\s*([^\n]+)").expect("valid regex")
});

static KEY_POINT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*]|\d+[.)])\s+(.+)$").expect("valid regex"));

static ACTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:todo|action|need to|should|must|will)\b").expect("valid regex")
});

static FEATURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:feature|implement|add)\s*:\s*([^\n.,;]+)").expect("valid regex")
});

static COMPLETED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:completed|done)\b").expect("valid regex"));

static IN_PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:working on|in progress)\b").expect("valid regex"));

static PLANNED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:planning|will)\b").expect("valid regex"));

/// Whether text contains decision vocabulary
pub fn has_decision_vocabulary(text: &str) -> bool {
    DECISION_RE.is_match(text)
}

/// A feature named by one event
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMention {
    pub name: String,
    pub status: FeatureStatus,
    pub description: String,
    pub contributor: String,
    pub files: Vec<String>,
    /// Decisions recorded from the same event
    pub decision_ids: Vec<String>,
    /// Summary of the conversation the event belongs to
    pub discussion_id: Option<String>,
    pub at: DateTime<Utc>,
}

/// A file referenced by one event
#[derive(Debug, Clone, PartialEq)]
pub struct FileMention {
    pub path: String,
    pub change_reason: String,
    pub text: String,
    pub contributor: String,
    pub platform: String,
    pub event_id: String,
    pub decision_ids: Vec<String>,
    pub at: DateTime<Utc>,
}

/// Everything a strategy extracted from one group
#[derive(Debug, Clone, Default)]
pub struct GroupKnowledge {
    pub decisions: Vec<DecisionRecord>,
    pub discussion: Option<DiscussionSummary>,
    pub features: Vec<FeatureMention>,
    pub files: Vec<FileMention>,
}

/// Pluggable extraction rules
///
/// Implementations must be deterministic in everything but generated IDs.
/// A retryable error fails the whole batch so it is retried as a unit; any
/// other error is recorded against the group's events.
pub trait ExtractionStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Extract knowledge from one group of related events
    fn extract_group(&self, group: &EventGroup<'_>) -> Result<GroupKnowledge>;
}

/// Keyword and pattern based extraction
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Build a decision record if the event's content reads like a decision
    pub fn extract_decision(&self, event: &NormalizedEvent) -> Option<DecisionRecord> {
        if !has_decision_vocabulary(&event.content) {
            return None;
        }

        let title = truncate_chars(first_sentence(&event.content), MAX_TITLE_CHARS);
        let rationale = RATIONALE_RE
            .captures(&event.content)
            .map(|caps| caps[1].trim().to_string())
            .unwrap_or_default();

        Some(
            DecisionRecord::new(title, event.content.clone(), &event.platform, event.timestamp)
                .with_rationale(rationale)
                .with_alternatives(list_after(&ALTERNATIVES_RE, &event.content))
                .with_consequences(list_after(&CONSEQUENCES_RE, &event.content))
                .with_source_events(vec![event.platform_id.clone()])
                .with_participants(vec![event.author.clone()]),
        )
    }

    /// Condense a multi-event group; single events are not a discussion
    pub fn summarize(&self, group: &EventGroup<'_>) -> Option<DiscussionSummary> {
        let first = group.events.first()?;
        if group.events.len() < 2 {
            return None;
        }

        let created_at = group
            .events
            .iter()
            .map(|e| e.timestamp)
            .min()
            .unwrap_or(first.timestamp);
        let mut summary = DiscussionSummary::new(&first.platform, created_at);
        summary.thread_id = group.thread_id().map(str::to_string);
        summary.participants = group.participants();

        let opening: Vec<&str> = group
            .events
            .iter()
            .take(SUMMARY_EVENTS)
            .map(|e| first_sentence(&e.content))
            .filter(|s| !s.is_empty())
            .collect();
        summary.summary = truncate_chars(&opening.join(" "), MAX_SUMMARY_CHARS);

        for event in &group.events {
            for line in event.content.lines() {
                if let Some(caps) = KEY_POINT_RE.captures(line) {
                    push_unique(&mut summary.key_points, caps[1].trim());
                }
            }
            for sentence in sentences(&event.content) {
                if ACTION_RE.is_match(sentence) {
                    push_unique(&mut summary.action_items, sentence);
                }
            }
            for file in &event.file_refs {
                push_unique(&mut summary.file_refs, file);
            }
            for feature in &event.feature_refs {
                push_unique(&mut summary.feature_refs, feature);
            }
        }

        Some(summary)
    }

    /// Feature names mentioned by an event, explicit references last
    pub fn feature_names(&self, event: &NormalizedEvent) -> Vec<String> {
        let mut names = Vec::new();
        for caps in FEATURE_RE.captures_iter(&event.content) {
            push_unique(&mut names, caps[1].trim());
        }
        for name in &event.feature_refs {
            push_unique(&mut names, name.trim());
        }
        names
    }
}

impl ExtractionStrategy for HeuristicExtractor {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn extract_group(&self, group: &EventGroup<'_>) -> Result<GroupKnowledge> {
        let discussion = self.summarize(group);
        let discussion_id = discussion.as_ref().map(|d| d.id.clone());
        let mut knowledge = GroupKnowledge::default();

        for event in &group.events {
            let decision = self.extract_decision(event);
            let decision_ids: Vec<String> = decision.iter().map(|d| d.id.clone()).collect();
            knowledge.decisions.extend(decision);

            let names = self.feature_names(event);
            if !names.is_empty() {
                let status = infer_feature_status(&event.content);
                let description = truncate_chars(first_sentence(&event.content), 200);
                for name in names {
                    knowledge.features.push(FeatureMention {
                        name,
                        status,
                        description: description.clone(),
                        contributor: event.author.clone(),
                        files: event.file_refs.clone(),
                        decision_ids: decision_ids.clone(),
                        discussion_id: discussion_id.clone(),
                        at: event.timestamp,
                    });
                }
            }

            let change_reason = event
                .title
                .clone()
                .unwrap_or_else(|| truncate_chars(first_sentence(&event.content), 200));
            for path in &event.file_refs {
                knowledge.files.push(FileMention {
                    path: path.clone(),
                    change_reason: change_reason.clone(),
                    text: event.content.clone(),
                    contributor: event.author.clone(),
                    platform: event.platform.clone(),
                    event_id: event.platform_id.clone(),
                    decision_ids: decision_ids.clone(),
                    at: event.timestamp,
                });
            }
        }

        knowledge.discussion = discussion;
        Ok(knowledge)
    }
}

/// Infer feature status from content keywords
pub fn infer_feature_status(content: &str) -> FeatureStatus {
    if COMPLETED_RE.is_match(content) {
        FeatureStatus::Completed
    } else if IN_PROGRESS_RE.is_match(content) {
        FeatureStatus::InProgress
    } else if PLANNED_RE.is_match(content) {
        FeatureStatus::Planned
    } else {
        FeatureStatus::InProgress
    }
}

/// Items listed after a label, split on commas and semicolons
fn list_after(re: &Regex, text: &str) -> Vec<String> {
    let mut items = Vec::new();
    for caps in re.captures_iter(text) {
        for item in caps[1].split([',', ';']) {
            push_unique(&mut items, item.trim().trim_end_matches('.').trim());
        }
    }
    items
}
