//! Relationship inference over a merged processing result
//!
//! Runs once per `process_events` call, after every batch has been merged,
//! so edges can connect entities from different batches and groups.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Duration;
use serde_json::json;
use tracing::debug;

use super::extractor::has_decision_vocabulary;
use super::text::{contains_ignore_case, keywords};
use crate::domain::knowledge::{
    DecisionRecord, DiscussionSummary, EntityKind, FeatureContext, FileContextHistory,
    ProcessingResult, Relationship, RelationshipType,
};

/// Default minimum strength for an edge to be kept
pub const DEFAULT_MIN_STRENGTH: f64 = 0.3;

const PATH_MATCH_SCORE: f64 = 0.5;
const EXTENSION_MATCH_SCORE: f64 = 0.2;
const SHARED_KEYWORD_SCORE: f64 = 0.1;
const FEATURE_FILE_SCORE: f64 = 0.9;
const FEATURE_NAME_SCORE: f64 = 0.6;
const SHARED_PARTICIPANT_SCORE: f64 = 0.2;
const RECENCY_SCORE: f64 = 0.2;
const DISCUSSED_IN_SCORE: f64 = 0.8;
const CONTRIBUTED_BY_SCORE: f64 = 0.7;
const DISCUSSED_ACROSS_SCORE: f64 = 0.8;

/// Window within which a decision and a feature are considered related in time
const RECENCY_WINDOW_DAYS: i64 = 7;

/// Infers typed, weighted edges between extracted entities
#[derive(Debug, Clone, Copy)]
pub struct RelationshipExtractor {
    min_strength: f64,
}

impl Default for RelationshipExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_STRENGTH)
    }
}

impl RelationshipExtractor {
    pub fn new(min_strength: f64) -> Self {
        Self {
            min_strength: crate::domain::knowledge::clamp_strength(min_strength),
        }
    }

    /// Infer every relationship supported by the result
    pub fn extract(&self, result: &ProcessingResult) -> Vec<Relationship> {
        let mut edges = EdgeSet::new(self.min_strength);

        for decision in &result.decisions {
            for file in &result.file_contexts {
                edges.push(decision_file(decision, file));
            }
            for feature in &result.features {
                edges.push(decision_feature(decision, feature));
            }
            for discussion in &result.discussions {
                edges.push(decision_discussion(decision, discussion));
            }
        }

        let known_files: HashMap<&str, &FileContextHistory> = result
            .file_contexts
            .iter()
            .map(|f| (f.file_path.as_str(), f))
            .collect();
        for feature in &result.features {
            for path in &feature.related_files {
                if let Some(file) = known_files.get(path.as_str()) {
                    edges.push(Some(
                        Relationship::new(
                            (EntityKind::Feature, &feature.id),
                            (EntityKind::File, &file.id),
                            RelationshipType::ModifiedBy,
                        )
                        .with_strength(FEATURE_FILE_SCORE)
                        .with_metadata("file_path", json!(path)),
                    ));
                }
            }
        }

        for edge in contributor_edges(result) {
            edges.push(Some(edge));
        }
        for edge in platform_edges(&result.file_contexts) {
            edges.push(Some(edge));
        }

        let relationships = edges.into_vec();
        debug!(count = relationships.len(), "Relationships inferred");
        relationships
    }
}

/// Score a decision against a file context
fn decision_file(decision: &DecisionRecord, file: &FileContextHistory) -> Option<Relationship> {
    let mut score = 0.0;
    if decision.decision.contains(&file.file_path) {
        score += PATH_MATCH_SCORE;
    }
    if let Some(ext) = file.extension() {
        if decision.decision.contains(ext) {
            score += EXTENSION_MATCH_SCORE;
        }
    }
    let shared = keywords(&decision.decision)
        .intersection(&keywords(&file.discussion_context))
        .count();
    score += SHARED_KEYWORD_SCORE * shared as f64;

    (score > 0.0).then(|| {
        Relationship::new(
            (EntityKind::Decision, &decision.id),
            (EntityKind::File, &file.id),
            RelationshipType::RelatesTo,
        )
        .with_strength(score)
        .with_metadata("file_path", json!(file.file_path))
        .with_metadata("shared_keywords", json!(shared))
    })
}

/// Score a decision against a feature
fn decision_feature(decision: &DecisionRecord, feature: &FeatureContext) -> Option<Relationship> {
    let mut score = 0.0;
    if contains_ignore_case(&decision.decision, &feature.name) {
        score += FEATURE_NAME_SCORE;
    }
    let shared = decision
        .participants
        .iter()
        .filter(|p| feature.contributors.contains(*p))
        .count();
    score += SHARED_PARTICIPANT_SCORE * shared as f64;
    if (decision.created_at - feature.created_at).abs() <= Duration::days(RECENCY_WINDOW_DAYS) {
        score += RECENCY_SCORE;
    }

    (score > 0.0).then(|| {
        Relationship::new(
            (EntityKind::Decision, &decision.id),
            (EntityKind::Feature, &feature.id),
            RelationshipType::IntroducedBy,
        )
        .with_strength(score)
        .with_metadata("feature_name", json!(feature.name))
    })
}

fn decision_discussion(
    decision: &DecisionRecord,
    discussion: &DiscussionSummary,
) -> Option<Relationship> {
    let linked = has_decision_vocabulary(&discussion.summary)
        || decision
            .participants
            .iter()
            .any(|p| discussion.participants.contains(p))
        || (!decision.title.is_empty() && discussion.summary.contains(&decision.title));

    linked.then(|| {
        Relationship::new(
            (EntityKind::Decision, &decision.id),
            (EntityKind::Discussion, &discussion.id),
            RelationshipType::DiscussedIn,
        )
        .with_strength(DISCUSSED_IN_SCORE)
    })
}

/// Edges between every pair of decisions, features and files sharing a contributor
fn contributor_edges(result: &ProcessingResult) -> Vec<Relationship> {
    let entities: Vec<(EntityKind, &str, &[String])> = result
        .decisions
        .iter()
        .map(|d| (EntityKind::Decision, d.id.as_str(), d.participants.as_slice()))
        .chain(
            result
                .features
                .iter()
                .map(|f| (EntityKind::Feature, f.id.as_str(), f.contributors.as_slice())),
        )
        .chain(
            result
                .file_contexts
                .iter()
                .map(|f| (EntityKind::File, f.id.as_str(), f.contributors.as_slice())),
        )
        .collect();

    let mut edges = Vec::new();
    for (i, (kind_a, id_a, people_a)) in entities.iter().enumerate() {
        for (kind_b, id_b, people_b) in &entities[i + 1..] {
            let shared: Vec<&String> = people_a.iter().filter(|p| people_b.contains(*p)).collect();
            if shared.is_empty() {
                continue;
            }
            edges.push(
                Relationship::new(
                    (*kind_a, *id_a),
                    (*kind_b, *id_b),
                    RelationshipType::ContributedBy,
                )
                .with_strength(CONTRIBUTED_BY_SCORE)
                .with_metadata("contributors", json!(shared)),
            );
        }
    }
    edges
}

/// Edges between every pair of platforms on which one file was discussed
///
/// Provenance is unioned over every context entry of the same path.
fn platform_edges(files: &[FileContextHistory]) -> Vec<Relationship> {
    let mut platforms_by_path: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for file in files {
        platforms_by_path
            .entry(file.file_path.as_str())
            .or_default()
            .extend(file.platform_events.keys().map(String::as_str));
    }

    let mut edges = Vec::new();
    for (path, platforms) in platforms_by_path {
        let platforms: Vec<&str> = platforms.into_iter().collect();
        for (i, a) in platforms.iter().enumerate() {
            for b in &platforms[i + 1..] {
                edges.push(
                    Relationship::new(
                        (EntityKind::Platform, *a),
                        (EntityKind::Platform, *b),
                        RelationshipType::DiscussedAcross,
                    )
                    .with_strength(DISCUSSED_ACROSS_SCORE)
                    .with_metadata("file_path", json!(path)),
                );
            }
        }
    }
    edges
}

/// Collects edges, dropping weak ones and collapsing duplicates
struct EdgeSet {
    min_strength: f64,
    index: HashMap<(RelationshipType, String, String, Option<String>), usize>,
    edges: Vec<Relationship>,
}

impl EdgeSet {
    fn new(min_strength: f64) -> Self {
        Self {
            min_strength,
            index: HashMap::new(),
            edges: Vec::new(),
        }
    }

    fn push(&mut self, edge: Option<Relationship>) {
        let Some(edge) = edge else { return };
        if edge.strength < self.min_strength {
            return;
        }

        // Platform pairs are only duplicates when they concern the same file
        let scope = match edge.relationship_type {
            RelationshipType::DiscussedAcross => edge
                .metadata
                .get("file_path")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        };
        let (ty, source, target) = edge.edge_key();
        let key = (ty, source, target, scope);

        match self.index.get(&key) {
            Some(&i) => {
                if edge.strength > self.edges[i].strength {
                    self.edges[i] = edge;
                }
            }
            None => {
                self.index.insert(key, self.edges.len());
                self.edges.push(edge);
            }
        }
    }

    fn into_vec(self) -> Vec<Relationship> {
        self.edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::knowledge::FeatureStatus;
    use chrono::Utc;

    fn decision(text: &str, participants: &[&str]) -> DecisionRecord {
        DecisionRecord::new(text, text, "github", Utc::now())
            .with_participants(participants.iter().map(|s| s.to_string()).collect())
    }

    fn file(path: &str, context: &str) -> FileContextHistory {
        let mut f = FileContextHistory::new(path, "", Utc::now());
        f.append_context(context);
        f
    }

    fn of_type(edges: &[Relationship], ty: RelationshipType) -> Vec<&Relationship> {
        edges.iter().filter(|r| r.relationship_type == ty).collect()
    }

    #[test]
    fn test_decision_mentioning_path_relates_to_file() {
        let result = ProcessingResult {
            decisions: vec![decision("We decided to split main.go into packages", &["a"])],
            file_contexts: vec![file("main.go", "")],
            ..Default::default()
        };
        let edges = RelationshipExtractor::default().extract(&result);
        let relates = of_type(&edges, RelationshipType::RelatesTo);

        assert_eq!(relates.len(), 1);
        assert!(relates[0].strength >= 0.5);
        // Path (0.5) plus extension (0.2)
        assert!((relates[0].strength - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_shared_keywords_add_up_and_clamp() {
        let result = ProcessingResult {
            decisions: vec![decision(
                "src/cache.rs: eviction latency memory pressure throughput sharding locking",
                &[],
            )],
            file_contexts: vec![file(
                "src/cache.rs",
                "eviction latency memory pressure throughput sharding locking",
            )],
            ..Default::default()
        };
        let edges = RelationshipExtractor::default().extract(&result);
        let relates = of_type(&edges, RelationshipType::RelatesTo);
        assert_eq!(relates.len(), 1);
        assert_eq!(relates[0].strength, 1.0);
    }

    #[test]
    fn test_weak_edges_are_dropped() {
        // Only one shared keyword: 0.1 is below the threshold
        let result = ProcessingResult {
            decisions: vec![decision("Tune eviction", &[])],
            file_contexts: vec![file("lib.rs", "eviction is slow")],
            ..Default::default()
        };
        let edges = RelationshipExtractor::default().extract(&result);
        assert!(of_type(&edges, RelationshipType::RelatesTo).is_empty());
    }

    #[test]
    fn test_discussed_across_once_per_platform_pair() {
        let mut github = file("main.go", "");
        github.add_provenance("github", "pr-1");
        let mut slack = file("main.go", "");
        slack.add_provenance("slack", "msg-1");
        slack.add_provenance("slack", "msg-2");

        let result = ProcessingResult {
            file_contexts: vec![github, slack],
            ..Default::default()
        };
        let edges = RelationshipExtractor::default().extract(&result);
        let across = of_type(&edges, RelationshipType::DiscussedAcross);

        assert_eq!(across.len(), 1);
        assert_eq!(across[0].strength, 0.8);
        assert_eq!(across[0].metadata["file_path"], json!("main.go"));
    }

    #[test]
    fn test_feature_edges() {
        let at = Utc::now();
        let mut feature = FeatureContext::new("search", FeatureStatus::InProgress, at);
        feature.contributors.push("alice".into());
        feature.related_files.push("src/search.rs".into());

        let result = ProcessingResult {
            decisions: vec![decision("Going with tantivy for search", &["alice"])],
            features: vec![feature],
            file_contexts: vec![file("src/search.rs", "")],
            ..Default::default()
        };
        let edges = RelationshipExtractor::default().extract(&result);

        let modified = of_type(&edges, RelationshipType::ModifiedBy);
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].strength, 0.9);

        let introduced = of_type(&edges, RelationshipType::IntroducedBy);
        assert_eq!(introduced.len(), 1);
        // Name (0.6) + one shared participant (0.2) + recency (0.2)
        assert_eq!(introduced[0].strength, 1.0);

        let contributed = of_type(&edges, RelationshipType::ContributedBy);
        assert_eq!(contributed.len(), 1);
        assert_eq!(contributed[0].strength, 0.7);
    }

    #[test]
    fn test_discussed_in_by_shared_participant() {
        let mut discussion = DiscussionSummary::new("slack", Utc::now());
        discussion.participants = vec!["bob".into()];
        discussion.summary = "Talked about caching.".into();

        let result = ProcessingResult {
            decisions: vec![
                decision("Resolved: keep the cache", &["bob"]),
                decision("Resolved: drop the queue", &["carol"]),
            ],
            discussions: vec![discussion],
            ..Default::default()
        };
        let edges = RelationshipExtractor::default().extract(&result);
        let discussed = of_type(&edges, RelationshipType::DiscussedIn);
        assert_eq!(discussed.len(), 1);
        assert_eq!(discussed[0].source_id, result.decisions[0].id);
    }

    #[test]
    fn test_all_strengths_within_bounds() {
        let mut f = file("a/b.rs", "alpha beta gamma delta epsilon zeta eta theta");
        f.contributors.push("x".into());
        f.add_provenance("github", "1");
        f.add_provenance("slack", "2");
        f.add_provenance("jira", "3");
        let result = ProcessingResult {
            decisions: vec![decision(
                "We agreed a/b.rs alpha beta gamma delta epsilon zeta eta theta .rs",
                &["x"],
            )],
            file_contexts: vec![f],
            ..Default::default()
        };
        let edges = RelationshipExtractor::new(0.0).extract(&result);
        assert!(!edges.is_empty());
        assert!(edges.iter().all(|r| (0.0..=1.0).contains(&r.strength)));
        assert_eq!(of_type(&edges, RelationshipType::DiscussedAcross).len(), 3);
    }
}
