//! Knowledge relationships
//!
//! Relationships are the weighted edges of the knowledge graph. Every edge
//! names the kind and ID of both endpoints and carries a strength in
//! `[0.0, 1.0]`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of entity at either end of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Decision,
    Discussion,
    Feature,
    File,
    Platform,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Discussion => "discussion",
            Self::Feature => "feature",
            Self::File => "file",
            Self::Platform => "platform",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types of relationships between entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// Decision concerns a file
    RelatesTo,
    /// Feature was introduced by a decision
    IntroducedBy,
    /// File was modified as part of a feature
    ModifiedBy,
    /// Decision was discussed in a discussion
    DiscussedIn,
    /// Two entities share a contributor
    ContributedBy,
    /// The same file was discussed on two platforms
    DiscussedAcross,
}

impl RelationshipType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelatesTo => "relates_to",
            Self::IntroducedBy => "introduced_by",
            Self::ModifiedBy => "modified_by",
            Self::DiscussedIn => "discussed_in",
            Self::ContributedBy => "contributed_by",
            Self::DiscussedAcross => "discussed_across",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "relates_to" | "relatesto" => Some(Self::RelatesTo),
            "introduced_by" | "introducedby" => Some(Self::IntroducedBy),
            "modified_by" | "modifiedby" => Some(Self::ModifiedBy),
            "discussed_in" | "discussedin" => Some(Self::DiscussedIn),
            "contributed_by" | "contributedby" => Some(Self::ContributedBy),
            "discussed_across" | "discussedacross" => Some(Self::DiscussedAcross),
            _ => None,
        }
    }

    /// Whether the edge has no inherent direction
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::ContributedBy | Self::DiscussedAcross)
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, weighted edge between two knowledge entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_type: EntityKind,
    pub source_id: String,
    pub target_type: EntityKind,
    pub target_id: String,
    pub relationship_type: RelationshipType,
    /// Strength of the relationship (0.0 to 1.0)
    pub strength: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Create a relationship with zero strength
    pub fn new(
        source: (EntityKind, impl Into<String>),
        target: (EntityKind, impl Into<String>),
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_type: source.0,
            source_id: source.1.into(),
            target_type: target.0,
            target_id: target.1.into(),
            relationship_type,
            strength: 0.0,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the strength (clamped to 0.0-1.0, NaN becomes 0.0)
    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = clamp_strength(strength);
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Identity used to collapse duplicate edges
    ///
    /// Symmetric edges are keyed by their endpoints in sorted order.
    pub fn edge_key(&self) -> (RelationshipType, String, String) {
        let source = format!("{}:{}", self.source_type, self.source_id);
        let target = format!("{}:{}", self.target_type, self.target_id);
        if self.relationship_type.is_symmetric() && target < source {
            (self.relationship_type, target, source)
        } else {
            (self.relationship_type, source, target)
        }
    }
}

/// Clamp a raw score into the valid strength range
pub fn clamp_strength(strength: f64) -> f64 {
    if strength.is_nan() {
        0.0
    } else {
        strength.clamp(0.0, 1.0)
    }
}
