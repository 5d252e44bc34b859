//! Knowledge graph domain module
//!
//! Typed records extracted from collaboration activity, plus the weighted
//! relationships that connect them.
//!
//! ## Data Model
//!
//! - **DecisionRecord**: a decision with its rationale and alternatives
//! - **DiscussionSummary**: a condensed multi-event conversation
//! - **FeatureContext**: everything known about a named feature
//! - **FileContextHistory**: why a file changed and where it was discussed
//! - **Relationship**: a typed edge between any two of the above

mod entity;
mod relationship;
mod result;

pub(crate) use entity::push_unique;
pub use entity::{
    DecisionRecord, DecisionStatus, DiscussionSummary, FeatureContext, FeatureStatus,
    FileContextHistory,
};
pub use relationship::{EntityKind, Relationship, RelationshipType, clamp_strength};
pub use result::{ProcessingError, ProcessingResult};
