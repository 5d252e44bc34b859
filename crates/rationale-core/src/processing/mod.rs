//! Knowledge extraction pipeline
//!
//! Normalized events flow through [`ContextProcessor`], which batches and
//! groups them, runs an [`ExtractionStrategy`] per group and finally infers
//! relationships over the merged result with [`RelationshipExtractor`].

mod extractor;
mod grouping;
mod processor;
mod relationships;
pub mod text;

pub use extractor::{
    ExtractionStrategy, FeatureMention, FileMention, GroupKnowledge, HeuristicExtractor,
    MAX_SUMMARY_CHARS, MAX_TITLE_CHARS, has_decision_vocabulary, infer_feature_status,
};
pub use grouping::{EventGroup, GroupKey, group_events};
pub use processor::{ContextProcessor, ProcessorConfig, linear_backoff};
pub use relationships::{DEFAULT_MIN_STRENGTH, RelationshipExtractor};
