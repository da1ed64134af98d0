//! KGX Extractor - triple enrichment
//!
//! Implements the enrichment stages applied to extracted triples:
//! entity disambiguation, knowledge fusion, relation validation and
//! quality assessment, plus the entity classifier and store they share.

use kgx_core::{EntityKind, EntityRole};

/// Decides whether a triple value is an entity, and of which kind
pub trait EntityClassifier: Send + Sync {
    /// `None` when the value is a literal rather than an entity
    fn classify(&self, value: &str, predicate: &str, role: EntityRole) -> Option<EntityKind>;
}

pub mod classifier;
pub mod disambiguation;
pub mod fusion;
pub mod quality;
pub mod store;
pub mod validation;

pub use classifier::KeywordClassifier;
pub use disambiguation::{levenshtein, name_similarity, Disambiguator, MatchThresholds};
pub use fusion::KnowledgeFusion;
pub use quality::QualityAssessor;
pub use store::InMemoryEntityStore;
pub use validation::{default_constraints, RelationValidator};
