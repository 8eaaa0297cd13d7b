//! Stage B: subtitle files → meaningful units → extracted knowledge →
//! property graph.

pub mod analyzer;
pub mod executor;
pub mod extractor;
pub mod knowledge;
pub mod regrouper;
pub mod resolver;
pub mod structure;

pub use executor::{SeedingError, SeedingExecutor, SeedingReport};
pub use knowledge::{Entity, Insight, InsightType, Quote, QuoteType, Relationship, UnitKnowledge};
pub use resolver::{CanonicalEntity, ResolutionOutcome};
pub use structure::{ConversationStructure, MeaningfulUnit, Theme, UnitSpan, UnitType};
