//! PII handling
//!
//! This module provides the pieces that touch sensitive values directly:
//! - Strategy classification (which detection model suits a prompt)
//! - Mapping store (original ↔ substitute table for one run)
//! - Regex detection and pool-backed substitutes
//! - Revert engine (restoring originals in rendered responses)

pub mod classifier;
pub mod faker;
pub mod mapping;
pub mod pii;
pub mod revert;

pub use classifier::{classify, ClassificationResult, DetectionStrategy, SelectionMode};
pub use faker::PoolFaker;
pub use mapping::{Entity, EntityType, MappingError, MappingStore, Span};
pub use pii::PatternDetector;
pub use revert::{revert, RevertEngine, RevertOutcome, RevertReport};
