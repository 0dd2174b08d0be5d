//! PII mapping store
//!
//! Insertion-ordered table of detected entities and the substitutes chosen
//! for them. The revert step reads this table rather than re-parsing the
//! outbound text.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Semantic type of a detected span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Location,
    Email,
    Phone,
    Organization,
    Other,
}

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Person,
        EntityType::Location,
        EntityType::Email,
        EntityType::Phone,
        EntityType::Organization,
        EntityType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::Location => "LOCATION",
            EntityType::Email => "EMAIL",
            EntityType::Phone => "PHONE",
            EntityType::Organization => "ORGANIZATION",
            EntityType::Other => "OTHER",
        }
    }

    /// Lenient parse of backend labels ("PER", "LOC", "GPE", ...).
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "PERSON" | "PER" | "NAME" => EntityType::Person,
            "LOCATION" | "LOC" | "GPE" | "ADDRESS" => EntityType::Location,
            "EMAIL" => EntityType::Email,
            "PHONE" | "PHONE_NUMBER" => EntityType::Phone,
            "ORGANIZATION" | "ORG" => EntityType::Organization,
            _ => EntityType::Other,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte range `[start, end)` in the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// One detected PII span and its substitute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub original: String,
    pub substitute: Option<String>,
    pub span: Span,
}

impl Entity {
    pub fn new(
        id: impl Into<String>,
        entity_type: EntityType,
        original: impl Into<String>,
        span: Span,
    ) -> Self {
        Entity {
            id: id.into(),
            entity_type,
            original: original.into(),
            substitute: None,
            span,
        }
    }

    pub fn with_substitute(mut self, substitute: impl Into<String>) -> Self {
        self.substitute = Some(substitute.into());
        self
    }
}

/// Mapping store invariant violations
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum MappingError {
    #[error("duplicate entity id: {0}")]
    DuplicateId(String),
    #[error("unknown entity id: {0}")]
    UnknownId(String),
    #[error("entity {0} has an empty original value")]
    EmptyOriginal(String),
    #[error("entity {0} conflicts with an existing substitute for the same value")]
    ConflictingSubstitute(String),
    #[error("substitute for entity {0} is empty or equal to the original")]
    SubstituteEqualsOriginal(String),
    #[error("substitute for entity {0} already stands for a different value")]
    SubstituteInUse(String),
}

/// Run-scoped original↔substitute table
#[derive(Debug, Clone, Default)]
pub struct MappingStore {
    entities: Vec<Entity>,
    index: HashMap<String, usize>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entity. Ids are never overwritten.
    pub fn put(&mut self, entity: Entity) -> Result<(), MappingError> {
        if self.index.contains_key(&entity.id) {
            return Err(MappingError::DuplicateId(entity.id));
        }
        if entity.original.is_empty() {
            return Err(MappingError::EmptyOriginal(entity.id));
        }
        if self
            .entities
            .iter()
            .any(|e| e.substitute.as_deref() == Some(entity.original.as_str()))
        {
            return Err(MappingError::SubstituteInUse(entity.id));
        }
        if let Some(sub) = &entity.substitute {
            Self::check_substitute(&entity, sub)?;
            if let Some(existing) = self.find_substitute(&entity.original, entity.entity_type) {
                if existing != sub {
                    return Err(MappingError::ConflictingSubstitute(entity.id));
                }
            }
            if self.substitute_in_use(sub, &entity.original, entity.entity_type) {
                return Err(MappingError::SubstituteInUse(entity.id));
            }
        }

        self.index.insert(entity.id.clone(), self.entities.len());
        self.entities.push(entity);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.index.get(id).and_then(|&i| self.entities.get(i))
    }

    /// Entities in insertion order
    pub fn all(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.index.clear();
    }

    /// Substitute already chosen for an `(original, type)` pair, if any.
    pub fn find_substitute(&self, original: &str, entity_type: EntityType) -> Option<&str> {
        self.entities
            .iter()
            .filter(|e| e.entity_type == entity_type && e.original == original)
            .find_map(|e| e.substitute.as_deref())
    }

    /// Whether `candidate` would make two different values indistinguishable:
    /// it is some entity's original, or the substitute of another
    /// `(original, type)` pair.
    pub fn substitute_in_use(&self, candidate: &str, original: &str, entity_type: EntityType) -> bool {
        self.entities.iter().any(|e| {
            e.original == candidate
                || (e.substitute.as_deref() == Some(candidate)
                    && (e.original != original || e.entity_type != entity_type))
        })
    }

    /// Record the substitute chosen for an entity.
    ///
    /// Re-assigning the same value is a no-op; assigning a different value
    /// than the one already used for the same `(original, type)` pair fails.
    pub fn assign_substitute(&mut self, id: &str, substitute: String) -> Result<(), MappingError> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| MappingError::UnknownId(id.to_string()))?;

        let (original, entity_type) = {
            let entity = &self.entities[idx];
            Self::check_substitute(entity, &substitute)?;
            (entity.original.clone(), entity.entity_type)
        };

        let conflict = self.entities.iter().enumerate().any(|(i, e)| {
            i != idx
                && e.entity_type == entity_type
                && e.original == original
                && e.substitute.as_deref().is_some_and(|s| s != substitute)
        });
        let own_conflict = self.entities[idx]
            .substitute
            .as_deref()
            .is_some_and(|s| s != substitute);
        if conflict || own_conflict {
            return Err(MappingError::ConflictingSubstitute(id.to_string()));
        }
        if self.substitute_in_use(&substitute, &original, entity_type) {
            return Err(MappingError::SubstituteInUse(id.to_string()));
        }

        self.entities[idx].substitute = Some(substitute);
        Ok(())
    }

    /// Entities that have been given a substitute
    pub fn substituted(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.substitute.is_some())
    }

    fn check_substitute(entity: &Entity, substitute: &str) -> Result<(), MappingError> {
        if substitute.is_empty() || substitute == entity.original {
            return Err(MappingError::SubstituteEqualsOriginal(entity.id.clone()));
        }
        Ok(())
    }
}
