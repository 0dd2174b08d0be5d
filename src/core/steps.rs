//! Pure pieces of the scan and substitute steps
//!
//! Kept apart from the state machine so they can be tested without any
//! collaborators.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::compliance::mapping::{Entity, EntityType, MappingError, MappingStore, Span};
use crate::core::collaborators::{DetectedSpan, Faker};

/// Times the faker is asked before giving up on a candidate
pub const FAKER_RETRIES: usize = 3;

/// Accept detected spans into `store`.
///
/// Drops disabled types and empty values, re-locates spans whose offsets
/// do not point at their value, and resolves overlaps by keeping the
/// earlier (then longer) span. Returns the number of entities accepted.
pub fn accept_spans(
    run_id: u64,
    text: &str,
    spans: Vec<DetectedSpan>,
    enabled: &HashSet<EntityType>,
    store: &mut MappingStore,
) -> Result<usize, MappingError> {
    let mut candidates: Vec<DetectedSpan> = Vec::with_capacity(spans.len());
    let mut claimed: Vec<Span> = Vec::new();

    for detected in spans {
        if !enabled.contains(&detected.entity_type) {
            debug!("🙈 [Accept] Skipping disabled type {}", detected.entity_type);
            continue;
        }
        if detected.original.is_empty() {
            continue;
        }
        match locate(text, &detected, &claimed) {
            Some(span) => {
                claimed.push(span);
                candidates.push(DetectedSpan { span, ..detected });
            }
            None => warn!(
                "⚠️  [Accept] Dropping {} span that does not occur in the text",
                detected.entity_type
            ),
        }
    }

    candidates.sort_by(|a, b| {
        a.span
            .start
            .cmp(&b.span.start)
            .then(b.span.len().cmp(&a.span.len()))
    });

    let mut kept: Vec<Span> = Vec::new();
    let mut accepted = 0;
    for candidate in candidates {
        if kept.iter().any(|s| s.overlaps(&candidate.span)) {
            debug!("✂️  [Accept] Dropping overlapping span at {}", candidate.span.start);
            continue;
        }
        kept.push(candidate.span);
        let id = format!("pii-{}-{}", run_id, accepted + 1);
        store.put(Entity::new(
            id,
            candidate.entity_type,
            candidate.original,
            candidate.span,
        ))?;
        accepted += 1;
    }
    Ok(accepted)
}

/// Trust the reported span when it points at the value, otherwise fall
/// back to the first occurrence not already claimed.
fn locate(text: &str, detected: &DetectedSpan, claimed: &[Span]) -> Option<Span> {
    let span = detected.span;
    if span.end <= text.len()
        && span.start < span.end
        && !claimed.contains(&span)
        && text.get(span.start..span.end) == Some(detected.original.as_str())
    {
        return Some(span);
    }
    text.match_indices(detected.original.as_str())
        .map(|(start, value)| Span::new(start, start + value.len()))
        .find(|candidate| !claimed.contains(candidate))
}

/// Give every entity without a substitute one, reusing the substitute of
/// an identical `(original, type)` pair when there is one.
pub fn assign_substitutes(store: &mut MappingStore, faker: &dyn Faker) -> Result<usize, MappingError> {
    let pending: Vec<(String, EntityType, String)> = store
        .all()
        .iter()
        .filter(|e| e.substitute.is_none())
        .map(|e| (e.id.clone(), e.entity_type, e.original.clone()))
        .collect();

    let mut assigned = 0;
    for (id, entity_type, original) in pending {
        let substitute = match store.find_substitute(&original, entity_type) {
            Some(existing) => existing.to_string(),
            None => generate_distinct(store, faker, &id, entity_type, &original)?,
        };
        store.assign_substitute(&id, substitute)?;
        assigned += 1;
    }
    Ok(assigned)
}

/// Ask the faker for a substitute that is neither the original nor already
/// standing for another value. A faker that only ever echoes fails the run;
/// one that keeps colliding gets its last candidate numbered.
fn generate_distinct(
    store: &MappingStore,
    faker: &dyn Faker,
    id: &str,
    entity_type: EntityType,
    original: &str,
) -> Result<String, MappingError> {
    let mut taken = None;
    for _ in 0..FAKER_RETRIES {
        let candidate = faker.generate(entity_type, original);
        if candidate.is_empty() || candidate == original {
            continue;
        }
        if store.substitute_in_use(&candidate, original, entity_type) {
            debug!("🔁 [Substitute] {} already stands for another value, asking again", id);
            taken = Some(candidate);
            continue;
        }
        return Ok(candidate);
    }

    let Some(base) = taken else {
        return Err(MappingError::SubstituteEqualsOriginal(id.to_string()));
    };
    (2..store.len() * 2 + 3)
        .map(|n| format!("{} {}", base, n))
        .find(|candidate| candidate != original && !store.substitute_in_use(candidate, original, entity_type))
        .ok_or_else(|| MappingError::SubstituteInUse(id.to_string()))
}

/// Rewrite `text` with every entity span replaced by its substitute.
/// Spans are applied from the end so earlier offsets stay valid.
pub fn apply_substitutions(text: &str, store: &MappingStore) -> String {
    let mut entities: Vec<&Entity> = store.substituted().collect();
    entities.sort_by(|a, b| b.span.start.cmp(&a.span.start));

    let mut out = text.to_string();
    for entity in entities {
        let Span { start, end } = entity.span;
        if out.get(start..end) != Some(entity.original.as_str()) {
            warn!("⚠️  [Substitute] Span of {} no longer matches, skipping", entity.id);
            continue;
        }
        if let Some(sub) = entity.substitute.as_deref() {
            out.replace_range(start..end, sub);
        }
    }
    out
}
