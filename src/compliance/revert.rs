//! Revert engine
//!
//! Locates substitutes inside rendered response text and restores the
//! original values. Matching is literal for most entity types; locations
//! are matched loosely through their component tokens because chat
//! surfaces tend to reorder or abbreviate multi-part addresses.
//!
//! The engine never fails. Whatever it cannot restore is reported back as
//! `unresolved` so the caller can finish the job by hand.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Range;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::mapping::{Entity, EntityType, MappingStore};
use crate::core::config::RevertConfig;

/// Where a piece of rendered text lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentScope {
    /// Inside a known response container
    ResponseContainer,
    /// Anywhere else on the page
    Page,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedSegment {
    pub text: String,
    pub scope: SegmentScope,
}

impl RenderedSegment {
    pub fn container(text: impl Into<String>) -> Self {
        RenderedSegment {
            text: text.into(),
            scope: SegmentScope::ResponseContainer,
        }
    }

    pub fn page(text: impl Into<String>) -> Self {
        RenderedSegment {
            text: text.into(),
            scope: SegmentScope::Page,
        }
    }
}

/// Rendered text split into the fragments the surface displays
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedDocument {
    pub segments: Vec<RenderedSegment>,
}

impl RenderedDocument {
    pub fn new(segments: Vec<RenderedSegment>) -> Self {
        RenderedDocument { segments }
    }

    /// A single response container holding `text`
    pub fn from_response(text: impl Into<String>) -> Self {
        RenderedDocument {
            segments: vec![RenderedSegment::container(text)],
        }
    }

    /// Contiguous text of every segment visible to `scope`
    pub fn text_in(&self, scope: RevertScope) -> String {
        self.segments
            .iter()
            .filter(|s| scope.covers(s.scope))
            .map(|s| s.text.as_str())
            .collect()
    }
}

/// How much of the document an attempt may rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevertScope {
    /// Response containers only
    Containers,
    /// Every segment, ignoring container boundaries
    Document,
}

impl RevertScope {
    fn covers(&self, scope: SegmentScope) -> bool {
        match self {
            RevertScope::Containers => scope == SegmentScope::ResponseContainer,
            RevertScope::Document => true,
        }
    }
}

/// Source and sink of rendered response text
pub trait RevertTarget: Send + Sync {
    fn rendered_document(&self) -> RenderedDocument;
    fn commit_document(&self, document: &RenderedDocument);
}

/// Result of one pure revert pass over a text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertOutcome {
    pub text: String,
    /// Entities for which at least one occurrence was restored
    pub restored_count: usize,
    /// Entities whose substitute is still detectable
    pub unresolved: Vec<Entity>,
}

/// Observable record of one engine attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub scope: RevertScope,
    pub aggressive: bool,
    /// Entities restored during this attempt
    pub restored: usize,
    /// Entities no longer detectable after this attempt
    pub resolved: usize,
}

/// Final outcome of the retrying engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertReport {
    pub attempts: Vec<AttemptRecord>,
    pub restored_count: usize,
    pub unresolved: Vec<Entity>,
    /// Response container text after the last attempt
    pub text: String,
}

/// Restore originals in `text` with the default component length.
pub fn revert(text: &str, mappings: &MappingStore) -> RevertOutcome {
    revert_with(text, mappings, true, RevertConfig::default().min_component_len)
}

/// Restore originals in `text`.
///
/// Runs the literal pass for every substituted entity and, when
/// `aggressive` is set, the component pass for locations that are still
/// detectable afterwards.
pub fn revert_with(
    text: &str,
    mappings: &MappingStore,
    aggressive: bool,
    min_component_len: usize,
) -> RevertOutcome {
    let entities: Vec<&Entity> = mappings.substituted().collect();
    let (current, restored) = restore_all(text, &entities, aggressive, min_component_len);
    let unresolved = still_detectable(&entities, &current, min_component_len);

    RevertOutcome {
        text: current,
        restored_count: restored.len(),
        unresolved,
    }
}

/// Whether an entity's substitute can still be found in `text`.
///
/// Locations count as present when any of their distinctive component
/// tokens appears, case-insensitively.
pub fn is_detectable(entity: &Entity, text: &str, min_component_len: usize) -> bool {
    let guards = restored_ranges(&[entity], text, min_component_len);
    detectable(entity, text, &guards, min_component_len)
}

fn detectable(entity: &Entity, text: &str, guards: &[Range<usize>], min_len: usize) -> bool {
    let Some(substitute) = entity.substitute.as_deref() else {
        return false;
    };
    if let Some(literal) = literal_regex(substitute, false) {
        if literal.find_iter(text).any(|m| !is_guarded(guards, m.range())) {
            return true;
        }
    }

    if entity.entity_type != EntityType::Location {
        return false;
    }
    distinctive_components(entity, min_len)
        .iter()
        .filter_map(|token| literal_regex(token, true))
        .any(|re| re.find_iter(text).any(|m| !is_guarded(guards, m.range())))
}

/// Entities whose substitute survives in `text`, ignoring hits inside any
/// restored original
fn still_detectable(entities: &[&Entity], text: &str, min_len: usize) -> Vec<Entity> {
    let guards = restored_ranges(entities, text, min_len);
    entities
        .iter()
        .filter(|e| detectable(e, text, &guards, min_len))
        .map(|e| (*e).clone())
        .collect()
}

/// Component tokens of a multi-part value (split on whitespace, commas
/// and slashes), keeping tokens of at least `min_len` characters.
pub fn components(value: &str, min_len: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    value
        .split(|c: char| c.is_whitespace() || c == ',' || c == '/')
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| t.chars().count() >= min_len)
        .filter(|t| seen.insert(t.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Substitute components that do not also occur in the original
fn distinctive_components(entity: &Entity, min_len: usize) -> Vec<String> {
    let Some(substitute) = entity.substitute.as_deref() else {
        return Vec::new();
    };
    let original: HashSet<String> = components(&entity.original, min_len)
        .into_iter()
        .map(|t| t.to_lowercase())
        .collect();
    components(substitute, min_len)
        .into_iter()
        .filter(|t| !original.contains(&t.to_lowercase()))
        .collect()
}

/// A pending rewrite of `range` on behalf of entity `id`
struct Rewrite<'a> {
    range: Range<usize>,
    replacement: String,
    id: &'a str,
}

/// Literal pass then, if asked, component pass. Each pass picks its
/// matches on the text as it was before the pass, so restored text is
/// never matched again within the pass.
fn restore_all(
    text: &str,
    entities: &[&Entity],
    aggressive: bool,
    min_len: usize,
) -> (String, HashSet<String>) {
    let guards = restored_ranges(entities, text, min_len);
    let (mut current, mut restored) = apply_rewrites(text, literal_rewrites(text, entities), &guards);

    if aggressive {
        let guards = restored_ranges(entities, &current, min_len);
        let pending: Vec<&Entity> = entities
            .iter()
            .copied()
            .filter(|e| e.entity_type == EntityType::Location && detectable(e, &current, &guards, min_len))
            .collect();
        let rewrites = component_rewrites(&current, &pending, min_len);
        if !rewrites.is_empty() {
            let (next, ids) = apply_rewrites(&current, rewrites, &guards);
            if !ids.is_empty() {
                debug!("🧩 [Revert] Component pass restored {} location(s)", ids.len());
            }
            current = next;
            restored.extend(ids);
        }
    }
    (current, restored)
}

fn literal_rewrites<'a>(text: &str, entities: &[&'a Entity]) -> Vec<Rewrite<'a>> {
    let mut rewrites = Vec::new();
    for &entity in entities {
        let Some(literal) = entity.substitute.as_deref().and_then(|s| literal_regex(s, false)) else {
            continue;
        };
        rewrites.extend(literal.find_iter(text).map(|m| Rewrite {
            range: m.range(),
            replacement: entity.original.clone(),
            id: entity.id.as_str(),
        }));
    }
    rewrites
}

/// Each distinctive substitute component maps to the original component
/// in the same position, counting from the end.
fn component_rewrites<'a>(text: &str, locations: &[&'a Entity], min_len: usize) -> Vec<Rewrite<'a>> {
    let mut rewrites = Vec::new();
    for &entity in locations {
        let tokens = distinctive_components(entity, min_len);
        let originals = components(&entity.original, min_len);
        for (i, token) in tokens.iter().enumerate() {
            let Some(re) = literal_regex(token, true) else {
                continue;
            };
            let replacement = aligned_component(&originals, tokens.len(), i).unwrap_or(entity.original.as_str());
            rewrites.extend(re.find_iter(text).map(|m| Rewrite {
                range: m.range(),
                replacement: replacement.to_string(),
                id: entity.id.as_str(),
            }));
        }
    }
    rewrites
}

fn aligned_component(originals: &[String], token_count: usize, index: usize) -> Option<&str> {
    if originals.is_empty() {
        return None;
    }
    let offset = index as isize + originals.len() as isize - token_count as isize;
    let idx = offset.clamp(0, originals.len() as isize - 1) as usize;
    originals.get(idx).map(String::as_str)
}

/// Apply non-overlapping, unguarded rewrites. Earlier matches win, and of
/// two matches starting together the longer one wins.
fn apply_rewrites(
    text: &str,
    mut rewrites: Vec<Rewrite<'_>>,
    guards: &[Range<usize>],
) -> (String, HashSet<String>) {
    rewrites.sort_by(|a, b| {
        a.range
            .start
            .cmp(&b.range.start)
            .then(b.range.end.cmp(&a.range.end))
    });

    let mut out = String::with_capacity(text.len());
    let mut restored = HashSet::new();
    let mut last = 0;
    for rewrite in rewrites {
        if rewrite.range.start < last || is_guarded(guards, rewrite.range.clone()) {
            continue;
        }
        out.push_str(&text[last..rewrite.range.start]);
        out.push_str(&rewrite.replacement);
        last = rewrite.range.end;
        restored.insert(rewrite.id.to_string());
    }
    out.push_str(&text[last..]);
    (out, restored)
}

/// Byte ranges of `text` that hold restored values and must not be
/// rewritten: every occurrence of any entity's original, plus the original
/// components of locations.
fn restored_ranges(entities: &[&Entity], text: &str, min_len: usize) -> Vec<Range<usize>> {
    let mut guards = Vec::new();
    for entity in entities {
        if let Some(re) = literal_regex(&entity.original, false) {
            guards.extend(re.find_iter(text).map(|m| m.range()));
        }
        if entity.entity_type == EntityType::Location {
            for token in components(&entity.original, min_len) {
                if let Some(re) = literal_regex(&token, true) {
                    guards.extend(re.find_iter(text).map(|m| m.range()));
                }
            }
        }
    }
    guards
}

fn is_guarded(guards: &[Range<usize>], hit: Range<usize>) -> bool {
    guards.iter().any(|g| g.start <= hit.start && hit.end <= g.end)
}

/// Regex matching `needle` literally
fn literal_regex(needle: &str, case_insensitive: bool) -> Option<Regex> {
    if needle.is_empty() {
        return None;
    }
    let escaped = regex::escape(needle);
    let pattern = if case_insensitive {
        format!("(?i){}", escaped)
    } else {
        escaped
    };
    Regex::new(&pattern).ok()
}

/// Restore substitutes split across the boundary of two adjacent in-scope
/// segments. The original lands in the left segment.
fn stitch_fragments(
    segments: &mut [RenderedSegment],
    scope: RevertScope,
    entity: &Entity,
    entities: &[&Entity],
    min_len: usize,
) -> usize {
    let Some(substitute) = entity.substitute.as_deref() else {
        return 0;
    };
    let mut stitched = 0;

    for i in 0..segments.len().saturating_sub(1) {
        if !(scope.covers(segments[i].scope) && scope.covers(segments[i + 1].scope)) {
            continue;
        }
        // Each stitch removes one boundary-crossing occurrence; bounded anyway
        for _ in 0..8 {
            let left_len = segments[i].text.len();
            let joined = format!("{}{}", segments[i].text, segments[i + 1].text);
            let guards = restored_ranges(entities, &joined, min_len);
            let hit = joined.match_indices(substitute).find(|(start, _)| {
                *start < left_len
                    && start + substitute.len() > left_len
                    && !is_guarded(&guards, *start..start + substitute.len())
            });
            let Some((start, _)) = hit else {
                break;
            };
            let end = start + substitute.len();
            segments[i].text = format!("{}{}", &joined[..start], entity.original);
            segments[i + 1].text = joined[end..].to_string();
            stitched += 1;
        }
    }
    stitched
}

/// Tracks when the engine should stop trusting container boundaries
struct Escalation {
    stall_after: u32,
    scope: RevertScope,
    previous_resolved: Option<usize>,
}

impl Escalation {
    fn new(stall_after: u32) -> Self {
        Escalation {
            stall_after,
            scope: RevertScope::Containers,
            previous_resolved: None,
        }
    }

    fn record(&mut self, attempt: u32, resolved: usize) {
        if self.scope == RevertScope::Containers
            && attempt >= self.stall_after
            && self.previous_resolved == Some(resolved)
        {
            info!(
                "📄 [Revert] Stalled at {} resolved after attempt {}, switching to document-wide scan",
                resolved, attempt
            );
            self.scope = RevertScope::Document;
        }
        self.previous_resolved = Some(resolved);
    }
}

/// Retrying revert engine with escalating scope
pub struct RevertEngine {
    config: RevertConfig,
}

impl RevertEngine {
    pub fn new(config: RevertConfig) -> Self {
        RevertEngine { config }
    }

    /// Run one attempt over `document`, rewriting only segments inside
    /// `scope`. Returns the ids of the entities restored.
    pub fn attempt(
        &self,
        document: &mut RenderedDocument,
        mappings: &MappingStore,
        scope: RevertScope,
        aggressive: bool,
    ) -> HashSet<String> {
        let min_len = self.config.min_component_len;
        let entities: Vec<&Entity> = mappings.substituted().collect();
        let mut restored = HashSet::new();

        // Longer substitutes first so a short one never claims part of a longer one
        let mut by_length = entities.clone();
        by_length.sort_by_key(|e| std::cmp::Reverse(e.substitute.as_deref().map_or(0, str::len)));
        for entity in by_length {
            if stitch_fragments(&mut document.segments, scope, entity, &entities, min_len) > 0 {
                restored.insert(entity.id.clone());
            }
        }

        for segment in document.segments.iter_mut() {
            if !scope.covers(segment.scope) {
                continue;
            }
            let (text, ids) = restore_all(&segment.text, &entities, aggressive, min_len);
            segment.text = text;
            restored.extend(ids);
        }
        restored
    }

    /// Entities whose substitute is detectable anywhere in `document`
    pub fn unresolved_in(&self, document: &RenderedDocument, mappings: &MappingStore) -> Vec<Entity> {
        let visible = document.text_in(RevertScope::Document);
        let entities: Vec<&Entity> = mappings.substituted().collect();
        still_detectable(&entities, &visible, self.config.min_component_len)
    }

    /// Revert against a live target, retrying while substitutes remain.
    pub async fn run(&self, target: &dyn RevertTarget, mappings: &MappingStore) -> RevertReport {
        let total = mappings.substituted().count();
        let aggressive = mappings
            .substituted()
            .any(|e| e.entity_type == EntityType::Location);
        let max_attempts = self.config.max_attempts.max(1);
        let interval = Duration::from_millis(self.config.attempt_interval_ms);

        let mut escalation = Escalation::new(self.config.stall_after_attempts);
        let mut restored_ids = HashSet::new();
        let mut attempts = Vec::new();
        let mut unresolved = Vec::new();
        let mut document = target.rendered_document();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(interval).await;
                document = target.rendered_document();
            }

            let scope = escalation.scope;
            let before = document.clone();
            let restored = self.attempt(&mut document, mappings, scope, aggressive);
            if document != before {
                target.commit_document(&document);
                document = target.rendered_document();
            }
            let remaining = self.unresolved_in(&document, mappings);

            let resolved = total.saturating_sub(remaining.len());
            info!(
                "🔁 [Revert] Attempt {}/{} ({:?}, aggressive={}): restored {}, resolved {}/{}",
                attempt,
                max_attempts,
                scope,
                aggressive,
                restored.len(),
                resolved,
                total
            );
            attempts.push(AttemptRecord {
                attempt,
                scope,
                aggressive,
                restored: restored.len(),
                resolved,
            });
            restored_ids.extend(restored);
            unresolved = remaining;

            if unresolved.is_empty() {
                break;
            }
            escalation.record(attempt, resolved);
        }

        if !unresolved.is_empty() {
            warn!(
                "⚠️  [Revert] {} of {} entities still carry substitutes",
                unresolved.len(),
                total
            );
        }

        RevertReport {
            attempts,
            restored_count: restored_ids.len(),
            unresolved,
            text: document.text_in(RevertScope::Containers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::mapping::Span;
    use parking_lot::Mutex;

    fn store(entities: Vec<Entity>) -> MappingStore {
        let mut store = MappingStore::new();
        for e in entities {
            store.put(e).unwrap();
        }
        store
    }

    fn entity(id: &str, ty: EntityType, original: &str, substitute: &str) -> Entity {
        Entity::new(id, ty, original, Span::new(0, original.len())).with_substitute(substitute)
    }

    fn fast_config() -> RevertConfig {
        RevertConfig {
            attempt_interval_ms: 1,
            ..RevertConfig::default()
        }
    }

    struct StaticTarget {
        document: Mutex<RenderedDocument>,
        commits: Mutex<usize>,
    }

    impl StaticTarget {
        fn new(document: RenderedDocument) -> Self {
            StaticTarget {
                document: Mutex::new(document),
                commits: Mutex::new(0),
            }
        }
    }

    impl RevertTarget for StaticTarget {
        fn rendered_document(&self) -> RenderedDocument {
            self.document.lock().clone()
        }

        fn commit_document(&self, document: &RenderedDocument) {
            *self.document.lock() = document.clone();
            *self.commits.lock() += 1;
        }
    }

    #[test]
    fn literal_replacement_is_case_sensitive_and_global() {
        let m = store(vec![entity("p1", EntityType::Person, "Alice", "Carol")]);
        let out = revert("Carol said hi. Carol left. carol stayed.", &m);
        assert_eq!(out.text, "Alice said hi. Alice left. carol stayed.");
        assert_eq!(out.restored_count, 1);
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn location_resolved_by_component_token() {
        let m = store(vec![entity(
            "l1",
            EntityType::Location,
            "123 Main St, Springfield",
            "45 Oak Ave, Rivertown",
        )]);
        let text = "...near Rivertown, you'll find...";
        let loc = m.get("l1").unwrap();
        assert!(is_detectable(loc, text, 4));

        let out = revert(text, &m);
        assert_eq!(out.restored_count, 1);
        assert!(out.unresolved.is_empty());
        assert_eq!(out.text, "...near Springfield, you'll find...");
    }

    #[test]
    fn location_component_match_ignores_case() {
        let m = store(vec![entity(
            "l1",
            EntityType::Location,
            "Springfield",
            "Rivertown, Norland",
        )]);
        assert!(is_detectable(m.get("l1").unwrap(), "off to RIVERTOWN today", 4));
        // Without the aggressive pass the location stays unresolved
        let out = revert_with("off to RIVERTOWN today", &m, false, 4);
        assert_eq!(out.restored_count, 0);
        assert_eq!(out.unresolved.len(), 1);
    }

    #[test]
    fn revert_is_idempotent() {
        let m = store(vec![
            entity("p1", EntityType::Person, "Annabel", "Anna"),
            entity("l1", EntityType::Location, "123 Main St, Springfield", "45 Oak Ave, Rivertown"),
            entity("e1", EntityType::Email, "a@x.io", "b@y.io"),
        ]);
        let text = "Anna and Annabel wrote from 45 Oak Ave, Rivertown via b@y.io; Rivertown is nice";
        let first = revert(text, &m);
        assert_eq!(first.restored_count, 3);
        assert!(first.unresolved.is_empty());
        assert!(first.text.starts_with("Annabel and Annabel wrote from 123 Main St, Springfield via a@x.io"));

        let second = revert(&first.text, &m);
        assert_eq!(second.restored_count, 0);
        assert_eq!(second.text, first.text);
        assert!(second.unresolved.is_empty());
    }

    #[test]
    fn restored_values_are_never_rewritten_by_other_entities() {
        let m = store(vec![
            entity("p1", EntityType::Person, "Johnson", "Miller"),
            entity("p2", EntityType::Person, "Tom", "John"),
        ]);
        let first = revert("Miller and John", &m);
        assert_eq!(first.text, "Johnson and Tom");
        assert_eq!(first.restored_count, 2);
        assert!(first.unresolved.is_empty());
        let second = revert(&first.text, &m);
        assert_eq!(second.restored_count, 0);
        assert_eq!(second.text, first.text);

        // A substitute that sits inside another entity's original
        let m = store(vec![
            entity("p1", EntityType::Person, "Johnson Smith", "Al"),
            entity("p2", EntityType::Person, "Tom", "Johnson"),
        ]);
        let first = revert("Al and Johnson", &m);
        assert_eq!(first.text, "Johnson Smith and Tom");
        let second = revert(&first.text, &m);
        assert_eq!(second.restored_count, 0);
        assert_eq!(second.text, "Johnson Smith and Tom");
        assert!(second.unresolved.is_empty());
    }

    #[test]
    fn numbered_substitutes_are_restored_whole() {
        let m = store(vec![
            entity("p1", EntityType::Person, "Alice", "Zed"),
            entity("p2", EntityType::Person, "Cy", "Zed 2"),
        ]);
        let out = revert("Zed 2 and Zed", &m);
        assert_eq!(out.text, "Cy and Alice");
        assert_eq!(out.restored_count, 2);
    }

    #[test]
    fn substitutes_are_literal_not_patterns() {
        let m = store(vec![entity("o1", EntityType::Other, "ID-1", "a.b+c (x)")]);
        let out = revert("value a.b+c (x) and aXb+c (x)", &m);
        assert_eq!(out.text, "value ID-1 and aXb+c (x)");

        let m = store(vec![entity("o2", EntityType::Other, "$1 total", "$2 sum")]);
        assert_eq!(revert("it is $2 sum", &m).text, "it is $1 total");
    }

    #[test]
    fn longer_substitutes_win() {
        let m = store(vec![
            entity("p1", EntityType::Person, "Bo", "Ann"),
            entity("p2", EntityType::Person, "Eve Stone", "Ann Lee"),
        ]);
        let out = revert("Ann Lee met Ann", &m);
        assert_eq!(out.text, "Eve Stone met Bo");
        assert_eq!(out.restored_count, 2);
    }

    #[test]
    fn components_split_and_filter() {
        assert_eq!(
            components("45 Oak Ave, Rivertown/North Shire", 4),
            vec!["Rivertown", "North", "Shire"]
        );
        assert!(components("Oak St", 4).is_empty());
    }

    #[test]
    fn shared_components_are_not_evidence() {
        let m = store(vec![entity(
            "l1",
            EntityType::Location,
            "12 Baker Street, London",
            "80 Elm Street, Leeds",
        )]);
        let loc = m.get("l1").unwrap();
        assert!(!is_detectable(loc, "the Street is busy", 4));
        assert!(is_detectable(loc, "in leeds", 4));
    }

    #[test]
    fn stitches_split_fragments() {
        let m = store(vec![entity("p1", EntityType::Person, "Alice", "Carol")]);
        let engine = RevertEngine::new(fast_config());
        let mut doc = RenderedDocument::new(vec![
            RenderedSegment::container("Dear Car"),
            RenderedSegment::container("ol, thanks"),
        ]);
        let restored = engine.attempt(&mut doc, &m, RevertScope::Containers, false);
        assert!(restored.contains("p1"));
        assert!(engine.unresolved_in(&doc, &m).is_empty());
        assert_eq!(doc.text_in(RevertScope::Containers), "Dear Alice, thanks");
    }

    #[tokio::test]
    async fn stops_after_first_clean_attempt() {
        let m = store(vec![entity("p1", EntityType::Person, "Alice", "Carol")]);
        let target = StaticTarget::new(RenderedDocument::from_response("Hi Carol"));
        let report = RevertEngine::new(fast_config()).run(&target, &m).await;

        assert_eq!(report.attempts.len(), 1);
        assert_eq!(report.restored_count, 1);
        assert!(report.unresolved.is_empty());
        assert_eq!(report.text, "Hi Alice");
        assert_eq!(*target.commits.lock(), 1);
    }

    #[tokio::test]
    async fn escalates_to_document_scope_when_stalled() {
        let m = store(vec![entity("p1", EntityType::Person, "Alice", "Carol")]);
        let target = StaticTarget::new(RenderedDocument::new(vec![
            RenderedSegment::container("Sure, here is the letter."),
            RenderedSegment::page("To: Carol"),
        ]));
        let report = RevertEngine::new(fast_config()).run(&target, &m).await;

        let scopes: Vec<RevertScope> = report.attempts.iter().map(|a| a.scope).collect();
        assert_eq!(
            scopes,
            vec![RevertScope::Containers, RevertScope::Containers, RevertScope::Document]
        );
        assert_eq!(report.attempts[0].resolved, 0);
        assert_eq!(report.attempts[1].resolved, 0);
        assert_eq!(report.attempts[2].resolved, 1);
        assert!(report.unresolved.is_empty());
        assert_eq!(target.rendered_document().segments[1].text, "To: Alice");
        assert_eq!(report.restored_count, 1);
    }

    #[tokio::test]
    async fn reports_unresolved_after_max_attempts() {
        let m = store(vec![entity(
            "l1",
            EntityType::Location,
            "Springfield",
            "Rivertown",
        )]);
        // The target ignores commits, so the substitute never goes away
        struct Stubborn;
        impl RevertTarget for Stubborn {
            fn rendered_document(&self) -> RenderedDocument {
                RenderedDocument::from_response("see you in Rivertown")
            }
            fn commit_document(&self, _document: &RenderedDocument) {}
        }
        let report = RevertEngine::new(fast_config()).run(&Stubborn, &m).await;

        assert_eq!(report.attempts.len(), 5);
        assert!(report.attempts.iter().all(|a| a.aggressive));
        assert_eq!(report.attempts[2].scope, RevertScope::Document);
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.unresolved[0].id, "l1");
    }
}
