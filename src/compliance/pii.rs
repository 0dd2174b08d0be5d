//! Regex PII detection
//!
//! Fallback `Detector` used when no detection backend is wired in:
//! - Email addresses, phone numbers
//! - Government and card numbers, API keys, IP addresses
//! - Street addresses, postal codes, coordinates (location strategy)
//! - Dates of birth, account numbers (numeric strategy)

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::compliance::classifier::DetectionStrategy;
use crate::compliance::mapping::EntityType;
use crate::core::collaborators::{DetectedSpan, Detector};
use crate::core::error::DetectorError;

/// PII pattern definitions
static EMAIL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").ok());

static PHONE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:\+\d{1,3}[-.\s]?)?\(?\b\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").ok());

static SSN_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").ok());

static CREDIT_CARD_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b").ok());

static API_KEY_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\bsk-[a-zA-Z0-9]{20,}\b").ok());

static IP_ADDRESS_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").ok());

static ADDRESS_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d{1,5}\s(?:[A-Za-z0-9#\s]+)\s(?:Street|St|Avenue|Ave|Road|Rd|Highway|Hwy|Square|Sq|Trail|Trl|Drive|Dr|Court|Ct|Parkway|Pkwy|Circle|Cir|Boulevard|Blvd|Lane|Ln)\b").ok()
});

static POSTAL_CODE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b\d{5}(?:-\d{4})?\b").ok());

static GPS_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"-?\b\d{1,3}\.\d{4,},\s*-?\d{1,3}\.\d{4,}\b").ok());

static DOB_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{1,2}[/-]\d{1,2}[/-]\d{2,4}|\d{4}[/-]\d{1,2}[/-]\d{1,2})\b").ok()
});

static BANK_ACCOUNT_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b\d{8,17}\b").ok());

/// Which strategies switch a pattern on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Always,
    Location,
    Numeric,
}

impl Tier {
    fn enabled_for(self, strategy: DetectionStrategy) -> bool {
        match self {
            Tier::Always => true,
            Tier::Location => strategy == DetectionStrategy::LocationSpecialist,
            Tier::Numeric => strategy == DetectionStrategy::NumericSpecialist,
        }
    }
}

struct PatternRule {
    name: &'static str,
    entity_type: EntityType,
    tier: Tier,
    pattern: &'static LazyLock<Option<Regex>>,
}

static RULES: [PatternRule; 10] = [
    PatternRule { name: "email", entity_type: EntityType::Email, tier: Tier::Always, pattern: &EMAIL_PATTERN },
    PatternRule { name: "ssn", entity_type: EntityType::Other, tier: Tier::Always, pattern: &SSN_PATTERN },
    PatternRule { name: "credit card", entity_type: EntityType::Other, tier: Tier::Always, pattern: &CREDIT_CARD_PATTERN },
    PatternRule { name: "phone", entity_type: EntityType::Phone, tier: Tier::Always, pattern: &PHONE_PATTERN },
    PatternRule { name: "api key", entity_type: EntityType::Other, tier: Tier::Always, pattern: &API_KEY_PATTERN },
    PatternRule { name: "ip address", entity_type: EntityType::Other, tier: Tier::Always, pattern: &IP_ADDRESS_PATTERN },
    PatternRule { name: "street address", entity_type: EntityType::Location, tier: Tier::Location, pattern: &ADDRESS_PATTERN },
    PatternRule { name: "postal code", entity_type: EntityType::Location, tier: Tier::Location, pattern: &POSTAL_CODE_PATTERN },
    PatternRule { name: "coordinates", entity_type: EntityType::Location, tier: Tier::Location, pattern: &GPS_PATTERN },
    PatternRule { name: "date of birth", entity_type: EntityType::Other, tier: Tier::Numeric, pattern: &DOB_PATTERN },
];

// Account numbers overlap almost every other numeric pattern, so they run last
static ACCOUNT_RULE: PatternRule = PatternRule {
    name: "account number",
    entity_type: EntityType::Other,
    tier: Tier::Numeric,
    pattern: &BANK_ACCOUNT_PATTERN,
};

/// Regex-only detector
#[derive(Debug, Clone, Default)]
pub struct PatternDetector;

impl PatternDetector {
    pub fn new() -> Self {
        PatternDetector
    }

    /// Detect all PII in text. Spans come back ordered by start offset and
    /// may overlap; the accept step resolves overlaps.
    pub fn scan(&self, text: &str, strategy: DetectionStrategy) -> Vec<DetectedSpan> {
        let mut spans = Vec::new();
        for rule in RULES.iter().chain(std::iter::once(&ACCOUNT_RULE)) {
            if !rule.tier.enabled_for(strategy) {
                continue;
            }
            let Some(pattern) = rule.pattern.as_ref() else {
                continue;
            };
            let before = spans.len();
            spans.extend(
                pattern
                    .find_iter(text)
                    .map(|m| DetectedSpan::new(rule.entity_type, m.as_str(), m.start(), m.end())),
            );
            if spans.len() > before {
                debug!("🔍 [PatternDetector] {} x{}", rule.name, spans.len() - before);
            }
        }
        spans.sort_by_key(|s| (s.span.start, std::cmp::Reverse(s.span.end)));
        spans
    }

    /// Check if text is clean (no PII)
    pub fn is_clean(&self, text: &str, strategy: DetectionStrategy) -> bool {
        self.scan(text, strategy).is_empty()
    }
}

#[async_trait]
impl Detector for PatternDetector {
    async fn detect(
        &self,
        text: &str,
        strategy: DetectionStrategy,
    ) -> Result<Vec<DetectedSpan>, DetectorError> {
        Ok(self.scan(text, strategy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(spans: &[DetectedSpan]) -> Vec<EntityType> {
        spans.iter().map(|s| s.entity_type).collect()
    }

    #[test]
    fn finds_contact_details_for_any_strategy() {
        let text = "Mail jo@ex.com or call 555-123-4567";
        let spans = PatternDetector::new().scan(text, DetectionStrategy::GeneralPurpose);
        assert_eq!(types(&spans), vec![EntityType::Email, EntityType::Phone]);
        assert_eq!(spans[0].original, "jo@ex.com");
        assert_eq!(&text[spans[1].span.start..spans[1].span.end], "555-123-4567");
    }

    #[test]
    fn addresses_need_the_location_strategy() {
        let text = "I live at 42 Elm Street these days";
        let detector = PatternDetector::new();
        assert!(detector.is_clean(text, DetectionStrategy::GeneralPurpose));

        let spans = detector.scan(text, DetectionStrategy::LocationSpecialist);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].entity_type, EntityType::Location);
        assert_eq!(spans[0].original, "42 Elm Street");
    }

    #[test]
    fn dates_need_the_numeric_strategy() {
        let text = "born 04/12/1990, account 12345678901";
        let detector = PatternDetector::new();
        assert!(detector.is_clean(text, DetectionStrategy::CitySpecialist));

        let spans = detector.scan(text, DetectionStrategy::NumericSpecialist);
        let originals: Vec<&str> = spans.iter().map(|s| s.original.as_str()).collect();
        assert_eq!(originals, vec!["04/12/1990", "12345678901"]);
    }

    #[tokio::test]
    async fn detector_trait_never_fails() {
        let spans = PatternDetector::new()
            .detect("server at 10.0.0.12", DetectionStrategy::GeneralPurpose)
            .await
            .unwrap();
        assert_eq!(spans[0].original, "10.0.0.12");
    }
}
