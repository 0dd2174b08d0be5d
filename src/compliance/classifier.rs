//! Rule-based detection strategy classifier
//!
//! Inspects a text sample and picks the detection model best suited to it.
//! Signal groups are evaluated in a fixed order and the first group with a
//! matching signal wins; later groups are never consulted.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Rationale returned for empty input
pub const NO_INPUT_RATIONALE: &str = "No prompt provided (no input)";
/// Rationale returned when no signal group matches
pub const DEFAULT_RATIONALE: &str = "balanced prompt";

/// Detection model a run should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionStrategy {
    LocationSpecialist,
    NumericSpecialist,
    CitySpecialist,
    BroadWesternSpecialist,
    GeneralPurpose,
}

impl DetectionStrategy {
    pub const ALL: [DetectionStrategy; 5] = [
        DetectionStrategy::LocationSpecialist,
        DetectionStrategy::NumericSpecialist,
        DetectionStrategy::CitySpecialist,
        DetectionStrategy::BroadWesternSpecialist,
        DetectionStrategy::GeneralPurpose,
    ];

    /// Stable key understood by the detection backend
    pub fn model_key(&self) -> &'static str {
        match self {
            DetectionStrategy::LocationSpecialist => "location-specialist",
            DetectionStrategy::NumericSpecialist => "numeric-specialist",
            DetectionStrategy::CitySpecialist => "city-specialist",
            DetectionStrategy::BroadWesternSpecialist => "broad-western-specialist",
            DetectionStrategy::GeneralPurpose => "general-purpose",
        }
    }
}

impl fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_key())
    }
}

impl FromStr for DetectionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DetectionStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.model_key() == s)
            .ok_or_else(|| format!("unknown detection strategy: {}", s))
    }
}

/// Strategy picked for a text, with the reason it was picked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub strategy: DetectionStrategy,
    pub rationale: String,
}

/// How a run picks its detection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", content = "strategy", rename_all = "snake_case")]
pub enum SelectionMode {
    /// Classify the outbound text
    #[default]
    Automatic,
    /// Always use the strategy the user picked
    Manual(DetectionStrategy),
}

impl SelectionMode {
    pub fn resolve(&self, text: &str) -> ClassificationResult {
        match self {
            SelectionMode::Automatic => classify(text),
            SelectionMode::Manual(strategy) => ClassificationResult {
                strategy: *strategy,
                rationale: format!("Manual selection: {}", strategy.model_key()),
            },
        }
    }
}

/// A single predicate inside a signal group
pub enum Signal {
    /// Regex must match somewhere in the text
    Pattern(Option<Regex>),
    /// Regex must match at least `min` times (non-overlapping)
    PatternCount { regex: Option<Regex>, min: usize },
    /// Digit characters per letter character must exceed the threshold
    DigitRatioAbove(f64),
    /// At least `min` capitalized words and at least one comma
    CapitalizedWordsWithComma { min: usize },
}

impl Signal {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Signal::Pattern(regex) => regex.as_ref().is_some_and(|r| r.is_match(text)),
            Signal::PatternCount { regex, min } => regex
                .as_ref()
                .is_some_and(|r| r.find_iter(text).count() >= *min),
            Signal::DigitRatioAbove(threshold) => digit_ratio(text) > *threshold,
            Signal::CapitalizedWordsWithComma { min } => {
                text.contains(',')
                    && CAPITALIZED_WORD
                        .as_ref()
                        .is_some_and(|r| r.find_iter(text).count() >= *min)
            }
        }
    }
}

/// Ordered group of signals mapped to one strategy
pub struct SignalGroup {
    pub strategy: DetectionStrategy,
    pub label: &'static str,
    pub signals: Vec<(&'static str, Signal)>,
}

impl SignalGroup {
    /// Name of the first signal in this group that fires
    pub fn first_match(&self, text: &str) -> Option<&'static str> {
        self.signals
            .iter()
            .find(|(_, signal)| signal.matches(text))
            .map(|(name, _)| *name)
    }
}

static CAPITALIZED_WORD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+\b").ok());

/// Signal groups in evaluation order
pub static SIGNAL_GROUPS: LazyLock<Vec<SignalGroup>> = LazyLock::new(|| {
    vec![
        SignalGroup {
            strategy: DetectionStrategy::LocationSpecialist,
            label: "Address or location signals",
            signals: vec![
                (
                    "address keyword",
                    Signal::Pattern(
                        Regex::new(
                            r"(?i)\b(?:street|st|avenue|ave|road|rd|boulevard|blvd|lane|drive|court|highway|hwy|apartment|apt|suite|zip|zipcode|postal|postcode)\b",
                        )
                        .ok(),
                    ),
                ),
                (
                    "postal code",
                    Signal::Pattern(Regex::new(r"\b\d{5}\b").ok()),
                ),
                (
                    "relative location",
                    Signal::Pattern(
                        Regex::new(
                            r"(?i)\b(?:north|south|east|west|northeast|northwest|southeast|southwest|next to|near|nearby|across from|opposite|behind|in front of|around the corner|downtown|uptown)\b",
                        )
                        .ok(),
                    ),
                ),
            ],
        },
        SignalGroup {
            strategy: DetectionStrategy::NumericSpecialist,
            label: "Numeric or time signals",
            signals: vec![
                ("digit ratio", Signal::DigitRatioAbove(0.25)),
                (
                    "clock time",
                    Signal::Pattern(Regex::new(r"\b\d{1,2}:\d{2}(?::\d{2})?(?:\s?[AaPp][Mm])?\b").ok()),
                ),
                (
                    "date",
                    Signal::Pattern(
                        Regex::new(
                            r"\b(?:\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}|\d{4}[/.-]\d{1,2}[/.-]\d{1,2})\b",
                        )
                        .ok(),
                    ),
                ),
                (
                    "reference id",
                    Signal::Pattern(Regex::new(r"\b[A-Z]{1,5}-?\d{3,}\b").ok()),
                ),
            ],
        },
        SignalGroup {
            strategy: DetectionStrategy::CitySpecialist,
            label: "City or compound surname signals",
            signals: vec![
                (
                    "hyphenated name",
                    Signal::Pattern(Regex::new(r"\b[A-Z][a-z]+-[A-Z][a-z]+\b").ok()),
                ),
                (
                    "city keyword",
                    Signal::Pattern(
                        Regex::new(r"(?i)\b(?:city|town|village|municipality|province)\b").ok(),
                    ),
                ),
                (
                    "capitalized list",
                    Signal::CapitalizedWordsWithComma { min: 6 },
                ),
            ],
        },
        SignalGroup {
            strategy: DetectionStrategy::BroadWesternSpecialist,
            label: "Western name or region signals",
            signals: vec![
                (
                    "repeated full names",
                    Signal::PatternCount {
                        regex: Regex::new(r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b").ok(),
                        min: 3,
                    },
                ),
                (
                    "region keyword",
                    Signal::Pattern(
                        Regex::new(r"(?i)\b(?:province|prefecture|county|state)\b").ok(),
                    ),
                ),
            ],
        },
    ]
});

/// Ratio of ASCII digits to letters. Text with digits and no letters is
/// treated as infinitely numeric.
fn digit_ratio(text: &str) -> f64 {
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
    let letters = text.chars().filter(|c| c.is_alphabetic()).count();
    match (digits, letters) {
        (0, _) => 0.0,
        (_, 0) => f64::INFINITY,
        (d, l) => d as f64 / l as f64,
    }
}

/// Pick a detection strategy for `text`. Total and deterministic.
pub fn classify(text: &str) -> ClassificationResult {
    if text.trim().is_empty() {
        return ClassificationResult {
            strategy: DetectionStrategy::GeneralPurpose,
            rationale: NO_INPUT_RATIONALE.to_string(),
        };
    }

    for group in SIGNAL_GROUPS.iter() {
        if let Some(signal) = group.first_match(text) {
            return ClassificationResult {
                strategy: group.strategy,
                rationale: format!("{}: {}", group.label, signal),
            };
        }
    }

    ClassificationResult {
        strategy: DetectionStrategy::GeneralPurpose,
        rationale: DEFAULT_RATIONALE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(strategy: DetectionStrategy) -> &'static SignalGroup {
        SIGNAL_GROUPS
            .iter()
            .find(|g| g.strategy == strategy)
            .expect("group exists")
    }

    #[test]
    fn empty_input_defaults() {
        let result = classify("");
        assert_eq!(result.strategy, DetectionStrategy::GeneralPurpose);
        assert!(result.rationale.contains("No prompt"));
        assert!(result.rationale.contains("no input"));
        assert_eq!(classify("   \n").rationale, NO_INPUT_RATIONALE);
    }

    #[test]
    fn address_example_is_location() {
        let result = classify("Meet me at 221B Baker Street, zip 10001");
        assert_eq!(result.strategy, DetectionStrategy::LocationSpecialist);
        assert_eq!(result.rationale, "Address or location signals: address keyword");
    }

    #[test]
    fn invoice_example_is_numeric() {
        let result = classify("Invoice REF12345 due 01/15/2024");
        assert_eq!(result.strategy, DetectionStrategy::NumericSpecialist);
    }

    #[test]
    fn location_rule_precedes_numeric_rule() {
        // Both an address keyword and a five digit number
        let text = "Ship to Elm Avenue 90210 by 10:30";
        assert!(group(DetectionStrategy::NumericSpecialist).first_match(text).is_some());
        assert_eq!(classify(text).strategy, DetectionStrategy::LocationSpecialist);
    }

    #[test]
    fn classify_is_deterministic() {
        for text in [
            "",
            "hello there",
            "Jean-Pierre lives in Lyon",
            "call me at 10:45 pm",
            "Maria Lopez met John Smith and Anna Berg",
        ] {
            assert_eq!(classify(text), classify(text));
        }
    }

    #[test]
    fn location_signals() {
        let g = group(DetectionStrategy::LocationSpecialist);
        assert_eq!(g.first_match("the office on Pine Road"), Some("address keyword"));
        assert_eq!(g.first_match("post it to 75001 please"), Some("postal code"));
        assert_eq!(g.first_match("the bakery next to the bank"), Some("relative location"));
        assert_eq!(g.first_match("nothing here"), None);
        // A five digit run inside a reference id is not a postal code
        assert_eq!(g.first_match("REF12345"), None);
    }

    #[test]
    fn numeric_signals() {
        let g = group(DetectionStrategy::NumericSpecialist);
        assert_eq!(g.first_match("id 4432 99"), Some("digit ratio"));
        assert_eq!(g.first_match("the call is at 9:15 tomorrow morning"), Some("clock time"));
        assert_eq!(
            g.first_match("she was born on 1990-04-12 in the early morning hours of spring"),
            Some("date")
        );
        assert_eq!(g.first_match("ticket ABC-1234 is open and waiting for review"), Some("reference id"));
        assert_eq!(g.first_match("only words here"), None);
    }

    #[test]
    fn city_signals() {
        let g = group(DetectionStrategy::CitySpecialist);
        assert_eq!(g.first_match("Jean-Pierre says hi"), Some("hyphenated name"));
        assert_eq!(g.first_match("she grew up in a small town"), Some("city keyword"));
        assert_eq!(
            g.first_match("Paris, Lyon, Nice, Lille, Nantes and Rennes"),
            Some("capitalized list")
        );
        // Six capitalized words without a comma do not fire
        assert_eq!(g.first_match("Paris Lyon Nice Lille Nantes Rennes"), None);
    }

    #[test]
    fn western_signals() {
        let g = group(DetectionStrategy::BroadWesternSpecialist);
        assert_eq!(
            g.first_match("Maria Lopez met John Smith and Anna Berg"),
            Some("repeated full names")
        );
        assert_eq!(g.first_match("Maria Lopez met John Smith"), None);
        assert_eq!(g.first_match("she moved to Kyoto prefecture"), Some("region keyword"));
    }

    #[test]
    fn end_to_end_strategies() {
        assert_eq!(classify("Jean-Pierre sends regards").strategy, DetectionStrategy::CitySpecialist);
        assert_eq!(
            classify("Maria Lopez met John Smith and Anna Berg").strategy,
            DetectionStrategy::BroadWesternSpecialist
        );
        let general = classify("please summarize this paragraph about gardening");
        assert_eq!(general.strategy, DetectionStrategy::GeneralPurpose);
        assert_eq!(general.rationale, DEFAULT_RATIONALE);
    }

    #[test]
    fn model_keys_round_trip() {
        for strategy in DetectionStrategy::ALL {
            assert_eq!(strategy.model_key().parse::<DetectionStrategy>(), Ok(strategy));
        }
        assert!("gpt".parse::<DetectionStrategy>().is_err());
    }

    #[test]
    fn manual_mode_skips_classification() {
        let mode = SelectionMode::Manual(DetectionStrategy::CitySpecialist);
        let result = mode.resolve("Meet me at 221B Baker Street");
        assert_eq!(result.strategy, DetectionStrategy::CitySpecialist);
        assert_eq!(result.rationale, "Manual selection: city-specialist");
        assert_eq!(
            SelectionMode::Automatic.resolve("Meet me at 221B Baker Street"),
            classify("Meet me at 221B Baker Street")
        );
        let json = serde_json::to_string(&mode).unwrap();
        assert_eq!(serde_json::from_str::<SelectionMode>(&json).unwrap(), mode);
    }

    #[test]
    fn digit_ratio_edges() {
        assert_eq!(digit_ratio("abc"), 0.0);
        assert!(digit_ratio("123").is_infinite());
        assert!((digit_ratio("ab12") - 1.0).abs() < f64::EPSILON);
    }
}
