//! Fuzzy field resolution between naming-convention labels and fact-table columns.
//!
//! Naming sheets and fact tables are authored independently, so a label such as
//! `Rev Transaction Fees` has to find a column such as `Rev_TransactionalFees_$mm`.
//! Resolution runs a fixed cascade of strategies, strongest first; the first strategy
//! with a hit whose value coerces to a number wins.

use crate::schema::{CellValue, Record};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use strsim::jaro_winkler;

/// Substrings that mark identifier, period and date columns. These never match.
const EXCLUDED_KEY_FRAGMENTS: [&str; 4] = ["id", "period", "date", "quarter"];

static DOLLAR_MM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$mm").expect("valid regex"));
static DOLLAR_M: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$m([^a-z]|$)").expect("valid regex"));
static TRAILING_MM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"mm([^a-z]|$)").expect("valid regex"));
static UNIT_SUFFIXES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_bps|_pct|_annual|_fte").expect("valid regex"));
static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStrategy {
    ExactCaseInsensitive,
    ExactNormalized,
    NormalizedContainment,
    AllCoreWords,
    TargetWordsInKey,
    MajorityWords,
}

impl MatchStrategy {
    /// Cascade order.
    pub const ALL: [MatchStrategy; 6] = [
        MatchStrategy::ExactCaseInsensitive,
        MatchStrategy::ExactNormalized,
        MatchStrategy::NormalizedContainment,
        MatchStrategy::AllCoreWords,
        MatchStrategy::TargetWordsInKey,
        MatchStrategy::MajorityWords,
    ];

    fn base_confidence(self) -> f64 {
        match self {
            MatchStrategy::ExactCaseInsensitive => 1.0,
            MatchStrategy::ExactNormalized => 0.95,
            MatchStrategy::NormalizedContainment => 0.8,
            MatchStrategy::AllCoreWords => 0.7,
            MatchStrategy::TargetWordsInKey => 0.6,
            MatchStrategy::MajorityWords => 0.5,
        }
    }
}

/// Lower-cases `name`, strips unit tokens and drops everything that is not alphanumeric.
///
/// `TotalRevenue_$mm` and `Total Revenue` both normalize to `totalrevenue`.
pub fn normalize(name: &str) -> String {
    let stripped = strip_units(&name.to_lowercase(), "");
    NON_ALPHANUMERIC.replace_all(&stripped, "").into_owned()
}

/// Word tokens of `name` (length > 1) after unit tokens and punctuation become spaces.
pub fn core_words(name: &str) -> Vec<String> {
    let stripped = strip_units(&name.to_lowercase(), " ");
    let spaced = NON_ALPHANUMERIC.replace_all(&stripped, " ");
    WHITESPACE
        .replace_all(spaced.trim(), " ")
        .split(' ')
        .filter(|word| word.len() > 1)
        .map(str::to_string)
        .collect()
}

fn strip_units(lower: &str, replacement: &str) -> String {
    let keep_next = format!("{}${{1}}", replacement);
    let text = DOLLAR_MM.replace_all(lower, replacement);
    let text = DOLLAR_M.replace_all(&text, keep_next.as_str());
    let text = TRAILING_MM.replace_all(&text, keep_next.as_str());
    UNIT_SUFFIXES.replace_all(&text, replacement).into_owned()
}

/// True when the column is an identifier, period or date column.
pub fn is_excluded_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    EXCLUDED_KEY_FRAGMENTS
        .iter()
        .any(|fragment| lower.contains(fragment))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMatch {
    pub key: String,
    pub value: f64,
    pub strategy: MatchStrategy,
    /// Strategy tier in `0.0..=1.0`; majority matches scale with the share of words found.
    pub confidence: f64,
    /// Jaro-Winkler similarity of the normalized key and target.
    pub similarity: f64,
}

impl FieldMatch {
    pub fn is_low_confidence(&self, threshold: f64) -> bool {
        self.confidence < threshold
    }
}

/// Outcome of one resolution, with enough context to explain a miss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub target: String,
    pub matched: Option<FieldMatch>,
    /// Columns that were eligible for matching, in record order.
    pub candidates: Vec<String>,
    /// Identifier, period and date columns skipped before matching.
    pub excluded: Vec<String>,
}

impl Resolution {
    pub fn value(&self) -> Option<f64> {
        self.matched.as_ref().map(|m| m.value)
    }

    pub fn strategy(&self) -> Option<MatchStrategy> {
        self.matched.as_ref().map(|m| m.strategy)
    }
}

struct Target {
    lower: String,
    normalized: String,
    words: Vec<String>,
}

impl Target {
    fn new(name: &str) -> Self {
        Self {
            lower: name.trim().to_lowercase(),
            normalized: normalize(name),
            words: core_words(name)
                .into_iter()
                .filter(|word| word.len() > 2)
                .collect(),
        }
    }
}

struct Candidate<'a> {
    key: &'a str,
    value: &'a CellValue,
    lower: String,
    normalized: String,
    words: Vec<String>,
}

impl<'a> Candidate<'a> {
    fn new(key: &'a str, value: &'a CellValue) -> Self {
        Self {
            key,
            value,
            lower: key.to_lowercase(),
            normalized: normalize(key),
            words: core_words(key),
        }
    }

    /// Confidence of a hit under `strategy`, or `None` when the strategy does not match.
    fn score(&self, strategy: MatchStrategy, target: &Target) -> Option<f64> {
        let base = strategy.base_confidence();
        match strategy {
            MatchStrategy::ExactCaseInsensitive => (self.lower.trim() == target.lower).then_some(base),
            MatchStrategy::ExactNormalized => (!self.normalized.is_empty()
                && !target.normalized.is_empty()
                && self.normalized == target.normalized)
                .then_some(base),
            MatchStrategy::NormalizedContainment => (self.normalized.len() > 3
                && target.normalized.len() > 3
                && (self.normalized.contains(&target.normalized)
                    || target.normalized.contains(&self.normalized)))
            .then_some(base),
            MatchStrategy::AllCoreWords => (!target.words.is_empty()
                && target.words.iter().all(|tw| {
                    self.words
                        .iter()
                        .any(|kw| kw == tw || kw.contains(tw.as_str()) || tw.contains(kw.as_str()))
                }))
            .then_some(base),
            MatchStrategy::TargetWordsInKey => (!target.words.is_empty()
                && target
                    .words
                    .iter()
                    .all(|tw| self.lower.contains(tw.as_str())))
            .then_some(base),
            MatchStrategy::MajorityWords => {
                if target.words.is_empty() {
                    return None;
                }
                let hits = target
                    .words
                    .iter()
                    .filter(|tw| self.lower.contains(tw.as_str()))
                    .count();
                let required = (target.words.len() as f64 * 0.5).ceil() as usize;
                let share = hits as f64 / target.words.len() as f64;
                (hits > 0 && hits >= required).then_some(base * share)
            }
        }
    }
}

/// Runs the full cascade for `target` against `record`.
pub fn resolve(record: &Record, target: &str) -> Resolution {
    PreparedRecord::new(record).resolve(target)
}

/// Numeric value of the column best matching `target`, or `None` when nothing matches.
pub fn resolve_value(record: &Record, target: &str) -> Option<f64> {
    resolve(record, target).value()
}

/// Exact case-insensitive lookup over a list of aliases, first alias first.
///
/// Used for columns where containment rules would conflate siblings such as
/// `Margin_$mm` and `MarginPct`.
pub fn resolve_exact(record: &Record, aliases: &[&str]) -> Option<FieldMatch> {
    aliases.iter().find_map(|alias| {
        resolve_with(record, alias, &[MatchStrategy::ExactCaseInsensitive]).matched
    })
}

fn resolve_with(record: &Record, target: &str, strategies: &[MatchStrategy]) -> Resolution {
    PreparedRecord::new(record).resolve_with(target, strategies)
}

/// A record whose column names are normalized once, for resolving many targets against it.
pub struct PreparedRecord<'a> {
    candidates: Vec<Candidate<'a>>,
    excluded: Vec<String>,
}

impl<'a> PreparedRecord<'a> {
    pub fn new(record: &'a Record) -> Self {
        let mut excluded = Vec::new();
        let mut candidates = Vec::new();

        for (key, value) in record {
            if is_excluded_key(key) {
                excluded.push(key.clone());
            } else {
                candidates.push(Candidate::new(key, value));
            }
        }

        Self {
            candidates,
            excluded,
        }
    }

    /// Runs the full cascade for `target`.
    pub fn resolve(&self, target: &str) -> Resolution {
        self.resolve_with(target, &MatchStrategy::ALL)
    }

    fn resolve_with(&self, target: &str, strategies: &[MatchStrategy]) -> Resolution {
        let target_info = Target::new(target);
        let mut matched = None;

        'cascade: for &strategy in strategies {
            for candidate in &self.candidates {
                let Some(confidence) = candidate.score(strategy, &target_info) else {
                    continue;
                };
                if let Some(value) = candidate.value.as_number() {
                    matched = Some(FieldMatch {
                        key: candidate.key.to_string(),
                        value,
                        strategy,
                        confidence,
                        similarity: jaro_winkler(&candidate.normalized, &target_info.normalized),
                    });
                    break 'cascade;
                }
            }
        }

        Resolution {
            target: target.to_string(),
            matched,
            candidates: self.candidates.iter().map(|c| c.key.to_string()).collect(),
            excluded: self.excluded.clone(),
        }
    }
}
