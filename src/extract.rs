//! Fact Extractor (C2).
//!
//! Parses free text into a finite, insertion-ordered list of typed
//! [`ExtractedFact`]s. Every fact retains the exact byte offsets in the
//! source text it was derived from (the extractor's lossless guarantee);
//! downstream code may slice the original utterance with `char_range` and
//! trust the result matches `raw`.

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{ExtractedFact, IntentTag, TemporalStatus};
use crate::normalize::SlotCatalog;
use crate::{Error, Result};

struct SlotPattern {
    slot: &'static str,
    regex: Regex,
}

static SLOT_PATTERNS: Lazy<Vec<SlotPattern>> = Lazy::new(|| {
    vec![
        SlotPattern {
            slot: "employer",
            regex: Regex::new(r"(?i)\bI\s+work\s+(?:at|for)\s+([A-Za-z0-9&.,' -]+?)(?:\s*[.!]|\s*\(|$)").unwrap(),
        },
        SlotPattern {
            slot: "location",
            regex: Regex::new(r"(?i)\bI\s+(?:live|am living|reside)\s+in\s+([A-Za-z0-9,.' -]+?)(?:\s*[.!]|$)").unwrap(),
        },
        SlotPattern {
            slot: "title",
            regex: Regex::new(r"(?i)\bmy\s+title\s+is\s+([A-Za-z0-9 /-]+?)(?:\s*[.!]|$)").unwrap(),
        },
        SlotPattern {
            slot: "programming_years",
            regex: Regex::new(r"(?i)\bI(?:'ve| have)\s+been\s+programming\s+for\s+(\d+)\s*years?").unwrap(),
        },
        SlotPattern {
            slot: "first_language",
            regex: Regex::new(r"(?i)\bmy\s+first\s+language\s+(?:is|was)\s+([A-Za-z0-9+#. -]+?)(?:\s*[.!]|$)").unwrap(),
        },
        SlotPattern {
            slot: "remote_preference",
            regex: Regex::new(r"(?i)\bI\s+(?:prefer|want)\s+(remote|hybrid|onsite)\b").unwrap(),
        },
        SlotPattern {
            slot: "masters_school",
            regex: Regex::new(r"(?i)\b(?:my\s+)?master'?s\s+(?:is\s+from|was\s+from|from)\s+([A-Za-z0-9&.,' -]+?)(?:\s*[.!]|$)").unwrap(),
        },
        SlotPattern {
            slot: "undergrad_school",
            regex: Regex::new(r"(?i)\b(?:my\s+)?undergrad(?:uate)?\s+(?:is\s+from|was\s+from|from)\s+([A-Za-z0-9&.,' -]+?)(?:\s*[.!]|$)").unwrap(),
        },
        SlotPattern {
            slot: "occupation",
            regex: Regex::new(r"(?i)\bI(?:'m| am)\s+an?\s+([A-Za-z -]+?)(?:\s*[.!]|$)").unwrap(),
        },
    ]
});

static FALLBACK_FACT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?im)^\s*FACT:\s*([A-Za-z0-9_]+)\s*=\s*(.+?)\s*$").unwrap());

static PHD_HAS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bI\s+have\s+a\s+(PhD|Ph\.D\.|doctorate)\s+from\s+([A-Za-z0-9&.,' -]+?)(?:\s*[.!]|$)").unwrap());
static PHD_DENY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bI\s+never\s+(?:said|had)\s+(?:I\s+had\s+)?a\s+(PhD|Ph\.D\.|doctorate)\b").unwrap());
static PHD_RETRACT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bactually[, ]+no[, ]+I\s+do\s+have\s+a\s+(PhD|Ph\.D\.|doctorate)\b|\bI\s+was\s+testing\s+you\b").unwrap());

static CORRECT_DIRECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bactually,?\s+(.+?),?\s+not\s+(.+?)(?:\s*[.!]|$)").unwrap());
static CORRECT_HEDGED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bI\s+said\s+(.+?)\s+but\s+it'?s\s+closer\s+to\s+(.+?)(?:\s*[.!]|$)").unwrap());
static CORRECT_MEANT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bI\s+meant\s+(.+?)\s+not\s+(.+?)(?:\s*[.!]|$)").unwrap());

static PAST_MARKERS: &[&str] = &["used to", "formerly", "no longer", "left", "quit", "stopped", "don't work", "do not work", "anymore"];
static FUTURE_MARKERS: &[&str] = &["will ", "plan to", "planning to", "going to"];
static POTENTIAL_MARKERS: &[&str] = &["might", "may ", "possibly", "perhaps"];
static ACTIVE_MARKERS: &[&str] = &["currently", "now ", "right now"];

static PERIOD_RANGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)from\s+(\d{4})\s*(?:to|-|–)\s*(\d{4})").unwrap());
static PERIOD_SINCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)since\s+(\d{4})").unwrap());
static PERIOD_UNTIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)until\s+([A-Za-z0-9 ]+?)(?:\s*[.!]|$)").unwrap());
static PERIOD_PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d{4})\s*(?:-|–|to)\s*(\d{4})\)").unwrap());

fn domain_keywords() -> &'static [(&'static str, &'static [&'static str])] {
    &[
        ("print_shop", &["print shop", "printing", "print store"]),
        ("photography", &["photograph", "photo shoot", "camera"]),
        ("programming", &["programming", "coding", "software", "developer", "engineer"]),
        ("retail", &["retail", "cashier", "store clerk", "shop floor"]),
    ]
}

/// Parses free text into zero or more [`ExtractedFact`]s.
///
/// The Fact Extractor (C2).
pub struct FactExtractor {
    catalog: Arc<SlotCatalog>,
}

impl FactExtractor {
    /// Builds an extractor over the given slot catalog; dynamic registration
    /// performed by the fallback `FACT:` parser goes through this catalog.
    #[must_use]
    pub fn new(catalog: Arc<SlotCatalog>) -> Self {
        Self { catalog }
    }

    /// Extracts every fact found in `text`.
    ///
    /// Returns an empty list when `text` contains no recognizable fact; this
    /// is not an error. Only truly malformed input (e.g. not valid UTF-8,
    /// which cannot reach this function as `&str`, or pathological input the
    /// parser cannot scan at all) raises [`Error::ExtractError`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExtractError`] if `text` cannot be scanned at all.
    pub fn extract(&self, text: &str) -> Result<Vec<ExtractedFact>> {
        if text.len() > 64 * 1024 {
            return Err(Error::ExtractError {
                reason: "utterance exceeds maximum scan length".to_string(),
            });
        }

        let mut facts = Vec::new();
        self.extract_phd_facts(text, &mut facts);
        let consumed = self.extract_corrections(text, &mut facts);
        self.extract_slot_patterns(text, &mut facts, &consumed);
        self.extract_fallback_facts(text, &mut facts)?;
        Ok(facts)
    }

    fn extract_phd_facts(&self, text: &str, out: &mut Vec<ExtractedFact>) {
        if let Some(caps) = PHD_RETRACT.captures(text) {
            let whole = caps.get(0).unwrap();
            out.push(
                ExtractedFact::assertion("has_phd", "true", whole.as_str(), whole.range())
                    .with_correction(IntentTag::RetractDenial, "true"),
            );
            return;
        }
        if let Some(caps) = PHD_DENY.captures(text) {
            let whole = caps.get(0).unwrap();
            let mut fact = ExtractedFact::assertion("has_phd", "true", whole.as_str(), whole.range());
            fact.intent_tag = IntentTag::Deny;
            fact.value = None;
            out.push(fact);
            return;
        }
        if let Some(caps) = PHD_HAS.captures(text) {
            let whole = caps.get(0).unwrap();
            let school = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            let normalized_school = self.catalog.snapshot().normalize("masters_school", school).unwrap_or_else(|_| school.to_lowercase());
            out.push(
                ExtractedFact::assertion("has_phd", "true", whole.as_str(), whole.range())
                    .with_domains(BTreeSet::from(["general".to_string()])),
            );
            out.push(ExtractedFact::assertion(
                "phd_school",
                normalized_school,
                school,
                whole.range(),
            ));
        }
    }

    /// Returns the byte ranges of `text` a correction regex already consumed,
    /// so `extract_slot_patterns` can skip re-matching inside them. Without
    /// this, e.g. "Actually, I work at Amazon, not Microsoft." both produces
    /// a correction fact *and* lets the plain `employer` pattern separately
    /// swallow "Amazon, not Microsoft" as a second, nonsensical value.
    fn extract_corrections(&self, text: &str, out: &mut Vec<ExtractedFact>) -> Vec<std::ops::Range<usize>> {
        let mut consumed = Vec::new();
        for regex in [&*CORRECT_DIRECT, &*CORRECT_MEANT] {
            if let Some(caps) = regex.captures(text) {
                let whole = caps.get(0).unwrap();
                let new_value = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
                let old_value = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
                if let Some((slot, normalized_new)) = self.best_effort_slot_for_value(new_value) {
                    let normalized_old = self.catalog.snapshot().normalize(&slot, old_value).unwrap_or_else(|_| old_value.to_lowercase());
                    out.push(
                        ExtractedFact::assertion(&slot, normalized_new, whole.as_str(), whole.range())
                            .with_correction(IntentTag::CorrectDirect, normalized_old),
                    );
                }
                consumed.push(whole.range());
                return consumed;
            }
        }
        if let Some(caps) = CORRECT_HEDGED.captures(text) {
            let whole = caps.get(0).unwrap();
            let old_value = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            let new_value = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            if let Some((slot, normalized_new)) = self.best_effort_slot_for_value(new_value) {
                let normalized_old = self.catalog.snapshot().normalize(&slot, old_value).unwrap_or_else(|_| old_value.to_lowercase());
                out.push(
                    ExtractedFact::assertion(&slot, normalized_new, whole.as_str(), whole.range())
                        .with_correction(IntentTag::CorrectHedged, normalized_old),
                );
            }
            consumed.push(whole.range());
        }
        consumed
    }

    /// Corrections don't name their own slot; we infer it by first trying
    /// the replacement clause against every built-in slot pattern, so "I work
    /// at Amazon" yields the entity "Amazon" via the `employer` pattern
    /// rather than the whole clause. Absent any pattern match (e.g. a bare
    /// "Amazon" with no surrounding clause), we default corrections without
    /// a clear slot match to `employer`, the most common correction target
    /// in practice.
    fn best_effort_slot_for_value(&self, value: &str) -> Option<(String, String)> {
        let snapshot = self.catalog.snapshot();
        for pattern in SLOT_PATTERNS.iter() {
            if let Some(caps) = pattern.regex.captures(value) {
                if let Some(entity) = caps.get(1) {
                    let raw = entity.as_str().trim();
                    if !raw.is_empty() {
                        let normalized = snapshot.normalize(pattern.slot, raw).unwrap_or_else(|_| raw.to_lowercase());
                        return Some((pattern.slot.to_string(), normalized));
                    }
                }
            }
        }
        let normalized = snapshot.normalize("employer", value).ok()?;
        Some(("employer".to_string(), normalized))
    }

    fn extract_slot_patterns(&self, text: &str, out: &mut Vec<ExtractedFact>, consumed: &[std::ops::Range<usize>]) {
        let snapshot = self.catalog.snapshot();
        for pattern in SLOT_PATTERNS.iter() {
            for caps in pattern.regex.captures_iter(text) {
                let whole = caps.get(0).unwrap();
                if consumed.iter().any(|r| ranges_overlap(r, &whole.range())) {
                    continue;
                }
                let Some(value) = caps.get(1) else { continue };
                let raw = value.as_str().trim();
                if raw.is_empty() {
                    continue;
                }
                let normalized = match snapshot.normalize(pattern.slot, raw) {
                    Ok(v) => v,
                    Err(_) => raw.to_lowercase(),
                };
                let mut fact = ExtractedFact::assertion(pattern.slot, normalized, whole.as_str(), whole.range());
                fact.temporal_status = detect_temporal_status(text);
                fact.domains = detect_domains(text);
                fact.period_text = detect_period_text(text);
                let parses_as_number = fact.value.as_deref().is_some_and(|v| v.parse::<i64>().is_ok());
                if pattern.slot == "programming_years" && !parses_as_number {
                    fact.confidence = 0.4;
                }
                out.push(fact);
            }
        }
    }

    fn extract_fallback_facts(&self, text: &str, out: &mut Vec<ExtractedFact>) -> Result<()> {
        for caps in FALLBACK_FACT.captures_iter(text) {
            let whole = caps.get(0).unwrap();
            let key = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let value = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
            self.catalog
                .register_dynamic(key, crate::models::Arity::Single, crate::models::SlotType::String, crate::models::NormalizationProfile::Lowercase)?;
            let normalized = self.catalog.snapshot().normalize(key, value).unwrap_or_else(|_| value.to_lowercase());
            out.push(ExtractedFact::assertion(key, normalized, whole.as_str(), whole.range()));
        }
        Ok(())
    }
}

/// Whether two byte ranges in the source text overlap at all.
fn ranges_overlap(a: &std::ops::Range<usize>, b: &std::ops::Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

fn detect_temporal_status(text: &str) -> TemporalStatus {
    let lower = text.to_lowercase();
    if PAST_MARKERS.iter().any(|m| lower.contains(m)) {
        TemporalStatus::Past
    } else if FUTURE_MARKERS.iter().any(|m| lower.contains(m)) {
        TemporalStatus::Future
    } else if POTENTIAL_MARKERS.iter().any(|m| lower.contains(m)) {
        TemporalStatus::Potential
    } else if ACTIVE_MARKERS.iter().any(|m| lower.contains(m)) {
        TemporalStatus::Active
    } else {
        TemporalStatus::Active
    }
}

/// Detects domain tags from keyword matches; defaults to `{general}`.
///
/// Exposed so retrieval (C6) infers query domains with the same dictionary
/// the extractor uses, keeping "what counts as a domain" consistent across
/// both directions of the pipeline.
#[must_use]
pub fn detect_domains(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    let mut domains = BTreeSet::new();
    for (domain, keywords) in domain_keywords() {
        if keywords.iter().any(|k| lower.contains(k)) {
            domains.insert((*domain).to_string());
        }
    }
    if domains.is_empty() {
        domains.insert("general".to_string());
    }
    domains
}

fn detect_period_text(text: &str) -> Option<String> {
    if let Some(caps) = PERIOD_PARENS.captures(text) {
        return Some(caps.get(0)?.as_str().to_string());
    }
    if let Some(caps) = PERIOD_RANGE.captures(text) {
        return Some(caps.get(0)?.as_str().to_string());
    }
    if let Some(caps) = PERIOD_SINCE.captures(text) {
        return Some(caps.get(0)?.as_str().to_string());
    }
    if let Some(caps) = PERIOD_UNTIL.captures(text) {
        return Some(caps.get(0)?.as_str().to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> FactExtractor {
        FactExtractor::new(Arc::new(SlotCatalog::new()))
    }

    #[test]
    fn extracts_employer_assertion() {
        let facts = extractor().extract("I work at Microsoft.").unwrap();
        assert!(facts.iter().any(|f| f.slot == "employer" && f.value.as_deref() == Some("microsoft")));
    }

    #[test]
    fn extracts_correction_direct() {
        let facts = extractor().extract("Actually, I work at Amazon, not Microsoft.").unwrap();
        let correction = facts.iter().find(|f| f.intent_tag == IntentTag::CorrectDirect);
        assert!(correction.is_some());
    }

    #[test]
    fn extracts_denial_then_retraction() {
        let deny = extractor().extract("I never said I had a PhD.").unwrap();
        assert!(deny.iter().any(|f| f.intent_tag == IntentTag::Deny));

        let retract = extractor().extract("Actually no, I do have a PhD.").unwrap();
        assert!(retract.iter().any(|f| f.intent_tag == IntentTag::RetractDenial));
    }

    #[test]
    fn extracts_numeric_drift_candidates() {
        let first = extractor().extract("I've been programming for 8 years.").unwrap();
        let second = extractor().extract("I've been programming for 12 years.").unwrap();
        assert_eq!(first[0].slot, "programming_years");
        assert_eq!(second[0].value.as_deref(), Some("12"));
    }

    #[test]
    fn extracts_multiple_occupations_from_separate_utterances() {
        let photographer = extractor().extract("I'm a photographer.").unwrap();
        let programmer = extractor().extract("I'm a programmer.").unwrap();
        assert_eq!(photographer[0].slot, "occupation");
        assert_eq!(programmer[0].slot, "occupation");
        assert_ne!(photographer[0].value, programmer[0].value);
    }

    #[test]
    fn extracts_past_temporal_status() {
        let facts = extractor().extract("I don't work at Google anymore.").unwrap();
        assert!(facts.iter().any(|f| f.temporal_status == TemporalStatus::Past));
    }

    #[test]
    fn extracts_period_text_from_parens() {
        let facts = extractor().extract("I work at Google (2020-2024).").unwrap();
        assert!(facts.iter().any(|f| f.period_text.is_some()));
    }

    #[test]
    fn fallback_fact_syntax_registers_dynamic_slot() {
        let facts = extractor().extract("FACT: pet_name = Biscuit").unwrap();
        assert_eq!(facts[0].slot, "pet_name");
        assert_eq!(facts[0].value.as_deref(), Some("biscuit"));
    }

    #[test]
    fn no_facts_returns_empty_not_error() {
        let facts = extractor().extract("hello there, how are you?").unwrap();
        assert!(facts.is_empty());
    }

    #[test]
    fn char_range_is_lossless() {
        let text = "I work at Microsoft.";
        let facts = extractor().extract(text).unwrap();
        let fact = &facts[0];
        assert_eq!(&text[fact.char_range.clone()], fact.raw);
    }
}
