//! The ephemeral parse of a single utterance, before it becomes a [`crate::models::Memory`].

use std::collections::BTreeSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use super::memory::TemporalStatus;

/// What the speaker intended to do with a slot value.
///
/// Only `Assert` may create a brand-new memory outright; the others steer the
/// [`crate::detect`] decision procedure toward a specific contradiction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentTag {
    /// A plain statement of fact, no correction implied.
    #[default]
    Assert,
    /// "Actually X, not Y" — an explicit, unhedged correction.
    CorrectDirect,
    /// "I said X but it's closer to Y" — a softened correction.
    CorrectHedged,
    /// "I never said/had X" — a denial of a prior assertion.
    Deny,
    /// "Actually, I do have X" / "I was testing you" — withdraws a prior denial.
    RetractDenial,
    /// No correction-intent marker was found.
    None,
}

impl IntentTag {
    /// Stable lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Assert => "assert",
            Self::CorrectDirect => "correct_direct",
            Self::CorrectHedged => "correct_hedged",
            Self::Deny => "deny",
            Self::RetractDenial => "retract_denial",
            Self::None => "none",
        }
    }

    /// Whether this tag carries an `(old, new)` value pair, as opposed to a
    /// bare reference to an existing value.
    #[must_use]
    pub const fn is_correction(self) -> bool {
        matches!(self, Self::CorrectDirect | Self::CorrectHedged)
    }
}

/// One typed fact parsed out of an utterance.
///
/// Carries the exact byte range in the source text it was derived from, per
/// the extractor's lossless guarantee: callers may slice the original text
/// with `char_range` and trust the result matches `raw`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFact {
    /// The slot this fact fills.
    pub slot: String,
    /// Normalized value, or `None` for a bare denial/no-value correction.
    pub value: Option<String>,
    /// The value being superseded, for `correct_direct`/`correct_hedged`.
    pub old_value: Option<String>,
    /// Raw substring of the source text the value was parsed from.
    pub raw: String,
    /// Where the fact sits on the timeline.
    pub temporal_status: TemporalStatus,
    /// Free-text validity period, if a phrase like "since 2019" was found.
    pub period_text: Option<String>,
    /// Domain tags inferred from keyword matches; `{general}` if none matched.
    pub domains: BTreeSet<String>,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f64,
    /// What the speaker intended to do with this value.
    pub intent_tag: IntentTag,
    /// Exact byte offsets in the source utterance this fact was derived from.
    pub char_range: Range<usize>,
}

impl ExtractedFact {
    /// Builds a plain assertion fact with no temporal/correction markers.
    #[must_use]
    pub fn assertion(slot: impl Into<String>, value: impl Into<String>, raw: impl Into<String>, char_range: Range<usize>) -> Self {
        Self {
            slot: slot.into(),
            value: Some(value.into()),
            old_value: None,
            raw: raw.into(),
            temporal_status: TemporalStatus::Active,
            period_text: None,
            domains: BTreeSet::from(["general".to_string()]),
            confidence: 1.0,
            intent_tag: IntentTag::Assert,
            char_range,
        }
    }

    /// Builder-style setter for `domains`.
    #[must_use]
    pub fn with_domains(mut self, domains: BTreeSet<String>) -> Self {
        if !domains.is_empty() {
            self.domains = domains;
        }
        self
    }

    /// Builder-style setter for `temporal_status`.
    #[must_use]
    pub const fn with_temporal_status(mut self, status: TemporalStatus) -> Self {
        self.temporal_status = status;
        self
    }

    /// Builder-style setter for `period_text`.
    #[must_use]
    pub fn with_period_text(mut self, text: impl Into<String>) -> Self {
        self.period_text = Some(text.into());
        self
    }

    /// Builder-style setter for `intent_tag` and `old_value` together.
    #[must_use]
    pub fn with_correction(mut self, intent_tag: IntentTag, old_value: impl Into<String>) -> Self {
        self.intent_tag = intent_tag;
        self.old_value = Some(old_value.into());
        self
    }

    /// Builder-style setter for `confidence`.
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_correction_only_for_correction_tags() {
        assert!(IntentTag::CorrectDirect.is_correction());
        assert!(IntentTag::CorrectHedged.is_correction());
        assert!(!IntentTag::Deny.is_correction());
        assert!(!IntentTag::Assert.is_correction());
    }

    #[test]
    fn assertion_defaults_are_active_and_general() {
        let fact = ExtractedFact::assertion("employer", "microsoft", "Microsoft", 0..9);
        assert_eq!(fact.temporal_status, TemporalStatus::Active);
        assert!(fact.domains.contains("general"));
        assert_eq!(fact.intent_tag, IntentTag::Assert);
    }
}
