//! The memory record: a single stored assertion.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a [`Memory`].
///
/// Newtype over a UUIDv7 string so identifiers sort roughly by creation time
/// without exposing the underlying representation to callers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub String);

impl MemoryId {
    /// Generates a new, time-ordered identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemoryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Where a memory's content originated.
///
/// Only [`MemorySource::User`] assertions may be written as a direct result of
/// an incoming utterance; see [`crate::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    /// Stated directly by the conversational partner.
    User,
    /// Produced by the system itself (e.g. a derived summary).
    System,
    /// Produced by an external tool call.
    Tool,
    /// Inferred rather than stated outright.
    Inferred,
}

impl MemorySource {
    /// Stable lowercase identifier, used in storage and the response envelope.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Tool => "tool",
            Self::Inferred => "inferred",
        }
    }
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a fact sits on the timeline relative to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalStatus {
    /// The fact no longer holds ("I used to work at Google").
    Past,
    /// The fact holds as of the memory's creation. Default.
    #[default]
    Active,
    /// The fact is expected to hold starting at some point in the future.
    Future,
    /// The fact is hedged / uncertain ("I might move to Seattle").
    Potential,
}

impl TemporalStatus {
    /// Stable lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Past => "past",
            Self::Active => "active",
            Self::Future => "future",
            Self::Potential => "potential",
        }
    }
}

impl fmt::Display for TemporalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a stored memory.
///
/// Mirrors the `Contradicts`/`Supersedes` edge vocabulary used elsewhere in
/// the storage layer: a memory is never deleted, only marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    /// Currently in force. Default.
    #[default]
    Active,
    /// Replaced by a newer memory via an explicit resolution.
    Superseded,
    /// No longer considered authoritative but kept for history (distinct from
    /// `Superseded`: nothing superseded it, it was deliberately retired).
    Deprecated,
}

impl MemoryStatus {
    /// Stable lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Deprecated => "deprecated",
        }
    }
}

impl fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored assertion: the engine's unit of durable fact.
///
/// `text` and `raw_value` are immutable for the lifetime of the row; only
/// `value` (via re-normalization), `trust`, `temporal_status`, `domain_tags`,
/// and `status` ever change, and only through [`crate::store`] or
/// [`crate::resolution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Stable identifier, assigned on [`crate::store::MemoryStore::put`].
    pub memory_id: MemoryId,
    /// Conversation thread this memory belongs to.
    pub thread_id: String,
    /// Session within the thread that produced this memory.
    pub session_id: String,
    /// Verbatim original utterance text. Never rewritten.
    pub text: String,
    /// The slot this memory fills, if any (unstructured notes have none).
    pub slot: Option<String>,
    /// Normalized value, may be re-derived if the normalizer changes.
    pub value: Option<String>,
    /// Exact raw value as extracted, before normalization. Immutable.
    pub raw_value: Option<String>,
    /// Where this memory's content came from.
    pub source: MemorySource,
    /// Bounded trust score in `[0, 1]`.
    pub trust: f64,
    /// Bounded extraction confidence in `[0, 1]`.
    pub confidence: f64,
    /// Unix timestamp of creation.
    pub created_at: i64,
    /// Start of the validity period, if known.
    pub valid_from: Option<i64>,
    /// End of the validity period, if known. Requires `valid_from <= valid_until`.
    pub valid_until: Option<i64>,
    /// Free-text description of the validity period ("since 2019").
    pub period_text: Option<String>,
    /// Where the fact sits on the timeline.
    pub temporal_status: TemporalStatus,
    /// Domain tags; defaults to `{general}`.
    pub domain_tags: BTreeSet<String>,
    /// Lifecycle status.
    pub status: MemoryStatus,
}

impl Memory {
    /// Builds a new active, user-sourced memory with sane defaults, ready to
    /// pass to [`crate::store::MemoryStore::put`].
    ///
    /// `confidence` defaults to `1.0` and `trust` to `0.8`; callers that know
    /// better (e.g. the extractor flagging a low-confidence parse) should set
    /// the fields directly afterward.
    #[must_use]
    pub fn new(thread_id: impl Into<String>, session_id: impl Into<String>, text: impl Into<String>, created_at: i64) -> Self {
        Self {
            memory_id: MemoryId::generate(),
            thread_id: thread_id.into(),
            session_id: session_id.into(),
            text: text.into(),
            slot: None,
            value: None,
            raw_value: None,
            source: MemorySource::User,
            trust: 0.8,
            confidence: 1.0,
            created_at,
            valid_from: None,
            valid_until: None,
            period_text: None,
            temporal_status: TemporalStatus::Active,
            domain_tags: BTreeSet::from(["general".to_string()]),
            status: MemoryStatus::Active,
        }
    }

    /// Whether `valid_from..=valid_until` overlaps `other`'s validity period.
    ///
    /// An absent bound is treated as open-ended on that side. Two memories
    /// with no bounds at all are considered overlapping (both "always").
    #[must_use]
    pub fn overlaps_period(&self, other: &Self) -> bool {
        let self_start = self.valid_from.unwrap_or(i64::MIN);
        let self_end = self.valid_until.unwrap_or(i64::MAX);
        let other_start = other.valid_from.unwrap_or(i64::MIN);
        let other_end = other.valid_until.unwrap_or(i64::MAX);
        self_start <= other_end && other_start <= self_end
    }

    /// Whether this memory shares at least one domain tag with `other`.
    #[must_use]
    pub fn overlaps_domain(&self, other: &Self) -> bool {
        self.domain_tags.intersection(&other.domain_tags).next().is_some()
    }

    /// Builder-style setter for `slot`/`value`/`raw_value` together.
    #[must_use]
    pub fn with_slot_value(mut self, slot: impl Into<String>, value: impl Into<String>, raw_value: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self.value = Some(value.into());
        self.raw_value = Some(raw_value.into());
        self
    }

    /// Builder-style setter for `domain_tags`.
    #[must_use]
    pub fn with_domain_tags(mut self, tags: BTreeSet<String>) -> Self {
        if !tags.is_empty() {
            self.domain_tags = tags;
        }
        self
    }

    /// Builder-style setter for `source`.
    #[must_use]
    pub const fn with_source(mut self, source: MemorySource) -> Self {
        self.source = source;
        self
    }

    /// Builder-style setter for `temporal_status`.
    #[must_use]
    pub const fn with_temporal_status(mut self, status: TemporalStatus) -> Self {
        self.temporal_status = status;
        self
    }

    /// Builder-style setter for the validity period.
    #[must_use]
    pub fn with_period(mut self, valid_from: Option<i64>, valid_until: Option<i64>, period_text: Option<String>) -> Self {
        self.valid_from = valid_from;
        self.valid_until = valid_until;
        self.period_text = period_text;
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
    fn overlaps_period_open_ended_matches_anything() {
        let a = Memory::new("t", "s", "x", 0);
        let b = Memory::new("t", "s", "y", 0).with_period(Some(100), Some(200), None);
        assert!(a.overlaps_period(&b));
    }

    #[test]
    fn overlaps_period_disjoint_ranges_do_not_match() {
        let a = Memory::new("t", "s", "x", 0).with_period(Some(0), Some(10), None);
        let b = Memory::new("t", "s", "y", 0).with_period(Some(20), Some(30), None);
        assert!(!a.overlaps_period(&b));
    }

    #[test]
    fn overlaps_domain_requires_shared_tag() {
        let a = Memory::new("t", "s", "x", 0).with_domain_tags(BTreeSet::from(["programming".to_string()]));
        let b = Memory::new("t", "s", "y", 0).with_domain_tags(BTreeSet::from(["retail".to_string()]));
        assert!(!a.overlaps_domain(&b));
        let c = Memory::new("t", "s", "z", 0).with_domain_tags(BTreeSet::from(["programming".to_string(), "retail".to_string()]));
        assert!(a.overlaps_domain(&c));
    }

    #[test]
    fn default_domain_is_general() {
        let m = Memory::new("t", "s", "x", 0);
        assert!(m.domain_tags.contains("general"));
    }
}
