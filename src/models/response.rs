//! The stable response envelope returned to the outside world.

use serde::{Deserialize, Serialize};

use super::memory::{MemorySource, TemporalStatus};

/// The category of outgoing answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    /// A plain, uncontested statement of fact.
    Belief,
    /// Conversational filler with no factual payload.
    Speech,
    /// An answer that discloses a contradiction/update explicitly.
    Disclosure,
    /// The enforcer downgraded the answer and is asking the user to clarify.
    AskUser,
    /// The engine declined to answer (e.g. deadline exceeded, no memory to write).
    Refusal,
    /// The engine is unsure and says so rather than asserting.
    Uncertainty,
    /// A reflective/meta statement about the engine's own state.
    Reflection,
}

impl ResponseType {
    /// Stable lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Belief => "belief",
            Self::Speech => "speech",
            Self::Disclosure => "disclosure",
            Self::AskUser => "ask_user",
            Self::Refusal => "refusal",
            Self::Uncertainty => "uncertainty",
            Self::Reflection => "reflection",
        }
    }

    /// Whether this response type is itself an acceptable disclosure of a
    /// contradicted claim, standing in for a caveat phrase (property 3, §8).
    #[must_use]
    pub const fn stands_in_for_caveat(self) -> bool {
        matches!(self, Self::AskUser | Self::Refusal | Self::Uncertainty)
    }
}

/// One entry in `xray.memories_used`: everything a caller needs to audit why
/// a memory was used and whether it's safe to trust unqualified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XrayEntry {
    /// The memory's stable identifier, as a plain string for transport.
    pub memory_id: String,
    /// Verbatim original text.
    pub text: String,
    /// Trust score at the time this response was produced.
    pub trust: f64,
    /// Creation timestamp.
    pub timestamp: i64,
    /// Where the memory's content originated.
    pub source: MemorySource,
    /// Whether this memory was, at read time, involved in an open contradiction.
    pub reintroduced_claim: bool,
    /// The slot this memory fills, if any.
    pub slot: Option<String>,
    /// Where the fact sits on the timeline.
    pub temporal_status: TemporalStatus,
}

/// Response metadata, carrying the counters the invariant properties (§8)
/// are checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Overall confidence in the answer, in `[0, 1]`.
    pub confidence: f64,
    /// Whether any contradiction was detected while producing this response
    /// (new, this turn, not just pre-existing).
    pub contradiction_detected: bool,
    /// Number of memories used in the answer with `reintroduced_claim=true`.
    pub reintroduced_claims_count: usize,
    /// Total open contradictions for the thread at response time.
    pub unresolved_contradictions_total: usize,
    /// Stable identifier for this interaction, for audit/correlation.
    pub interaction_id: String,
}

/// The complete response envelope.
///
/// Hard rule enforced by [`crate::enforce::InvariantEnforcer`]: the number of
/// `xray.memories_used` entries with `reintroduced_claim=true` always equals
/// `metadata.reintroduced_claims_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The string the user sees.
    pub answer: String,
    /// The category of this answer.
    pub response_type: ResponseType,
    /// `true` iff the enforcer approved the answer as-is.
    pub gates_passed: bool,
    /// Structured metadata, always present.
    pub metadata: Metadata,
    /// Ordered list of every memory materially used to produce `answer`.
    pub memories_used: Vec<XrayEntry>,
}

impl Response {
    /// Recomputes `metadata.reintroduced_claims_count` from `memories_used`
    /// and returns whether it already matched (used as a self-check before a
    /// response is returned from the enforcer).
    #[must_use]
    pub fn reintroduced_claims_count_is_consistent(&self) -> bool {
        let actual = self.memories_used.iter().filter(|m| m.reintroduced_claim).count();
        actual == self.metadata.reintroduced_claims_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_entry(reintroduced: bool) -> XrayEntry {
        XrayEntry {
            memory_id: "m1".to_string(),
            text: "I work at Amazon".to_string(),
            trust: 0.9,
            timestamp: 0,
            source: MemorySource::User,
            reintroduced_claim: reintroduced,
            slot: Some("employer".to_string()),
            temporal_status: TemporalStatus::Active,
        }
    }

    #[test]
    fn consistency_check_catches_mismatch() {
        let resp = Response {
            answer: "You work at Amazon.".to_string(),
            response_type: ResponseType::Belief,
            gates_passed: true,
            metadata: Metadata {
                confidence: 0.9,
                contradiction_detected: false,
                reintroduced_claims_count: 1,
                unresolved_contradictions_total: 0,
                interaction_id: "i1".to_string(),
            },
            memories_used: vec![mk_entry(false)],
        };
        assert!(!resp.reintroduced_claims_count_is_consistent());
    }

    #[test]
    fn stands_in_for_caveat_covers_downgrades_only() {
        assert!(ResponseType::AskUser.stands_in_for_caveat());
        assert!(!ResponseType::Belief.stands_in_for_caveat());
    }
}
