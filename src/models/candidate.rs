//! The ranked, per-slot view over memories that retrieval hands to the enforcer.

use serde::{Deserialize, Serialize};

use super::memory::Memory;

/// One memory surfaced by retrieval, tagged with why it was surfaced.
///
/// `reintroduced_claim` starts `false` here; it is only ever set by
/// [`crate::enforce::InvariantEnforcer`], which consults the ledger at read
/// time rather than trusting a stored flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMemory {
    /// The underlying memory.
    pub memory: Memory,
    /// Whether this is the canonical (most authoritative) value for its slot.
    pub is_canonical: bool,
    /// Retrieval score after domain-boost and temporal filtering.
    pub score: f64,
    /// Set by the enforcer; `true` iff the ledger has an open contradiction
    /// involving this memory at read time.
    pub reintroduced_claim: bool,
}

impl CandidateMemory {
    /// Wraps a memory as a non-canonical candidate with a given score.
    #[must_use]
    pub const fn new(memory: Memory, score: f64) -> Self {
        Self {
            memory,
            is_canonical: false,
            score,
            reintroduced_claim: false,
        }
    }

    /// Builder-style setter marking this candidate canonical for its slot.
    #[must_use]
    pub const fn canonical(mut self) -> Self {
        self.is_canonical = true;
        self
    }
}

/// The output of [`crate::retrieval`]: per-slot canonical answers plus a
/// broader pool of semantically related candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    /// The canonical memory per inferred slot: the newest active (or
    /// newest-overall) memory for a single-arity slot, or one entry per
    /// distinct active value for a multi-arity slot (coexisting values never
    /// supersede one another).
    pub per_slot_canonical: Vec<CandidateMemory>,
    /// Additional candidates surfaced by the similarity index and domain boost.
    pub other_candidates: Vec<CandidateMemory>,
}

impl CandidateSet {
    /// Iterates over every candidate, canonical first.
    pub fn all(&self) -> impl Iterator<Item = &CandidateMemory> {
        self.per_slot_canonical.iter().chain(self.other_candidates.iter())
    }

    /// Iterates mutably over every candidate; used by the enforcer to stamp
    /// `reintroduced_claim`.
    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut CandidateMemory> {
        self.per_slot_canonical.iter_mut().chain(self.other_candidates.iter_mut())
    }

    /// Whether the set resolves to exactly one canonical candidate overall,
    /// eligible for the slot fast path. A multi-arity slot with more than one
    /// coexisting value is never single, even though only one slot was
    /// inferred.
    #[must_use]
    pub fn is_single_slot(&self) -> bool {
        self.per_slot_canonical.len() == 1
    }
}
