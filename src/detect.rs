//! Contradiction Detector (C5).
//!
//! Compares one freshly extracted fact against the thread's existing active
//! memories for the same slot and decides which, if any, contradiction kind
//! applies. The decision procedure is applied in order; the first rule that
//! matches wins (§4.5).

use std::collections::BTreeSet;

use tracing::instrument;

use crate::models::{ContradictionKind, ExtractedFact, IntentTag, Memory, MemoryId, Severity, SlotType};
use crate::normalize::SlotCatalogSnapshot;

/// The outcome of comparing a fact against prior memories for its slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// The contradiction kind decided on, or `None` when there is no conflict.
    pub kind: Option<ContradictionKind>,
    /// Memories implicated in the decision, in no particular order.
    pub involved_ids: Vec<MemoryId>,
    /// Severity, meaningless when `kind` is `None`.
    pub severity: Severity,
    /// Free-text rationale, useful for logging/debugging, never shown to users.
    pub notes: String,
    /// Set when rule 5 (TEMPORAL, same value) fires: no contradiction, but the
    /// enforcer/pipeline should update the existing memory's `temporal_status`
    /// rather than write a brand-new memory.
    pub temporal_status_update: Option<(MemoryId, crate::models::TemporalStatus)>,
    /// Set when rule 2 (RETRACT_DENIAL) fires: not a new contradiction, but an
    /// instruction to resolve the most recent open DENIAL on this slot.
    pub retract_denial: bool,
}

impl Detection {
    fn none() -> Self {
        Self {
            kind: None,
            involved_ids: Vec::new(),
            severity: Severity::Low,
            notes: String::new(),
            temporal_status_update: None,
            retract_denial: false,
        }
    }

    /// Whether this detection represents an actual contradiction to be
    /// recorded in the ledger (as opposed to `None`, a temporal status
    /// update, or a denial retraction).
    #[must_use]
    pub const fn is_contradiction(&self) -> bool {
        self.kind.is_some()
    }
}

/// Numeric/year drift ratio beyond which a NUMERIC_DRIFT contradiction fires.
const DEFAULT_NUMERIC_DRIFT_THRESHOLD: f64 = 0.20;

/// Compares `fact` (already slot-normalized) with `prior` — the active
/// memories for `fact.slot`, newest first — and returns a [`Detection`].
///
/// `prior` should already be filtered to the relevant `thread_id`; this
/// function has no storage access of its own (§9: pure logic is synchronous
/// and never touches I/O).
#[instrument(skip(catalog, fact, prior), fields(slot = %fact.slot))]
#[must_use]
pub fn detect(catalog: &SlotCatalogSnapshot, fact: &ExtractedFact, prior: &[Memory], numeric_drift_threshold: Option<f64>) -> Detection {
    let descriptor = catalog.get(&fact.slot);
    let threshold = numeric_drift_threshold.unwrap_or(DEFAULT_NUMERIC_DRIFT_THRESHOLD);

    // 1. DENIAL
    if fact.intent_tag == IntentTag::Deny {
        if let Some(matching) = find_denial_target(fact, prior) {
            return Detection {
                kind: Some(ContradictionKind::Denial),
                involved_ids: vec![matching.memory_id.clone()],
                severity: Severity::Medium,
                notes: format!("denial of active value on slot {}", fact.slot),
                temporal_status_update: None,
                retract_denial: false,
            };
        }
        return Detection::none();
    }

    // 2. RETRACT_DENIAL — signalled back to the caller (pipeline), which owns
    // the ledger lookup for "the most recent contradiction on this slot".
    if fact.intent_tag == IntentTag::RetractDenial {
        return Detection {
            kind: None,
            involved_ids: Vec::new(),
            severity: Severity::Low,
            notes: "retraction of a prior denial".to_string(),
            temporal_status_update: None,
            retract_denial: true,
        };
    }

    // 3. CORRECTION (REVISION)
    if fact.intent_tag.is_correction() {
        if let Some(old_value) = &fact.old_value {
            let normalized_old = descriptor.map_or_else(|| old_value.clone(), |_| catalog.normalize(&fact.slot, old_value).unwrap_or_else(|_| old_value.clone()));
            if let Some(matching) = prior.iter().find(|m| m.value.as_deref() == Some(normalized_old.as_str())) {
                return Detection {
                    kind: Some(ContradictionKind::Revision),
                    involved_ids: vec![matching.memory_id.clone()],
                    severity: Severity::High,
                    notes: format!("explicit correction on slot {}", fact.slot),
                    temporal_status_update: None,
                    retract_denial: false,
                };
            }
        }
        return Detection::none();
    }

    let Some(new_value) = fact.value.as_deref() else {
        return Detection::none();
    };

    // Only compare against memories whose domain/period actually overlaps
    // this fact — scope isolation (§4.5, load-bearing).
    let candidate_memory = synthetic_candidate(fact, new_value);
    let overlapping: Vec<&Memory> = prior.iter().filter(|m| m.overlaps_domain(&candidate_memory) && m.overlaps_period(&candidate_memory)).collect();

    // 4. NUMERIC_DRIFT
    if let Some(descriptor) = descriptor {
        if matches!(descriptor.value_type, SlotType::Number | SlotType::Year) {
            if let Some(drift) = detect_numeric_drift(new_value, &overlapping, threshold) {
                return drift;
            }
        }
    }

    // 5. TEMPORAL
    if fact.temporal_status == crate::models::TemporalStatus::Past {
        if let Some(same_value) = prior.iter().find(|m| m.value.as_deref() == Some(new_value) && m.temporal_status != crate::models::TemporalStatus::Past) {
            return Detection {
                kind: None,
                involved_ids: Vec::new(),
                severity: Severity::Low,
                notes: "timeline update, same value now past".to_string(),
                temporal_status_update: Some((same_value.memory_id.clone(), crate::models::TemporalStatus::Past)),
                retract_denial: false,
            };
        }
        if let Some(different_value) = prior.iter().find(|m| m.value.as_deref() != Some(new_value) && m.temporal_status == crate::models::TemporalStatus::Active) {
            return Detection {
                kind: Some(ContradictionKind::Temporal),
                involved_ids: vec![different_value.memory_id.clone()],
                severity: Severity::Low,
                notes: "timeline update superseding a different active value".to_string(),
                temporal_status_update: None,
                retract_denial: false,
            };
        }
    }

    // 6. REFINEMENT
    if let Some(refined) = overlapping.iter().find(|m| m.value.as_deref().is_some_and(|old| is_refinement(old, new_value))) {
        return Detection {
            kind: Some(ContradictionKind::Refinement),
            involved_ids: vec![refined.memory_id.clone()],
            severity: Severity::Low,
            notes: format!("{new_value} refines an existing value on slot {}", fact.slot),
            temporal_status_update: None,
            retract_denial: false,
        };
    }

    // 7. CONFLICT — only for single-arity slots.
    let is_multi = descriptor.is_some_and(|d| matches!(d.arity, crate::models::Arity::Multi));
    if !is_multi {
        if let Some(conflicting) = overlapping.iter().find(|m| m.value.as_deref().is_some_and(|old| old != new_value)) {
            return Detection {
                kind: Some(ContradictionKind::Conflict),
                involved_ids: vec![conflicting.memory_id.clone()],
                severity: Severity::High,
                notes: format!("mutually exclusive values on single-arity slot {}", fact.slot),
                temporal_status_update: None,
                retract_denial: false,
            };
        }
    }

    // 8. NONE
    Detection::none()
}

fn find_denial_target<'a>(fact: &ExtractedFact, prior: &'a [Memory]) -> Option<&'a Memory> {
    if let Some(value) = fact.value.as_deref() {
        prior.iter().find(|m| m.value.as_deref() == Some(value))
    } else {
        prior.iter().find(|m| m.status == crate::models::MemoryStatus::Active)
    }
}

fn synthetic_candidate(fact: &ExtractedFact, new_value: &str) -> Memory {
    Memory::new("", "", "", 0)
        .with_slot_value(&fact.slot, new_value, new_value)
        .with_domain_tags(fact.domains.clone())
        .with_period(None, None, fact.period_text.clone())
}

fn detect_numeric_drift(new_value: &str, overlapping: &[&Memory], threshold: f64) -> Option<Detection> {
    let new_num: f64 = new_value.parse().ok()?;
    let active = overlapping.iter().find(|m| m.temporal_status == crate::models::TemporalStatus::Active)?;
    let old_num: f64 = active.value.as_deref()?.parse().ok()?;
    let drift = (new_num - old_num).abs() / old_num.abs().max(1.0);
    if drift > threshold {
        return Some(Detection {
            kind: Some(ContradictionKind::NumericDrift),
            involved_ids: vec![active.memory_id.clone()],
            severity: Severity::Medium,
            notes: format!("numeric drift {drift:.2} exceeds threshold {threshold:.2}"),
            temporal_status_update: None,
            retract_denial: false,
        });
    }
    None
}

/// Slot-specific refinement predicate: `new` refines `old` when `new` is a
/// strict specialization that still contains `old` as a substring, or adds a
/// disambiguating clause after a comma (e.g. "Seattle" -> "Seattle metro
/// area, specifically Bellevue").
///
/// Deliberately conservative: exact equality is never a refinement (that's
/// either a reinforcement or has already been filtered out upstream), and
/// `old` containing `new` (a generalization, not a specialization) is not
/// either.
fn is_refinement(old: &str, new: &str) -> bool {
    if old == new {
        return false;
    }
    new.len() > old.len() && new.contains(old)
}

/// Affected domains to record against a new contradiction: the union of the
/// new fact's domains and every involved memory's domains.
#[must_use]
pub fn affected_domains(fact: &ExtractedFact, involved: &[&Memory]) -> BTreeSet<String> {
    let mut domains = fact.domains.clone();
    for memory in involved {
        domains.extend(memory.domain_tags.iter().cloned());
    }
    domains
}
