//! Property-based coverage of the universal invariants (`SPEC_FULL.md` §8).
//!
//! Each property is checked directly against its governing type rather than
//! by fuzzing free text through the whole pipeline, since the properties
//! themselves are defined over the store/ledger/detector contracts, not over
//! natural language.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeSet;

use proptest::prelude::*;
use subcog_memory::ledger::{ContradictionLedger, InMemoryContradictionLedger};
use subcog_memory::models::{ContradictionKind, Memory, MemoryId, Severity};
use subcog_memory::normalize::SlotCatalog;
use subcog_memory::store::{InMemoryMemoryStore, MemoryStore};

fn mk_memory(thread: &str, slot: &str, value: &str, created_at: i64) -> Memory {
    Memory::new(thread, "s1", format!("{slot}={value}"), created_at).with_slot_value(slot, value, value)
}

proptest! {
    /// Property 1: `reintroduced_claim` (derived in `enforce::stamp_reintroduced_claims`)
    /// agrees with `ledger.has_open_for` for every memory it stamps.
    #[test]
    fn prop_reintroduced_claim_matches_ledger_has_open_for(
        thread in "[a-z]{3,8}",
        slot in prop::sample::select(vec!["employer", "occupation"]),
        involved_in_contradiction in any::<bool>(),
    ) {
        let store = InMemoryMemoryStore::new();
        let ledger = InMemoryContradictionLedger::new();

        let m1 = mk_memory(&thread, &slot, "alpha", 100);
        let m1_id = store.put(m1).unwrap();
        let m2 = mk_memory(&thread, &slot, "beta", 200);
        let m2_id = store.put(m2).unwrap();

        if involved_in_contradiction {
            ledger
                .record_for_thread(&thread, ContradictionKind::Revision, vec![m1_id.clone(), m2_id.clone()], &slot, BTreeSet::from(["general".to_string()]), Severity::Medium, 200)
                .unwrap();
        }

        let reintroduced_m1 = ledger.has_open_for(&m1_id).unwrap();
        let reintroduced_m2 = ledger.has_open_for(&m2_id).unwrap();
        prop_assert_eq!(reintroduced_m1, involved_in_contradiction);
        prop_assert_eq!(reintroduced_m2, involved_in_contradiction);
    }

    /// Property 6: a contradiction involving only `m1` must never mark an
    /// unrelated `m2` as reintroduced.
    #[test]
    fn prop_scope_isolation(thread in "[a-z]{3,8}", other_thread in "[a-z]{3,8}") {
        prop_assume!(thread != other_thread);
        let store = InMemoryMemoryStore::new();
        let ledger = InMemoryContradictionLedger::new();

        let m1 = store.put(mk_memory(&thread, "employer", "acme", 100)).unwrap();
        let unrelated = store.put(mk_memory(&other_thread, "employer", "initech", 100)).unwrap();

        ledger
            .record_for_thread(&thread, ContradictionKind::Revision, vec![m1.clone()], "employer", BTreeSet::from(["general".to_string()]), Severity::Low, 100)
            .unwrap();

        prop_assert!(ledger.has_open_for(&m1).unwrap());
        prop_assert!(!ledger.has_open_for(&unrelated).unwrap());
    }

    /// Property 7: normalizing a slot value twice is the same as normalizing
    /// it once, for any non-empty printable input.
    #[test]
    fn prop_normalize_idempotent(raw in "[A-Za-z0-9 ,.\\-]{1,40}") {
        prop_assume!(!raw.trim().is_empty());
        let catalog = SlotCatalog::new();
        let snapshot = catalog.snapshot();
        if let Ok(once) = snapshot.normalize("employer", &raw) {
            let twice = snapshot.normalize("employer", &once).unwrap();
            prop_assert_eq!(once, twice);
        }
    }

    /// Property 8: resolution history only grows, and a terminal status is
    /// sticky — a second resolution attempt must not un-terminalize it.
    #[test]
    fn prop_ledger_monotonicity(slot in "[a-z]{3,10}") {
        let ledger = InMemoryContradictionLedger::new();
        let m1 = MemoryId::generate();
        let m2 = MemoryId::generate();
        let contradiction_id = ledger
            .record_for_thread("t", ContradictionKind::Revision, vec![m1, m2], &slot, BTreeSet::new(), Severity::Medium, 100)
            .unwrap();

        let before = ledger.get(&contradiction_id).unwrap().resolution_history.len();
        ledger.append_resolution(&contradiction_id, subcog_memory::models::Resolution::UpdateToNewer, subcog_memory::models::Actor::User, 200, None).unwrap();
        let after_first = ledger.get(&contradiction_id).unwrap();
        prop_assert!(after_first.resolution_history.len() >= before);
        prop_assert!(after_first.status.is_terminal());

        let second = ledger.append_resolution(&contradiction_id, subcog_memory::models::Resolution::Dismissed, subcog_memory::models::Actor::System, 300, None);
        prop_assert!(second.is_err());
        let after_second = ledger.get(&contradiction_id).unwrap();
        prop_assert_eq!(after_second.resolution_history.len(), after_first.resolution_history.len());
    }
}

/// Property 4 (append-only): `MemoryStore` exposes no delete operation at
/// all, and `put` never overwrites an existing id — checked directly against
/// the trait rather than as a proptest, since it's a structural guarantee.
#[test]
fn store_exposes_no_delete_and_put_never_overwrites() {
    let store = InMemoryMemoryStore::new();
    let id = store.put(mk_memory("t", "employer", "acme", 100)).unwrap();
    let second = store.put(mk_memory("t", "employer", "acme", 100)).unwrap();
    assert_ne!(id, second);
    assert!(store.get(&id).is_ok());
    assert!(store.get(&second).is_ok());
}

/// Property 5: detecting the same `(fact, prior)` pair twice yields an
/// identical verdict.
#[test]
fn detect_is_deterministic_given_same_inputs() {
    use subcog_memory::detect;
    use subcog_memory::models::ExtractedFact;

    let catalog = SlotCatalog::new();
    let snapshot = catalog.snapshot();
    let prior = vec![mk_memory("t", "employer", "microsoft", 100)];
    let fact = ExtractedFact::assertion("employer", "amazon", "I work at Amazon", 0..16);

    let first = detect::detect(&snapshot, &fact, &prior, None);
    let second = detect::detect(&snapshot, &fact, &prior, None);
    assert_eq!(first, second);
}
