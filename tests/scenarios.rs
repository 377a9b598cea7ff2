//! End-to-end acceptance scenarios (see `SPEC_FULL.md` §8).
//!
//! `S1` (employer change with disclosure) and `S4` (prompt-injection
//! rejection) are covered by unit tests alongside `Engine` itself; this file
//! covers the remaining scenarios against the same in-memory backends, each
//! driven purely through `Engine::process_utterance`.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use subcog_memory::generator::TemplateGenerator;
use subcog_memory::ledger::{ContradictionLedger, InMemoryContradictionLedger};
use subcog_memory::models::{ContradictionKind, ContradictionStatus, ResponseType};
use subcog_memory::normalize::SlotCatalog;
use subcog_memory::retrieval::LexicalJaccardIndex;
use subcog_memory::store::InMemoryMemoryStore;
use subcog_memory::{Engine, EngineConfig};

fn engine() -> Engine {
    Engine::new(
        Arc::new(InMemoryMemoryStore::new()),
        Arc::new(InMemoryContradictionLedger::new()),
        Arc::new(LexicalJaccardIndex),
        Arc::new(TemplateGenerator),
        Arc::new(SlotCatalog::new()),
        EngineConfig::default(),
    )
}

/// Like [`engine`], but also returns the ledger handle so tests can assert
/// on its state directly rather than only on response text.
fn engine_with_ledger() -> (Engine, Arc<InMemoryContradictionLedger>) {
    let ledger = Arc::new(InMemoryContradictionLedger::new());
    let engine = Engine::new(
        Arc::new(InMemoryMemoryStore::new()),
        Arc::clone(&ledger) as Arc<dyn ContradictionLedger>,
        Arc::new(LexicalJaccardIndex),
        Arc::new(TemplateGenerator),
        Arc::new(SlotCatalog::new()),
        EngineConfig::default(),
    );
    (engine, ledger)
}

async fn assert_utterance(engine: &Engine, thread: &str, text: &str, now: i64) -> subcog_memory::Result<subcog_memory::models::Response> {
    engine.process_utterance(thread.to_string(), "s1".to_string(), text.to_string(), now, Duration::from_secs(1)).await
}

#[tokio::test]
async fn s2_temporal_update_is_not_a_contradiction() {
    let engine = engine();
    assert_utterance(&engine, "t2", "I work at Google (2020-2024).", 100).await.unwrap();
    let retraction = assert_utterance(&engine, "t2", "I don't work at Google anymore.", 200).await.unwrap();
    assert_eq!(retraction.response_type, ResponseType::Belief);

    let answer = assert_utterance(&engine, "t2", "Where did I work?", 300).await.unwrap();
    assert!(answer.answer.to_lowercase().contains("google"));
    assert_eq!(answer.metadata.reintroduced_claims_count, 0);
    assert!(answer.memories_used.iter().all(|m| !m.reintroduced_claim));
}

#[tokio::test]
async fn s3_multi_role_coexistence_has_no_contradiction() {
    let engine = engine();
    assert_utterance(&engine, "t3", "I'm a photographer.", 100).await.unwrap();
    assert_utterance(&engine, "t3", "I'm a programmer.", 200).await.unwrap();

    let answer = assert_utterance(&engine, "t3", "What do I do?", 300).await.unwrap();
    let lowered = answer.answer.to_lowercase();
    assert!(lowered.contains("photographer"));
    assert!(lowered.contains("programmer"));
    assert_eq!(answer.metadata.reintroduced_claims_count, 0);
}

#[tokio::test]
async fn s5_denial_then_retraction_resolves_and_affirms_with_caveat() {
    let (engine, ledger) = engine_with_ledger();
    assert_utterance(&engine, "t5", "I have a PhD from Stanford.", 100).await.unwrap();
    let denial = assert_utterance(&engine, "t5", "I never said I had a PhD.", 200).await.unwrap();
    assert_eq!(denial.response_type, ResponseType::Belief);

    let open = ledger.list_open("t5").unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].kind, ContradictionKind::Denial);

    let retraction = assert_utterance(&engine, "t5", "Actually no, I do have a PhD.", 300).await.unwrap();
    assert_eq!(retraction.response_type, ResponseType::Belief);

    assert!(ledger.list_open("t5").unwrap().is_empty());
    let denial_contradiction = ledger.get(&open[0].contradiction_id).unwrap();
    assert_eq!(denial_contradiction.status, ContradictionStatus::Resolved);

    let answer = assert_utterance(&engine, "t5", "Do I have a PhD?", 400).await.unwrap();
    assert!(answer.answer.to_lowercase().contains("phd") || answer.answer.to_lowercase().contains("stanford"));
    assert!(matches!(answer.response_type, ResponseType::Disclosure | ResponseType::AskUser | ResponseType::Belief));
}

#[tokio::test]
async fn s6_numeric_drift_is_disclosed_or_escalated() {
    let engine = engine();
    assert_utterance(&engine, "t6", "I've been programming for 8 years.", 100).await.unwrap();
    let drifted = assert_utterance(&engine, "t6", "I've been programming for 12 years.", 200).await.unwrap();
    assert_eq!(drifted.response_type, ResponseType::Belief);

    let answer = assert_utterance(&engine, "t6", "How many years have I been programming?", 300).await.unwrap();
    assert!(matches!(answer.response_type, ResponseType::Disclosure | ResponseType::AskUser));
}
