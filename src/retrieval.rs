//! Retrieval & Augmentation (C6).
//!
//! Slot-aware lookup producing a ranked [`CandidateSet`] for a `question` or
//! `instruction` utterance. The "opaque" semantic index named in the
//! specification is expressed as the [`SimilarityIndex`] trait; the default
//! implementation is a deterministic lexical-overlap scorer so retrieval
//! stays reproducible in tests without a real embedding model.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::instrument;

use crate::models::{Arity, CandidateMemory, CandidateSet, Memory, MemoryId, TemporalStatus};
use crate::normalize::{normalize_string, SlotCatalogSnapshot};
use crate::store::MemoryStore;

/// Pluggable semantic/lexical similarity lookup.
///
/// The default [`LexicalJaccardIndex`] treats "similarity" as normalized
/// token overlap; a real embedding-backed index is a drop-in replacement
/// that implements the same trait, never a change to this module's
/// ranking/boost logic.
pub trait SimilarityIndex: Send + Sync {
    /// Returns up to `k` `(memory_id, score)` pairs most similar to `query`,
    /// highest score first.
    fn top_k(&self, query: &str, candidates: &[Memory], k: usize) -> Vec<(MemoryId, f32)>;
}

/// Deterministic lexical-overlap similarity: token Jaccard over normalized
/// text. Fully reproducible, no model dependency.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalJaccardIndex;

impl SimilarityIndex for LexicalJaccardIndex {
    fn top_k(&self, query: &str, candidates: &[Memory], k: usize) -> Vec<(MemoryId, f32)> {
        let query_tokens: HashSet<String> = tokenize(query);
        let mut scored: Vec<(MemoryId, f32)> = candidates
            .iter()
            .map(|m| {
                let memory_tokens = tokenize(&m.text);
                (m.memory_id.clone(), jaccard(&query_tokens, &memory_tokens))
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    normalize_string(text).split_whitespace().map(str::to_string).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        let ratio = intersection as f32 / union as f32;
        ratio
    }
}

/// Infers candidate slot names from a free-text query by checking which
/// catalog slot names (or their common paraphrase keywords) appear in it.
#[must_use]
pub fn infer_slots(catalog: &SlotCatalogSnapshot, query: &str) -> Vec<String> {
    let normalized = normalize_string(query);
    let mut hits = Vec::new();
    for slot in catalog.slots() {
        let keywords = slot_keywords(&slot.name);
        if keywords.iter().any(|kw| normalized.contains(kw)) {
            hits.push(slot.name);
        }
    }
    hits
}

fn slot_keywords(slot_name: &str) -> Vec<&'static str> {
    match slot_name {
        "employer" => vec!["work", "job", "employer", "company"],
        "location" => vec!["live", "location", "where"],
        "title" => vec!["title", "role", "position"],
        "programming_years" => vec!["programming", "years", "experience"],
        "first_language" => vec!["language", "speak"],
        "remote_preference" => vec!["remote", "hybrid", "onsite"],
        "masters_school" => vec!["masters", "master's", "grad school"],
        "undergrad_school" => vec!["undergrad", "college", "university"],
        "occupation" => vec!["do", "occupation", "profession"],
        _ => vec![],
    }
}

/// Domain tags inferred from the query text, reusing the extractor's keyword
/// dictionary so retrieval and extraction agree on what a "domain" is.
#[must_use]
pub fn infer_domains(query: &str) -> BTreeSet<String> {
    crate::extract::detect_domains(query)
}

/// Assembles a [`CandidateSet`] for a question/instruction utterance.
///
/// `domain_boost_beta` multiplies the score of any `other_candidates` entry
/// whose domain tags intersect the inferred domains (default 1.5, §6.3).
/// `include_past` widens the temporal filter from `active`-only to
/// `active + past` (`temporal_default_filter`, §6.3). A multi-arity slot
/// contributes one canonical candidate per distinct active value rather than
/// only its newest, so coexisting values (e.g. two occupations) both survive
/// into the answer instead of the older one being silently dropped.
#[instrument(skip(catalog, store, index, query), fields(thread_id))]
pub fn retrieve(
    catalog: &SlotCatalogSnapshot,
    store: &dyn MemoryStore,
    index: &dyn SimilarityIndex,
    thread_id: &str,
    query: &str,
    domain_boost_beta: f64,
    include_past: bool,
    top_k: usize,
) -> crate::Result<CandidateSet> {
    let inferred_slots = infer_slots(catalog, query);
    let inferred_domains = infer_domains(query);

    let mut per_slot_canonical = Vec::new();
    for slot in &inferred_slots {
        let mut memories = store.list_by_slot(thread_id, slot, true)?;
        if !include_past {
            let has_active = memories.iter().any(|m| m.temporal_status != TemporalStatus::Past);
            if has_active {
                memories.retain(|m| m.temporal_status != TemporalStatus::Past);
            }
        }
        let is_multi = catalog.get(slot).is_some_and(|d| matches!(d.arity, Arity::Multi));
        if is_multi {
            // Multi-arity slots (e.g. occupation) coexist rather than supersede one
            // another, so every distinct active value is canonical, not just the
            // newest. Collapse re-assertions of the same value to their newest
            // occurrence so repeating "I'm a photographer" twice doesn't duplicate.
            let mut newest_per_value: HashMap<String, Memory> = HashMap::new();
            for memory in memories {
                let key = memory.value.clone().unwrap_or_default();
                let replace = newest_per_value.get(&key).is_none_or(|existing| memory.created_at >= existing.created_at);
                if replace {
                    newest_per_value.insert(key, memory);
                }
            }
            let mut values: Vec<Memory> = newest_per_value.into_values().collect();
            values.sort_by_key(|m| m.created_at);
            per_slot_canonical.extend(values.into_iter().map(|m| CandidateMemory::new(m, 1.0).canonical()));
        } else if let Some(newest) = memories.into_iter().max_by_key(|m| m.created_at) {
            per_slot_canonical.push(CandidateMemory::new(newest, 1.0).canonical());
        }
    }

    let recent = store.list_recent(thread_id, 200)?;
    let filtered: Vec<Memory> = recent
        .into_iter()
        .filter(|m| include_past || m.temporal_status != TemporalStatus::Past)
        .filter(|m| !per_slot_canonical.iter().any(|c| c.memory.memory_id == m.memory_id))
        .collect();

    let similar = index.top_k(query, &filtered, top_k);
    let mut other_candidates = Vec::new();
    for (memory_id, score) in similar {
        if let Some(memory) = filtered.iter().find(|m| m.memory_id == memory_id) {
            let boosted = if memory.domain_tags.intersection(&inferred_domains).next().is_some() {
                f64::from(score) * domain_boost_beta
            } else {
                f64::from(score)
            };
            other_candidates.push(CandidateMemory::new(memory.clone(), boosted));
        }
    }
    other_candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    Ok(CandidateSet {
        per_slot_canonical,
        other_candidates,
    })
}

/// Deterministic `k=v; k=v` rendering of the canonical per-slot values, for
/// summary-style instructions ("summarize what you know").
#[must_use]
pub fn render_summary(candidates: &CandidateSet) -> String {
    let mut entries: Vec<String> = candidates
        .per_slot_canonical
        .iter()
        .filter_map(|c| c.memory.slot.as_ref().zip(c.memory.value.as_ref()))
        .map(|(slot, value)| format!("{slot}={value}"))
        .collect();
    entries.sort();
    entries.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::SlotCatalog;
    use crate::store::InMemoryMemoryStore;

    fn catalog() -> SlotCatalogSnapshot {
        SlotCatalog::new().snapshot()
    }

    #[test]
    fn infer_slots_finds_employer_from_keyword() {
        let hits = infer_slots(&catalog(), "Where do I work?");
        assert!(hits.contains(&"employer".to_string()));
    }

    #[test]
    fn lexical_jaccard_scores_exact_overlap_highest() {
        let index = LexicalJaccardIndex;
        let a = Memory::new("t", "s", "I work at Amazon now", 0);
        let b = Memory::new("t", "s", "I like pizza", 0);
        let scored = index.top_k("work at Amazon", &[a.clone(), b.clone()], 5);
        assert_eq!(scored[0].0, a.memory_id);
    }

    #[test]
    fn slot_fast_path_picks_newest_active() {
        let store = InMemoryMemoryStore::new();
        store.put(Memory::new("t1", "s1", "I work at Microsoft", 100).with_slot_value("employer", "microsoft", "Microsoft")).unwrap();
        store.put(Memory::new("t1", "s1", "Actually Amazon", 200).with_slot_value("employer", "amazon", "Amazon")).unwrap();
        let candidates = retrieve(&catalog(), &store, &LexicalJaccardIndex, "t1", "Where do I work?", 1.5, false, 5).unwrap();
        assert!(candidates.is_single_slot());
        assert_eq!(candidates.per_slot_canonical[0].memory.value.as_deref(), Some("amazon"));
    }

    #[test]
    fn multi_arity_slot_keeps_every_distinct_coexisting_value() {
        let store = InMemoryMemoryStore::new();
        store.put(Memory::new("t1", "s1", "I'm a photographer", 100).with_slot_value("occupation", "photographer", "photographer")).unwrap();
        store.put(Memory::new("t1", "s1", "I'm a programmer", 200).with_slot_value("occupation", "programmer", "programmer")).unwrap();
        let candidates = retrieve(&catalog(), &store, &LexicalJaccardIndex, "t1", "What do I do?", 1.5, false, 5).unwrap();
        assert!(!candidates.is_single_slot());
        assert_eq!(candidates.per_slot_canonical.len(), 2);
        let values: Vec<_> = candidates.per_slot_canonical.iter().filter_map(|c| c.memory.value.clone()).collect();
        assert!(values.contains(&"photographer".to_string()));
        assert!(values.contains(&"programmer".to_string()));
    }

    #[test]
    fn multi_arity_slot_collapses_repeated_value_to_its_newest_occurrence() {
        let store = InMemoryMemoryStore::new();
        store.put(Memory::new("t1", "s1", "I'm a programmer", 100).with_slot_value("occupation", "programmer", "programmer")).unwrap();
        store.put(Memory::new("t1", "s1", "I'm still a programmer", 200).with_slot_value("occupation", "programmer", "programmer")).unwrap();
        let candidates = retrieve(&catalog(), &store, &LexicalJaccardIndex, "t1", "What do I do?", 1.5, false, 5).unwrap();
        assert!(candidates.is_single_slot());
        assert_eq!(candidates.per_slot_canonical[0].memory.created_at, 200);
    }

    #[test]
    fn render_summary_is_sorted_and_deterministic() {
        let set = CandidateSet {
            per_slot_canonical: vec![
                CandidateMemory::new(Memory::new("t", "s", "x", 0).with_slot_value("occupation", "programmer", "programmer"), 1.0),
                CandidateMemory::new(Memory::new("t", "s", "y", 0).with_slot_value("employer", "amazon", "Amazon"), 1.0),
            ],
            other_candidates: vec![],
        };
        assert_eq!(render_summary(&set), "employer=amazon; occupation=programmer");
    }
}
