//! Generator boundary.
//!
//! A free-form text generator (an LLM, in the deployments this engine is
//! built for) sits outside this crate's scope: it is an external
//! collaborator, reached only through this trait. [`TemplateGenerator`] is
//! the deterministic stand-in used in tests and as a default so the crate
//! has no hard dependency on any particular model provider.

use tracing::instrument;

use crate::Result;

/// Everything a generator needs to draft an answer: the caller's query and a
/// deterministic summary of what retrieval found, never raw memory rows.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    /// The original question/instruction text.
    pub query: String,
    /// `render_summary`-style `slot=value` digest of the canonical candidates.
    pub summary: String,
    /// Whether the triggering utterance was an instruction rather than a question.
    pub is_instruction: bool,
}

/// External text generator.
///
/// Kept synchronous like [`crate::store::MemoryStore`] and
/// [`crate::ledger::ContradictionLedger`]: any real network call a concrete
/// implementation makes is this trait's problem to bridge, not the pipeline's
/// (the pipeline applies its own deadline around the whole call via
/// `spawn_blocking` + `tokio::time::timeout`).
pub trait Generator: Send + Sync {
    /// Drafts an answer from `context`. The enforcer reviews and may rewrite
    /// or downgrade the result before it reaches the outside world.
    ///
    /// # Errors
    ///
    /// Returns an error if the generator cannot produce a draft at all.
    fn generate(&self, context: &GenerationContext) -> Result<String>;
}

/// Deterministic generator with no model dependency: renders the summary
/// directly. Exists so the pipeline is exercisable end-to-end without wiring
/// a real provider, and so tests never depend on non-deterministic output.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateGenerator;

impl Generator for TemplateGenerator {
    #[instrument(skip(self, context))]
    fn generate(&self, context: &GenerationContext) -> Result<String> {
        if context.summary.is_empty() {
            return Ok("I don't have anything stored about that yet.".to_string());
        }
        if context.is_instruction {
            Ok(format!("Here's what I have: {}.", context.summary))
        } else {
            Ok(format!("Based on what you've told me: {}.", context.summary))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_generator_is_deterministic() {
        let context = GenerationContext {
            query: "where do I work?".to_string(),
            summary: "employer=amazon".to_string(),
            is_instruction: false,
        };
        let first = TemplateGenerator.generate(&context).unwrap();
        let second = TemplateGenerator.generate(&context).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("employer=amazon"));
    }

    #[test]
    fn empty_summary_produces_uncertain_draft() {
        let context = GenerationContext {
            query: "what do you know about me?".to_string(),
            summary: String::new(),
            is_instruction: true,
        };
        let draft = TemplateGenerator.generate(&context).unwrap();
        assert!(draft.contains("don't have anything"));
    }
}
