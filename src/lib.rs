//! `subcog-memory` is a contradiction-preserving memory engine for long-running
//! conversational assistants.
//!
//! The central guarantee is the *reintroduction invariant*: once a memory has
//! been contradicted by a later one, the engine never lets that memory's fact
//! reach the outside world unqualified. Every answer this crate produces is
//! traceable to one or more stored [`models::memory::Memory`] records, each
//! carrying a trust score, a timestamp, and a derived contradiction flag.
//!
//! The crate is organized as a straight-line pipeline, one stage per module:
//!
//! 1. [`classify`] — labels an utterance as assertion / question / instruction / control / other.
//! 2. [`extract`] — turns an assertion into typed [`models::fact::ExtractedFact`]s.
//! 3. [`normalize`] — the slot catalog and value normalizer both stages above depend on.
//! 4. [`detect`] — compares a new fact against existing memories and decides a contradiction kind.
//! 5. [`store`] — durable, per-thread-ordered persistence of memories.
//! 6. [`ledger`] — the append-only contradiction log and its lifecycle.
//! 7. [`retrieval`] — slot-aware candidate assembly for questions and instructions.
//! 8. [`enforce`] — flags reintroduced claims and injects caveats before a response leaves the core.
//! 9. [`resolution`] — the only path that can supersede a memory or close a contradiction.
//!
//! [`pipeline::Engine::process_utterance`] wires all nine stages together.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// Allow module_name_repetitions; our module layout favors it over generic type names.
#![allow(clippy::module_name_repetitions)]

pub mod classify;
pub mod config;
pub mod detect;
pub mod enforce;
pub mod extract;
pub mod generator;
pub mod ledger;
pub mod models;
pub mod normalize;
pub mod observability;
pub mod pipeline;
pub mod resolution;
pub mod retrieval;
pub mod store;

pub use config::EngineConfig;
pub use pipeline::Engine;

use std::time::{SystemTime, UNIX_EPOCH};

/// The crate-wide error type.
///
/// Every variant corresponds to one of the abstract error kinds named in the
/// engine's error-handling design: no runtime type from a storage or regex
/// dependency ever leaks across a public boundary.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Raised when:
    /// - a `memory_id` or `contradiction_id` passed to a lookup operation does not exist.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the entity that could not be found.
        what: String,
    },

    /// Raised when:
    /// - a per-thread write loses an optimistic-concurrency race.
    #[error("conflict: {reason}")]
    Conflict {
        /// Why the write could not be applied.
        reason: String,
    },

    /// Raised when:
    /// - the write log is saturated and backpressure must be surfaced to the caller
    ///   rather than silently dropping the write.
    #[error("busy: {reason}")]
    Busy {
        /// Why the operation could not proceed right now.
        reason: String,
    },

    /// Raised when:
    /// - the fact extractor encounters truly malformed input it cannot process at all
    ///   (never raised merely because an utterance contains no facts).
    #[error("extract error: {reason}")]
    ExtractError {
        /// Description of what made the input unprocessable.
        reason: String,
    },

    /// Raised when:
    /// - a slot's raw value cannot be parsed under its normalization profile.
    #[error("normalize error on slot {slot}: {reason}")]
    NormalizeError {
        /// The slot whose value failed to normalize.
        slot: String,
        /// Description of the parse failure.
        reason: String,
    },

    /// Raised when:
    /// - a caller with no authority attempts a resolution-interface operation
    ///   (e.g. resolving a contradiction on a thread it does not own).
    #[error("unauthorized: {reason}")]
    Unauthorized {
        /// Description of the missing authority.
        reason: String,
    },

    /// Raised when:
    /// - an operation's deadline expired while waiting on storage or the generator.
    #[error("deadline exceeded for {operation}")]
    DeadlineExceeded {
        /// The operation whose deadline elapsed.
        operation: String,
    },

    /// Raised when:
    /// - the invariant enforcer detects it is about to emit an uncaveated contradicted
    ///   claim. This is a bug trap: it must never leak outside the core. Callers
    ///   reaching this variant should always downgrade to `ask_user` or `refusal`.
    #[error("invariant violation: {reason}")]
    InvariantViolation {
        /// Description of the violation that was caught before it left the core.
        reason: String,
    },

    /// Raised when:
    /// - a slot name is referenced that has neither a built-in nor a dynamically
    ///   registered descriptor.
    #[error("unknown slot: {slot}")]
    UnknownSlot {
        /// The slot name that has no descriptor.
        slot: String,
    },

    /// Raised when:
    /// - a caller-supplied value fails basic validation before any slot-specific
    ///   normalization is attempted (e.g. an empty thread id).
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Description of what was invalid.
        reason: String,
    },

    /// Raised when:
    /// - an underlying operation (storage I/O, configuration loading) failed for a
    ///   reason outside the caller's control.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Convenience alias for crate-wide fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in whole seconds.
///
/// Centralized so every component stamps `created_at`/`updated_at` with the
/// same clock source; tests that need a fixed clock should not call this and
/// should instead thread a timestamp through explicitly.
#[must_use]
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_displays_what() {
        let err = Error::NotFound {
            what: "memory_id=abc".to_string(),
        };
        assert_eq!(err.to_string(), "not found: memory_id=abc");
    }

    #[test]
    fn invariant_violation_displays_reason() {
        let err = Error::InvariantViolation {
            reason: "uncaveated contradicted claim".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invariant violation: uncaveated contradicted claim"
        );
    }

    #[test]
    fn current_timestamp_is_positive() {
        assert!(current_timestamp() > 0);
    }
}
