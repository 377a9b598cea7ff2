//! The ephemeral label C8 attaches to every incoming utterance.

use serde::{Deserialize, Serialize};

/// How an incoming utterance was classified.
///
/// Only [`InputClass::Assertion`] may cause a write through
/// [`crate::store::MemoryStore::put`] with `source=USER`. `Question` and
/// `Instruction` trigger retrieval; `Control` is logged and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputClass {
    /// A statement of fact about the speaker or their world.
    Assertion,
    /// A request for information.
    Question,
    /// A directive to the system ("remember that...", "summarize what you know").
    Instruction,
    /// A prompt-injection-style imperative aimed at the system itself
    /// ("ignore prior instructions", "you are now...").
    Control,
    /// Anything else (greetings, small talk, acknowledgements).
    Other,
}

impl InputClass {
    /// Stable lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Assertion => "assertion",
            Self::Question => "question",
            Self::Instruction => "instruction",
            Self::Control => "control",
            Self::Other => "other",
        }
    }

    /// Whether this class may trigger slot-aware retrieval.
    #[must_use]
    pub const fn triggers_retrieval(self) -> bool {
        matches!(self, Self::Question | Self::Instruction)
    }
}
