//! The contradiction ledger's unit of record.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::memory::MemoryId;

/// Stable identifier for a [`Contradiction`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContradictionId(pub String);

impl ContradictionId {
    /// Generates a new, time-ordered identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}

impl fmt::Display for ContradictionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContradictionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The kind of conflict the detector found between a new fact and prior memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionKind {
    /// An explicit correction ("actually X, not Y") superseding an older value.
    Revision,
    /// A strict specialization/disambiguation of an older value, not a conflict.
    Refinement,
    /// A timeline update (e.g. a value moving from active to past) that is not
    /// itself a belief conflict.
    Temporal,
    /// Two mutually exclusive single-arity values overlap in domain and period.
    Conflict,
    /// The speaker denies having ever stated an active value.
    Denial,
    /// A numeric/year value drifted beyond the configured threshold.
    NumericDrift,
}

impl ContradictionKind {
    /// Stable lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Revision => "revision",
            Self::Refinement => "refinement",
            Self::Temporal => "temporal",
            Self::Conflict => "conflict",
            Self::Denial => "denial",
            Self::NumericDrift => "numeric_drift",
        }
    }

    /// The closed-set caveat phrase the enforcer appends on the fast path for
    /// this kind, keyed exactly as described in the invariant enforcer design.
    #[must_use]
    pub const fn fast_path_caveat(self) -> &'static str {
        match self {
            Self::Revision | Self::Temporal => "(most recent update)",
            Self::Refinement => "(refined)",
            Self::Conflict => "(contested)",
            Self::Denial => "(previously denied)",
            Self::NumericDrift => "(superseded value)",
        }
    }
}

impl fmt::Display for ContradictionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How severe a contradiction is judged to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// A timeline update or refinement; informational.
    Low,
    /// A numeric drift or denial; worth surfacing.
    Medium,
    /// A direct conflict or revision; must always be disclosed.
    High,
}

impl Severity {
    /// Stable lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionStatus {
    /// Still unresolved; every involved memory carries `reintroduced_claim=true`.
    #[default]
    Open,
    /// Resolved through an explicit [`crate::resolution`] operation.
    Resolved,
    /// Dismissed as spurious (e.g. classifier error acknowledged by the user).
    Dismissed,
}

impl ContradictionStatus {
    /// Stable lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    /// Terminal states forbid further resolution events.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Dismissed)
    }
}

impl fmt::Display for ContradictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The resolution action applied to a contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Supersede the older memory in favor of the newer one.
    UpdateToNewer,
    /// Supersede the newer memory in favor of the older one.
    UpdateToOlder,
    /// Leave both memories active; the conflict is acknowledged but not chosen between.
    KeepBoth,
    /// Attach disjoint domain tags to each memory so they no longer overlap in scope.
    SplitByDomain,
    /// Mark the older memory's `temporal_status` as past.
    MarkPast,
    /// Discard the contradiction as spurious.
    Dismissed,
}

impl Resolution {
    /// Stable lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UpdateToNewer => "update_to_newer",
            Self::UpdateToOlder => "update_to_older",
            Self::KeepBoth => "keep_both",
            Self::SplitByDomain => "split_by_domain",
            Self::MarkPast => "mark_past",
            Self::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who performed a resolution-history action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// The end user, via the resolution interface.
    User,
    /// The system itself (e.g. auto-flipping a denial on retraction).
    System,
}

impl Actor {
    /// Stable lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in a contradiction's `resolution_history`.
///
/// The history only ever grows; see [`Contradiction`]'s ledger-monotonicity
/// invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionEvent {
    /// The action applied.
    pub action: Resolution,
    /// Who applied it.
    pub actor: Actor,
    /// Unix timestamp of the event.
    pub at: i64,
    /// Free-text note (e.g. "kept both, user chose not to resolve").
    pub note: Option<String>,
}

/// A ledger entry describing a conflict between two or more memories.
///
/// The ledger is append-only: once written, a `Contradiction`'s `kind`,
/// `involved_memory_ids`, and `created_at` never change. Only `status`,
/// `updated_at`, `resolution`, and `resolution_history` may be appended to,
/// and only through [`crate::resolution`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    /// Stable identifier.
    pub contradiction_id: ContradictionId,
    /// Unix timestamp of creation.
    pub created_at: i64,
    /// Unix timestamp of the most recent resolution event (or `created_at`).
    pub updated_at: i64,
    /// What kind of conflict this is.
    pub kind: ContradictionKind,
    /// The memories this contradiction involves; always at least two.
    pub involved_memory_ids: Vec<MemoryId>,
    /// The slot the conflict is about.
    pub slot: String,
    /// Domains affected by this contradiction.
    pub affected_domains: BTreeSet<String>,
    /// How severe this contradiction is.
    pub severity: Severity,
    /// Lifecycle status.
    pub status: ContradictionStatus,
    /// The resolution applied, if any.
    pub resolution: Option<Resolution>,
    /// Ordered, append-only history of resolution events.
    pub resolution_history: Vec<ResolutionEvent>,
}

impl Contradiction {
    /// Builds a freshly opened contradiction.
    #[must_use]
    pub fn new(
        kind: ContradictionKind,
        involved_memory_ids: Vec<MemoryId>,
        slot: impl Into<String>,
        affected_domains: BTreeSet<String>,
        severity: Severity,
        created_at: i64,
    ) -> Self {
        Self {
            contradiction_id: ContradictionId::generate(),
            created_at,
            updated_at: created_at,
            kind,
            involved_memory_ids,
            slot: slot.into(),
            affected_domains,
            severity,
            status: ContradictionStatus::Open,
            resolution: None,
            resolution_history: Vec::new(),
        }
    }

    /// Whether `memory_id` is one of the memories this contradiction involves.
    #[must_use]
    pub fn involves(&self, memory_id: &MemoryId) -> bool {
        self.involved_memory_ids.iter().any(|m| m == memory_id)
    }

    /// Appends a resolution event, advancing `status`/`updated_at`/`resolution`.
    ///
    /// Callers (exclusively [`crate::ledger::ContradictionLedger`]) must check
    /// `status.is_terminal()` first; this method does not itself refuse to
    /// mutate a terminal contradiction, matching the ledger's own guard.
    pub fn append_resolution(&mut self, action: Resolution, actor: Actor, at: i64, note: Option<String>) {
        self.updated_at = at;
        self.resolution = Some(action);
        self.status = match action {
            Resolution::Dismissed => ContradictionStatus::Dismissed,
            _ => ContradictionStatus::Resolved,
        };
        self.resolution_history.push(ResolutionEvent { action, actor, at, note });
    }
}
