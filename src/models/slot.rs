//! The typed slot catalog: built-in and dynamically registered fact attributes.

use serde::{Deserialize, Serialize};

/// Whether a slot permits one active value at a time or several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arity {
    /// At most one active value per `(domain, overlapping-period)` group.
    Single,
    /// Several values may be active simultaneously.
    Multi,
}

/// The closed set of value types a slot may carry.
///
/// Every comparison and contradiction predicate dispatches on this tag, never
/// on the runtime shape of a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    /// Free text, normalized via NFKC/lowercase/whitespace rules.
    String,
    /// A parsed number (integer or float, canonical-unit).
    Number,
    /// A four-digit year.
    Year,
    /// A boolean parsed from explicit hedging vocabulary.
    Boolean,
    /// A value drawn from a closed enum set.
    Enum,
}

/// How a slot's raw value is normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalizationProfile {
    /// NFKC, lowercase, collapse whitespace, strip terminal punctuation.
    Lowercase,
    /// Parse to a canonical signed integer.
    Integer,
    /// Parse to a four-digit year; rejects two-digit years.
    Year,
    /// Parse via the hedging vocabulary in [`crate::normalize::boolean`].
    Boolean,
    /// Restrict to one of the listed values (after lowercasing).
    Enum(Vec<String>),
}

/// Describes one slot in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDescriptor {
    /// Canonical slot name, e.g. `employer`.
    pub name: String,
    /// Whether the slot allows one or many simultaneous values.
    pub arity: Arity,
    /// The slot's value type.
    pub value_type: SlotType,
    /// How raw values are normalized.
    pub normalization_profile: NormalizationProfile,
    /// Whether this descriptor was registered at runtime rather than built in.
    pub dynamic: bool,
}

impl SlotDescriptor {
    /// Convenience constructor for a built-in descriptor.
    #[must_use]
    pub fn builtin(name: &str, arity: Arity, value_type: SlotType, profile: NormalizationProfile) -> Self {
        Self {
            name: name.to_string(),
            arity,
            value_type,
            normalization_profile: profile,
            dynamic: false,
        }
    }

    /// Whether `other` is compatible enough with `self` to coexist under the
    /// same name (used by `register_dynamic`'s idempotency check).
    #[must_use]
    pub fn compatible_with(&self, other: &Self) -> bool {
        self.arity == other.arity && self.value_type == other.value_type
    }
}
