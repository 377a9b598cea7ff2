//! Slot Schema & Normalizer (C1).
//!
//! Owns the canonical fact-slot catalog and the deterministic value
//! normalizer every other stage depends on. The catalog is an explicitly
//! versioned, immutable snapshot: callers take a [`SlotCatalog::snapshot`]
//! and thread it through rather than reaching a hidden global.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::models::{Arity, NormalizationProfile, SlotDescriptor, SlotType};
use crate::{Error, Result};

/// Built-in slot names, matching §3.1 of the specification.
pub const BUILTIN_SLOTS: &[&str] = &[
    "employer",
    "location",
    "title",
    "programming_years",
    "first_language",
    "remote_preference",
    "masters_school",
    "undergrad_school",
    "occupation",
];

fn builtin_descriptors() -> Vec<SlotDescriptor> {
    vec![
        SlotDescriptor::builtin("employer", Arity::Single, SlotType::String, NormalizationProfile::Lowercase),
        SlotDescriptor::builtin("location", Arity::Single, SlotType::String, NormalizationProfile::Lowercase),
        SlotDescriptor::builtin("title", Arity::Single, SlotType::String, NormalizationProfile::Lowercase),
        SlotDescriptor::builtin("programming_years", Arity::Single, SlotType::Number, NormalizationProfile::Integer),
        SlotDescriptor::builtin("first_language", Arity::Single, SlotType::String, NormalizationProfile::Lowercase),
        SlotDescriptor::builtin(
            "remote_preference",
            Arity::Single,
            SlotType::Enum,
            NormalizationProfile::Enum(vec!["remote".to_string(), "hybrid".to_string(), "onsite".to_string()]),
        ),
        SlotDescriptor::builtin("masters_school", Arity::Single, SlotType::String, NormalizationProfile::Lowercase),
        SlotDescriptor::builtin("undergrad_school", Arity::Single, SlotType::String, NormalizationProfile::Lowercase),
        // Occupation is explicitly multi-arity: the spec's S3 scenario requires
        // "photographer" and "programmer" to coexist without a contradiction.
        SlotDescriptor::builtin("occupation", Arity::Multi, SlotType::String, NormalizationProfile::Lowercase),
    ]
}

/// An immutable, versioned view of the slot catalog at a point in time.
///
/// Handed out by [`SlotCatalog::snapshot`]; cheap to clone (an `Arc` bump).
#[derive(Debug, Clone)]
pub struct SlotCatalogSnapshot {
    /// Monotonically increasing version, bumped on every `register_dynamic`.
    pub version: u64,
    descriptors: Arc<HashMap<String, SlotDescriptor>>,
}

impl SlotCatalogSnapshot {
    /// Enumerates every descriptor in the catalog, built-in and dynamic.
    #[must_use]
    pub fn slots(&self) -> Vec<SlotDescriptor> {
        let mut all: Vec<_> = self.descriptors.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Looks up a single descriptor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SlotDescriptor> {
        self.descriptors.get(name)
    }

    /// Normalizes `raw` under `slot`'s normalization profile.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSlot`] if `slot` has no descriptor in this
    /// snapshot, or [`Error::NormalizeError`] if `raw` cannot be parsed under
    /// the slot's profile.
    pub fn normalize(&self, slot: &str, raw: &str) -> Result<String> {
        let descriptor = self.get(slot).ok_or_else(|| Error::UnknownSlot { slot: slot.to_string() })?;
        normalize_value(slot, raw, &descriptor.normalization_profile)
    }
}

/// The process-wide slot catalog. Reads never block; writes (dynamic
/// registration) take a short-lived lock.
pub struct SlotCatalog {
    inner: RwLock<(u64, HashMap<String, SlotDescriptor>)>,
}

impl SlotCatalog {
    /// Builds a catalog pre-populated with the built-in descriptors.
    #[must_use]
    pub fn new() -> Self {
        let mut map = HashMap::new();
        for descriptor in builtin_descriptors() {
            map.insert(descriptor.name.clone(), descriptor);
        }
        Self {
            inner: RwLock::new((0, map)),
        }
    }

    /// Takes an immutable, versioned snapshot for the caller to thread
    /// through a single pipeline invocation.
    #[must_use]
    pub fn snapshot(&self) -> SlotCatalogSnapshot {
        let guard = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        SlotCatalogSnapshot {
            version: guard.0,
            descriptors: Arc::new(guard.1.clone()),
        }
    }

    /// Registers a dynamic slot descriptor.
    ///
    /// Idempotent: registering the same `(arity, value_type)` under an
    /// existing name is a no-op. Fails only when the name collides with an
    /// incompatible existing descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `name` already names an incompatible
    /// descriptor.
    pub fn register_dynamic(
        &self,
        name: &str,
        arity: Arity,
        value_type: SlotType,
        profile: NormalizationProfile,
    ) -> Result<()> {
        let mut guard = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        let candidate = SlotDescriptor {
            name: name.to_string(),
            arity,
            value_type,
            normalization_profile: profile,
            dynamic: true,
        };
        if let Some(existing) = guard.1.get(name) {
            if existing.compatible_with(&candidate) {
                return Ok(());
            }
            return Err(Error::InvalidInput {
                reason: format!("slot '{name}' already registered with incompatible arity/type"),
            });
        }
        guard.1.insert(name.to_string(), candidate);
        guard.0 += 1;
        Ok(())
    }
}

impl Default for SlotCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalizes a string value: Unicode case-fold (NFKC-equivalent for the
/// ASCII/Latin input this catalog targets), lowercase, collapse whitespace,
/// strip terminal punctuation.
#[must_use]
pub fn normalize_string(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let collapsed = lower.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim_end_matches(['.', '!', '?', ',']).trim().to_string()
}

/// Parses explicit hedging vocabulary into a boolean.
///
/// # Errors
///
/// Returns [`Error::NormalizeError`] if `raw` matches neither the truthy nor
/// the falsy vocabulary.
pub fn normalize_boolean(slot: &str, raw: &str) -> Result<bool> {
    let normalized = normalize_string(raw);
    const TRUTHY: &[&str] = &["yes", "true", "definitely", "i do", "i have"];
    const FALSY: &[&str] = &["no", "false", "never", "i don't", "i do not", "i haven't"];
    if TRUTHY.iter().any(|t| normalized.contains(t)) {
        return Ok(true);
    }
    if FALSY.iter().any(|f| normalized.contains(f)) {
        return Ok(false);
    }
    Err(Error::NormalizeError {
        slot: slot.to_string(),
        reason: format!("'{raw}' matches neither the truthy nor falsy hedging vocabulary"),
    })
}

/// Parses a four-digit year; rejects two-digit years per the specification.
///
/// # Errors
///
/// Returns [`Error::NormalizeError`] if `raw` is not a bare four-digit integer.
pub fn normalize_year(slot: &str, raw: &str) -> Result<i32> {
    let trimmed = raw.trim();
    if trimmed.len() != 4 || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::NormalizeError {
            slot: slot.to_string(),
            reason: format!("'{raw}' is not a four-digit year"),
        });
    }
    trimmed.parse::<i32>().map_err(|e| Error::NormalizeError {
        slot: slot.to_string(),
        reason: e.to_string(),
    })
}

/// Parses a canonical signed integer, stripping a trailing unit word
/// ("years", "yrs") if present.
///
/// # Errors
///
/// Returns [`Error::NormalizeError`] if no integer can be parsed out of `raw`.
pub fn normalize_integer(slot: &str, raw: &str) -> Result<i64> {
    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit() || *c == '-').collect();
    let leading_digits = raw
        .split_whitespace()
        .find_map(|tok| tok.trim_matches(|c: char| !c.is_ascii_digit() && c != '-').parse::<i64>().ok());
    digits
        .parse::<i64>()
        .ok()
        .or(leading_digits)
        .ok_or_else(|| Error::NormalizeError {
            slot: slot.to_string(),
            reason: format!("no integer found in '{raw}'"),
        })
}

fn normalize_value(slot: &str, raw: &str, profile: &NormalizationProfile) -> Result<String> {
    match profile {
        NormalizationProfile::Lowercase => Ok(normalize_string(raw)),
        NormalizationProfile::Integer => normalize_integer(slot, raw).map(|n| n.to_string()),
        NormalizationProfile::Year => normalize_year(slot, raw).map(|y| y.to_string()),
        NormalizationProfile::Boolean => normalize_boolean(slot, raw).map(|b| b.to_string()),
        NormalizationProfile::Enum(allowed) => {
            let candidate = normalize_string(raw);
            if allowed.iter().any(|a| a == &candidate) {
                Ok(candidate)
            } else {
                Err(Error::NormalizeError {
                    slot: slot.to_string(),
                    reason: format!("'{raw}' is not one of {allowed:?}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_normalize_is_idempotent() {
        let once = normalize_string("  Seattle, WA!  ");
        let twice = normalize_string(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_slot_errors() {
        let catalog = SlotCatalog::new();
        let snap = catalog.snapshot();
        let err = snap.normalize("not_a_real_slot", "x").unwrap_err();
        assert!(matches!(err, Error::UnknownSlot { .. }));
    }

    #[test]
    fn register_dynamic_is_idempotent() {
        let catalog = SlotCatalog::new();
        catalog
            .register_dynamic("pet_name", Arity::Single, SlotType::String, NormalizationProfile::Lowercase)
            .unwrap();
        catalog
            .register_dynamic("pet_name", Arity::Single, SlotType::String, NormalizationProfile::Lowercase)
            .unwrap();
        let snap = catalog.snapshot();
        assert!(snap.get("pet_name").is_some());
    }

    #[test]
    fn register_dynamic_rejects_incompatible_redefinition() {
        let catalog = SlotCatalog::new();
        catalog
            .register_dynamic("pet_name", Arity::Single, SlotType::String, NormalizationProfile::Lowercase)
            .unwrap();
        let err = catalog
            .register_dynamic("pet_name", Arity::Multi, SlotType::String, NormalizationProfile::Lowercase)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[test]
    fn two_digit_years_are_rejected() {
        assert!(normalize_year("some_year", "24").is_err());
        assert_eq!(normalize_year("some_year", "2024").unwrap(), 2024);
    }

    #[test]
    fn integer_strips_trailing_unit_words() {
        assert_eq!(normalize_integer("programming_years", "8 years").unwrap(), 8);
    }
}
