//! Engine configuration.
//!
//! Layered the way the teacher loads its own config: compiled-in defaults,
//! then an optional `subcog-memory.toml`, then `SUBCOG_MEMORY_*` environment
//! overrides. Every source that actually contributed a value is recorded in
//! `config_sources` so a running engine can report where its knobs came from.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::models::TemporalStatus;

/// Expands `${VAR_NAME}` references against the process environment.
/// Unset variables are left untouched rather than replaced with an empty
/// string, so a misconfigured reference stays visibly wrong.
fn expand_env_vars(input: &str) -> Cow<'_, str> {
    if !input.contains("${") {
        return Cow::Borrowed(input);
    }

    let mut result = input.to_string();
    let mut start = 0;
    while let Some(var_start) = result[start..].find("${") {
        let var_start = start + var_start;
        if let Some(var_end) = result[var_start..].find('}') {
            let var_end = var_start + var_end;
            let var_name = &result[var_start + 2..var_end];
            if let Ok(value) = std::env::var(var_name) {
                result.replace_range(var_start..=var_end, &value);
                start = var_start + value.len();
            } else {
                start = var_end + 1;
            }
        } else {
            break;
        }
    }
    Cow::Owned(result)
}

/// The default behavior for what a retrieval considers "in scope" absent an
/// explicit request to widen to `past`-status memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalFilterDefault {
    /// Only `active` (and `unknown`) memories are eligible by default.
    Active,
    /// `active`, `unknown`, and `past` memories are all eligible by default.
    ActivePlusPast,
}

impl TemporalFilterDefault {
    /// Whether a memory with this temporal status passes the default filter.
    #[must_use]
    pub fn admits(self, status: TemporalStatus) -> bool {
        match self {
            Self::Active => status != TemporalStatus::Past,
            Self::ActivePlusPast => true,
        }
    }
}

impl Default for TemporalFilterDefault {
    fn default() -> Self {
        Self::Active
    }
}

/// All tunable knobs for the engine (§6.3).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Floor trust a memory can decay to (never reaches zero).
    pub trust_min: f64,
    /// Ceiling trust a fresh, corroborated memory can reach.
    pub trust_max: f64,
    /// Trust floor below which a memory is excluded from the fast path.
    pub trust_floor: f64,
    /// Half-life, in seconds, of exponential trust decay.
    pub trust_decay_half_life_secs: i64,
    /// Relative delta above which two numeric values are a `NumericDrift`
    /// rather than noise (§6.3, default 0.20).
    pub numeric_drift_threshold: f64,
    /// Multiplier applied to a candidate's score when its domain tags
    /// intersect the query's inferred domains (§6.3, default 1.5).
    pub domain_boost_beta: f64,
    /// Similarity threshold above which retrieval treats two memories as
    /// plausibly about the same fact for contradiction detection.
    pub theta_contra: f64,
    /// Similarity threshold below which retrieval falls back to asking the
    /// user instead of guessing.
    pub theta_fallback: f64,
    /// How long, in seconds, a resolution may still be rolled back.
    pub rollback_window_secs: i64,
    /// What counts as "in scope" for retrieval absent an explicit override.
    pub temporal_default_filter: TemporalFilterDefault,
    /// Whether low-trust conflicts are recorded at reduced severity without
    /// surfacing a disclosure caveat (§4.5, off by default).
    pub spurious_filter_enabled: bool,
    /// Files that were actually read and merged into this configuration, in
    /// application order.
    pub config_sources: Vec<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trust_min: 0.05,
            trust_max: 0.98,
            trust_floor: 0.2,
            trust_decay_half_life_secs: 30 * 24 * 3600,
            numeric_drift_threshold: 0.20,
            domain_boost_beta: 1.5,
            theta_contra: 0.45,
            theta_fallback: 0.40,
            rollback_window_secs: 24 * 3600,
            temporal_default_filter: TemporalFilterDefault::default(),
            spurious_filter_enabled: false,
            config_sources: Vec::new(),
        }
    }
}

/// Mirror of the TOML file shape; every field optional so a partial file
/// only overrides the knobs it mentions.
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    trust_min: Option<f64>,
    trust_max: Option<f64>,
    trust_floor: Option<f64>,
    trust_decay_half_life_secs: Option<i64>,
    numeric_drift_threshold: Option<f64>,
    domain_boost_beta: Option<f64>,
    theta_contra: Option<f64>,
    theta_fallback: Option<f64>,
    rollback_window_secs: Option<i64>,
    temporal_default_filter: Option<TemporalFilterDefault>,
    spurious_filter_enabled: Option<bool>,
}

impl EngineConfig {
    /// Compiled-in defaults, no file or environment lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a TOML file, applying it on top of the defaults, then applies
    /// `SUBCOG_MEMORY_*` environment overrides on top of that.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails to parse.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let mut config = Self::default();
        apply_file(&mut config, path)?;
        config.config_sources.push(path.to_path_buf());
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads from `./subcog-memory.toml` if present, else falls back to
    /// defaults; either way, environment overrides are applied last.
    #[must_use]
    pub fn load_default() -> Self {
        let mut config = Self::default();
        let path = PathBuf::from("subcog-memory.toml");
        if path.exists() {
            match apply_file(&mut config, &path) {
                Ok(()) => config.config_sources.push(path),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to load config file, using defaults");
                },
            }
        }
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_f64("SUBCOG_MEMORY_TRUST_MIN") {
            self.trust_min = v;
        }
        if let Some(v) = env_f64("SUBCOG_MEMORY_TRUST_MAX") {
            self.trust_max = v;
        }
        if let Some(v) = env_f64("SUBCOG_MEMORY_TRUST_FLOOR") {
            self.trust_floor = v;
        }
        if let Some(v) = env_i64("SUBCOG_MEMORY_TRUST_DECAY_HALF_LIFE_SECS") {
            self.trust_decay_half_life_secs = v;
        }
        if let Some(v) = env_f64("SUBCOG_MEMORY_NUMERIC_DRIFT_THRESHOLD") {
            self.numeric_drift_threshold = v;
        }
        if let Some(v) = env_f64("SUBCOG_MEMORY_DOMAIN_BOOST_BETA") {
            self.domain_boost_beta = v;
        }
        if let Some(v) = env_f64("SUBCOG_MEMORY_THETA_CONTRA") {
            self.theta_contra = v;
        }
        if let Some(v) = env_f64("SUBCOG_MEMORY_THETA_FALLBACK") {
            self.theta_fallback = v;
        }
        if let Some(v) = env_i64("SUBCOG_MEMORY_ROLLBACK_WINDOW_SECS") {
            self.rollback_window_secs = v;
        }
        if let Ok(v) = std::env::var("SUBCOG_MEMORY_TEMPORAL_DEFAULT_FILTER") {
            self.temporal_default_filter = match v.to_lowercase().as_str() {
                "active_plus_past" => TemporalFilterDefault::ActivePlusPast,
                _ => TemporalFilterDefault::Active,
            };
        }
        if let Ok(v) = std::env::var("SUBCOG_MEMORY_SPURIOUS_FILTER_ENABLED") {
            self.spurious_filter_enabled = v.eq_ignore_ascii_case("true") || v == "1";
        }
    }

    /// Path where config overrides (e.g. an LLM API key) are expanded. Used
    /// wherever a configured string might itself be a `${VAR}` reference.
    #[must_use]
    pub fn expand(value: &str) -> String {
        expand_env_vars(value).into_owned()
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn apply_file(config: &mut EngineConfig, path: &Path) -> crate::Result<()> {
    let contents = std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
        operation: "read_config_file".to_string(),
        cause: e.to_string(),
    })?;
    let file: ConfigFile = toml::from_str(&contents).map_err(|e| crate::Error::OperationFailed {
        operation: "parse_config_file".to_string(),
        cause: e.to_string(),
    })?;

    if let Some(v) = file.trust_min {
        config.trust_min = v;
    }
    if let Some(v) = file.trust_max {
        config.trust_max = v;
    }
    if let Some(v) = file.trust_floor {
        config.trust_floor = v;
    }
    if let Some(v) = file.trust_decay_half_life_secs {
        config.trust_decay_half_life_secs = v;
    }
    if let Some(v) = file.numeric_drift_threshold {
        config.numeric_drift_threshold = v;
    }
    if let Some(v) = file.domain_boost_beta {
        config.domain_boost_beta = v;
    }
    if let Some(v) = file.theta_contra {
        config.theta_contra = v;
    }
    if let Some(v) = file.theta_fallback {
        config.theta_fallback = v;
    }
    if let Some(v) = file.rollback_window_secs {
        config.rollback_window_secs = v;
    }
    if let Some(v) = file.temporal_default_filter {
        config.temporal_default_filter = v;
    }
    if let Some(v) = file.spurious_filter_enabled {
        config.spurious_filter_enabled = v;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_knobs() {
        let config = EngineConfig::default();
        assert!((config.numeric_drift_threshold - 0.20).abs() < f64::EPSILON);
        assert!((config.domain_boost_beta - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.temporal_default_filter, TemporalFilterDefault::Active);
        assert!(!config.spurious_filter_enabled);
        assert!(config.config_sources.is_empty());
    }

    #[test]
    fn expand_env_vars_replaces_known_variable() {
        std::env::set_var("SUBCOG_MEMORY_CONFIG_TEST_VAR", "resolved");
        assert_eq!(EngineConfig::expand("prefix-${SUBCOG_MEMORY_CONFIG_TEST_VAR}-suffix"), "prefix-resolved-suffix");
        std::env::remove_var("SUBCOG_MEMORY_CONFIG_TEST_VAR");
    }

    #[test]
    fn expand_env_vars_preserves_unknown_variable() {
        assert_eq!(EngineConfig::expand("${SUBCOG_MEMORY_DEFINITELY_UNSET_XYZ}"), "${SUBCOG_MEMORY_DEFINITELY_UNSET_XYZ}");
    }

    #[test]
    fn load_from_file_merges_partial_toml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subcog-memory.toml");
        std::fs::write(&path, "numeric_drift_threshold = 0.30\nspurious_filter_enabled = true\n").unwrap();
        let config = EngineConfig::load_from_file(&path).unwrap();
        assert!((config.numeric_drift_threshold - 0.30).abs() < f64::EPSILON);
        assert!(config.spurious_filter_enabled);
        // untouched knob keeps its default
        assert!((config.domain_boost_beta - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.config_sources, vec![path]);
    }

    #[test]
    fn temporal_filter_default_active_excludes_past() {
        assert!(TemporalFilterDefault::Active.admits(TemporalStatus::Active));
        assert!(!TemporalFilterDefault::Active.admits(TemporalStatus::Past));
        assert!(TemporalFilterDefault::ActivePlusPast.admits(TemporalStatus::Past));
    }
}
