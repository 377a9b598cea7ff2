//! Tracing/logging initialization.
//!
//! The engine's own telemetry surface is deliberately narrow: structured
//! `tracing` events, either human-readable or JSON, filtered by
//! `RUST_LOG`/`SUBCOG_MEMORY_LOG`. There is no exporter pipeline here — no
//! OTLP, no Prometheus — those belong to whatever harness embeds the engine,
//! not to the engine itself.

use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, colorized when attached to a terminal.
    #[default]
    Pretty,
    /// Newline-delimited JSON, one object per event.
    Json,
}

/// Tracing initialization settings.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Output format.
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG`/`SUBCOG_MEMORY_LOG` is unset.
    pub default_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            default_filter: "subcog_memory=info,warn".to_string(),
        }
    }
}

/// Installs the global `tracing` subscriber. Idempotent: a second call is a
/// harmless no-op (the underlying `set_global_default` error is swallowed),
/// so tests and repeated CLI invocations within one process never panic.
pub fn init(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_env("SUBCOG_MEMORY_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init(),
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).with_target(true).json().try_init(),
    };
    if let Err(err) = result {
        tracing::debug!(%err, "tracing subscriber already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_prefers_pretty_format() {
        assert_eq!(ObservabilityConfig::default().format, LogFormat::Pretty);
    }

    #[test]
    fn init_is_idempotent() {
        init(&ObservabilityConfig::default());
        init(&ObservabilityConfig::default());
    }
}
