//! Observability: per-request metrics behind a pluggable sink.
//!
//! | Backend | Description |
//! |---------|-------------|
//! | `noop`  | Discards everything |
//! | `log`   | Structured `tracing` events (default) |
//! | `multi` | Fan-out to several backends |
//!
//! [`create_sink`] builds the right backend from [`ObservabilityConfig`].
//! Backends combine with `+` (e.g. `"log+noop"`). The [`MetricsCollector`]
//! sits in front of the sink and keeps the aggregates used for diagnostics.

mod collector;
mod log;
mod multi;
mod noop;
mod recording;
pub mod traits;

pub use self::collector::{MetricsCollector, MetricsSnapshot, ProviderMetrics};
pub use self::log::LogSink;
pub use self::multi::MultiSink;
pub use self::noop::NoopSink;
pub use self::recording::{RecordedMetrics, RecordingSink};
pub use self::traits::{Metric, MetricsSink, Outcome};

use crate::config::helpers::parse_string_env;
use crate::error::ConfigError;

/// Configuration for the metrics backend.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Backend name: "none", "noop", "log", or a `+`-joined combination.
    pub backend: String,
}

impl ObservabilityConfig {
    /// Read `METRICS_BACKEND`, defaulting to "log".
    pub fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            backend: parse_string_env("METRICS_BACKEND", "log")?,
        })
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            backend: "log".into(),
        }
    }
}

fn single_sink(name: &str) -> Option<Box<dyn MetricsSink>> {
    match name.trim() {
        "log" => Some(Box::new(LogSink)),
        "none" | "noop" | "" => Some(Box::new(NoopSink)),
        other => {
            tracing::warn!(backend = other, "unknown metrics backend, ignoring");
            None
        }
    }
}

/// Create a sink from configuration. Unknown names fall back to noop.
pub fn create_sink(config: &ObservabilityConfig) -> Box<dyn MetricsSink> {
    if config.backend.contains('+') {
        let sinks: Vec<Box<dyn MetricsSink>> =
            config.backend.split('+').filter_map(single_sink).collect();
        return Box::new(MultiSink::new(sinks));
    }
    single_sink(&config.backend).unwrap_or_else(|| Box::new(NoopSink))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: &str) -> ObservabilityConfig {
        ObservabilityConfig {
            backend: backend.into(),
        }
    }

    #[test]
    fn default_is_log() {
        assert_eq!(ObservabilityConfig::default().backend, "log");
    }

    #[test]
    fn factory_maps_names() {
        assert_eq!(create_sink(&config("log")).name(), "log");
        assert_eq!(create_sink(&config("none")).name(), "noop");
        assert_eq!(create_sink(&config("noop")).name(), "noop");
        assert_eq!(create_sink(&config("")).name(), "noop");
        assert_eq!(create_sink(&config("prometheus")).name(), "noop");
    }

    #[test]
    fn factory_builds_multi_for_compound() {
        assert_eq!(create_sink(&config("log+noop")).name(), "multi");
    }
}
