//! Core metrics sink trait and the per-request metric record.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::llm::classifier::ComplexityTier;
use crate::llm::request::OperationType;

/// Destination for per-request metrics.
///
/// Implementations can log to tracing, forward to an external collector,
/// or do nothing at all. Threshold evaluation (error rate, p95 latency,
/// cache hit rate) is the collector's job, not the sink's.
///
/// Thread-safe and shareable behind `Arc<dyn MetricsSink>`.
pub trait MetricsSink: Send + Sync {
    /// Record one finished request.
    fn record(&self, metric: &Metric);

    /// Flush any buffered data. No-op by default.
    fn flush(&self) {}

    /// Human-readable backend name (e.g. "noop", "log").
    fn name(&self) -> &str;
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    /// The caller went away before a result was produced.
    Cancelled,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One append-only record per `route()` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub operation: OperationType,
    /// Provider that answered (or last failed); `None` when no provider
    /// was reached.
    pub provider: Option<String>,
    pub model: Option<String>,
    pub complexity: Option<ComplexityTier>,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub cost_usd: Decimal,
    pub outcome: Outcome,
    /// Short error label for failures (see `RouteError::kind`).
    pub error_kind: Option<String>,
    pub cache_hit: bool,
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    pub fn success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_serializes_latency_as_millis() {
        let metric = Metric {
            operation: OperationType::TaskAnalysis,
            provider: Some("anthropic".into()),
            model: Some("claude-3-5-haiku-latest".into()),
            complexity: Some(ComplexityTier::Medium),
            latency: Duration::from_millis(1234),
            tokens_in: 10,
            tokens_out: 20,
            cost_usd: Decimal::ZERO,
            outcome: Outcome::Success,
            error_kind: None,
            cache_hit: false,
            retry_count: 0,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&metric).unwrap();
        assert_eq!(json["latency"], 1234);
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["operation"], "task_analysis");
        assert!(metric.success());
    }
}
