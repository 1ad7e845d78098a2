//! Tracing-based sink that emits one structured event per request.
//!
//! Uses the existing `tracing` infrastructure so metrics appear alongside
//! normal application logs. With `LOG_FORMAT=json` they are machine-readable
//! as-is.

use crate::observability::traits::{Metric, MetricsSink, Outcome};

/// Sink that logs metrics via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn record(&self, metric: &Metric) {
        let provider = metric.provider.as_deref().unwrap_or("");
        let model = metric.model.as_deref().unwrap_or("");
        let complexity = metric
            .complexity
            .map(|c| c.to_string())
            .unwrap_or_default();
        let latency_ms = metric.latency.as_millis() as u64;
        let cost_usd = metric.cost_usd.to_string();
        let error = metric.error_kind.as_deref().unwrap_or("");

        match metric.outcome {
            Outcome::Success => tracing::info!(
                operation = %metric.operation,
                provider,
                model,
                complexity,
                latency_ms,
                tokens_in = metric.tokens_in,
                tokens_out = metric.tokens_out,
                cost_usd,
                cache_hit = metric.cache_hit,
                retry_count = metric.retry_count,
                "metrics: route.success"
            ),
            Outcome::Failure => tracing::warn!(
                operation = %metric.operation,
                provider,
                model,
                complexity,
                latency_ms,
                error,
                retry_count = metric.retry_count,
                "metrics: route.failure"
            ),
            Outcome::Cancelled => tracing::info!(
                operation = %metric.operation,
                provider,
                latency_ms,
                "metrics: route.cancelled"
            ),
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use rust_decimal::Decimal;
    use tracing_test::traced_test;

    use super::*;
    use crate::llm::request::OperationType;

    fn metric(outcome: Outcome) -> Metric {
        Metric {
            operation: OperationType::IntentDetection,
            provider: Some("gemini".into()),
            model: Some("gemini-2.0-flash".into()),
            complexity: None,
            latency: Duration::from_millis(42),
            tokens_in: 12,
            tokens_out: 8,
            cost_usd: Decimal::ZERO,
            outcome,
            error_kind: (outcome == Outcome::Failure).then(|| "transient_server".to_string()),
            cache_hit: false,
            retry_count: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn name_is_log() {
        assert_eq!(LogSink.name(), "log");
    }

    #[traced_test]
    #[test]
    fn success_and_failure_are_logged() {
        LogSink.record(&metric(Outcome::Success));
        LogSink.record(&metric(Outcome::Failure));
        LogSink.record(&metric(Outcome::Cancelled));
        assert!(logs_contain("metrics: route.success"));
        assert!(logs_contain("metrics: route.failure"));
        assert!(logs_contain("transient_server"));
        assert!(logs_contain("metrics: route.cancelled"));
    }
}
