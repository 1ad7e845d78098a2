//! Aggregating front for a [`MetricsSink`].
//!
//! Every metric is forwarded to the sink unchanged; the collector also keeps
//! running totals and a bounded per-provider latency window so diagnostics
//! (`Router::get_stats`) can report hit rate, error rate and p95 latency
//! without a round-trip to the external collector.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::observability::traits::{Metric, MetricsSink, Outcome};

/// Latency samples kept per provider.
const DEFAULT_LATENCY_WINDOW: usize = 256;

#[derive(Default)]
struct ProviderAggregate {
    requests: u64,
    failures: u64,
    latencies_ms: VecDeque<u64>,
}

#[derive(Default)]
struct Aggregates {
    total: u64,
    successes: u64,
    failures: u64,
    cancelled: u64,
    cache_hits: u64,
    tokens_in: u64,
    tokens_out: u64,
    total_cost: Decimal,
    per_provider: HashMap<String, ProviderAggregate>,
}

/// Per-provider view in a [`MetricsSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMetrics {
    pub requests: u64,
    pub failures: u64,
    pub p95_latency_ms: Option<u64>,
}

/// Point-in-time aggregate view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub cancelled: u64,
    pub cache_hits: u64,
    pub cache_hit_rate: f64,
    pub error_rate: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub total_cost_usd: Decimal,
    pub providers: BTreeMap<String, ProviderMetrics>,
}

/// Forwards metrics and keeps aggregates.
pub struct MetricsCollector {
    sink: Box<dyn MetricsSink>,
    window: usize,
    state: Mutex<Aggregates>,
}

impl MetricsCollector {
    pub fn new(sink: Box<dyn MetricsSink>) -> Self {
        Self::with_window(sink, DEFAULT_LATENCY_WINDOW)
    }

    pub fn with_window(sink: Box<dyn MetricsSink>, window: usize) -> Self {
        Self {
            sink,
            window: window.max(1),
            state: Mutex::new(Aggregates::default()),
        }
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    pub fn record(&self, metric: &Metric) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.total += 1;
            match metric.outcome {
                Outcome::Success => state.successes += 1,
                Outcome::Failure => state.failures += 1,
                Outcome::Cancelled => state.cancelled += 1,
            }
            if metric.cache_hit {
                state.cache_hits += 1;
            }
            state.tokens_in += u64::from(metric.tokens_in);
            state.tokens_out += u64::from(metric.tokens_out);
            state.total_cost += metric.cost_usd;

            if let Some(provider) = &metric.provider
                && !metric.cache_hit
            {
                let agg = state.per_provider.entry(provider.clone()).or_default();
                agg.requests += 1;
                if metric.outcome == Outcome::Failure {
                    agg.failures += 1;
                }
                if agg.latencies_ms.len() == self.window {
                    agg.latencies_ms.pop_front();
                }
                agg.latencies_ms.push_back(metric.latency.as_millis() as u64);
            }
        }
        self.sink.record(metric);
    }

    pub fn flush(&self) {
        self.sink.flush();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let ratio = |n: u64| {
            if state.total == 0 {
                0.0
            } else {
                n as f64 / state.total as f64
            }
        };
        MetricsSnapshot {
            total_requests: state.total,
            successes: state.successes,
            failures: state.failures,
            cancelled: state.cancelled,
            cache_hits: state.cache_hits,
            cache_hit_rate: ratio(state.cache_hits),
            error_rate: ratio(state.failures),
            tokens_in: state.tokens_in,
            tokens_out: state.tokens_out,
            total_cost_usd: state.total_cost,
            providers: state
                .per_provider
                .iter()
                .map(|(id, agg)| {
                    (
                        id.clone(),
                        ProviderMetrics {
                            requests: agg.requests,
                            failures: agg.failures,
                            p95_latency_ms: percentile(&agg.latencies_ms, 0.95),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Nearest-rank percentile.
fn percentile(samples: &VecDeque<u64>, p: f64) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted: Vec<u64> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let rank = (p * sorted.len() as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, sorted.len()) - 1])
}
