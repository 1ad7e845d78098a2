//! Sink that discards everything.

use crate::observability::traits::{Metric, MetricsSink};

/// Zero-overhead sink.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record(&self, _metric: &Metric) {}

    fn name(&self) -> &str {
        "noop"
    }
}
