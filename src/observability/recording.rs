//! Sink that captures every metric into a shared vector, for assertions.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::observability::traits::{Metric, MetricsSink};

/// Shared handle to captured metrics.
pub type RecordedMetrics = Arc<Mutex<Vec<Metric>>>;

/// Records all metrics for later inspection.
pub struct RecordingSink {
    metrics: RecordedMetrics,
    flush_count: Arc<AtomicU32>,
}

impl RecordingSink {
    /// Create a recording sink and return a handle to the captured data.
    pub fn new() -> (Self, RecordedMetrics) {
        let metrics = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                metrics: Arc::clone(&metrics),
                flush_count: Arc::new(AtomicU32::new(0)),
            },
            metrics,
        )
    }

    pub fn flush_count(&self) -> u32 {
        self.flush_count.load(Ordering::Relaxed)
    }
}

impl MetricsSink for RecordingSink {
    fn record(&self, metric: &Metric) {
        self.metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(metric.clone());
    }

    fn flush(&self) {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
    }

    fn name(&self) -> &str {
        "recording"
    }
}
