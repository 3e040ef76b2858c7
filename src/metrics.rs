//! Observability: histogram metrics and timing spans for the controller's
//! timing points (interpretation round-trips, gesture dispatch, flip
//! duration, Q&A and synthesis latency). Windowed percentiles over the most
//! recent samples.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Windowed sample store: keeps the most recent `capacity` observations.
struct WindowedSamples {
    samples: Vec<f64>,
    pos: usize,
    count: usize,
}

impl WindowedSamples {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity],
            pos: 0,
            count: 0,
        }
    }

    fn push(&mut self, value: f64) {
        let capacity = self.samples.len();
        self.samples[self.pos] = value;
        self.pos = (self.pos + 1) % capacity;
        if self.count < capacity {
            self.count += 1;
        }
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.samples[..self.count].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((p / 100.0) * (self.count as f64 - 1.0)).round() as usize;
        sorted[idx.min(self.count - 1)]
    }

    fn max(&self) -> f64 {
        self.samples[..self.count]
            .iter()
            .copied()
            .fold(0.0, f64::max)
    }
}

/// Stores histograms for all named metrics. Values are microseconds.
pub struct MetricsRegistry {
    histograms: Mutex<HashMap<&'static str, WindowedSamples>>,
    window: usize,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_window(1024)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            window: window.max(1),
        }
    }

    /// Record a sample (in microseconds) for the named metric.
    pub fn record(&self, name: &'static str, value_us: f64) {
        let mut hists = self.histograms.lock();
        hists
            .entry(name)
            .or_insert_with(|| WindowedSamples::new(self.window))
            .push(value_us);
        tracing::debug!(metric = name, value_us, "metric_recorded");
    }

    /// Start a timing span that records on finish.
    pub fn span(self: &Arc<Self>, name: &'static str) -> TimingSpan {
        TimingSpan {
            name,
            start: Instant::now(),
            registry: Arc::clone(self),
        }
    }

    /// Percentile (0-100) for a metric, in microseconds.
    pub fn percentile(&self, name: &str, p: f64) -> f64 {
        let hists = self.histograms.lock();
        hists.get(name).map(|s| s.percentile(p)).unwrap_or(0.0)
    }

    /// Summary of all metrics at p50/p95/p99 plus the windowed maximum.
    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        let hists = self.histograms.lock();
        hists
            .iter()
            .map(|(&name, samples)| {
                (
                    name.to_string(),
                    MetricSummary {
                        p50_us: samples.percentile(50.0),
                        p95_us: samples.percentile(95.0),
                        p99_us: samples.percentile(99.0),
                        max_us: samples.max(),
                        count: samples.count,
                    },
                )
            })
            .collect()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A span measuring elapsed time from creation to explicit finish.
pub struct TimingSpan {
    name: &'static str,
    start: Instant,
    registry: Arc<MetricsRegistry>,
}

impl TimingSpan {
    /// End the span, recording elapsed duration in microseconds.
    pub fn finish(self) -> f64 {
        let elapsed_us = self.start.elapsed().as_micros() as f64;
        self.registry.record(self.name, elapsed_us);
        elapsed_us
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub max_us: f64,
    pub count: usize,
}

/// Well-known metric names (constants to avoid typos).
pub mod metric_names {
    pub const INTERPRET_DONE: &str = "t_interpret_done";
    pub const INTERPRET_CACHE_HIT: &str = "t_interpret_cache_hit";
    pub const GESTURE_DISPATCH: &str = "t_gesture_dispatch";
    pub const VOICE_DISPATCH: &str = "t_voice_dispatch";
    pub const FLIP_DONE: &str = "t_flip_done";
    pub const QA_DONE: &str = "t_qa_done";
    pub const SYNTH_DONE: &str = "t_synth_done";
    pub const MOTION_CLASSIFY: &str = "t_motion_classify";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_recorded_samples() {
        let registry = MetricsRegistry::with_window(16);
        for v in 1..=10 {
            registry.record(metric_names::FLIP_DONE, v as f64);
        }
        assert_eq!(registry.percentile(metric_names::FLIP_DONE, 100.0), 10.0);
        assert!(registry.percentile(metric_names::FLIP_DONE, 50.0) >= 5.0);
        assert_eq!(registry.percentile("unknown", 50.0), 0.0);
    }

    #[test]
    fn window_evicts_oldest_samples() {
        let registry = MetricsRegistry::with_window(4);
        for v in [100.0, 100.0, 100.0, 100.0, 1.0, 1.0, 1.0, 1.0] {
            registry.record(metric_names::QA_DONE, v);
        }
        let summary = registry.summary();
        let qa = &summary[metric_names::QA_DONE];
        assert_eq!(qa.count, 4);
        assert_eq!(qa.max_us, 1.0);
    }
}
