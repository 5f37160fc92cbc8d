//! Per-stage latency histograms for the translation pipeline, served at
//! `/metrics` as p50/p95/p99 in microseconds.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Pipeline stages with a latency histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    GlossaryLookup,
    CacheLookup,
    ProviderCall,
    /// Whole resolution, whichever stage answered.
    Total,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::GlossaryLookup => "t_glossary_lookup",
            Stage::CacheLookup => "t_cache_lookup",
            Stage::ProviderCall => "t_provider_call",
            Stage::Total => "t_translate_done",
        }
    }
}

/// Records the time from creation until it is dropped.
pub struct StageTimer<'a> {
    stage: Stage,
    start: Instant,
    registry: &'a MetricsRegistry,
}

impl StageTimer<'_> {
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for StageTimer<'_> {
    fn drop(&mut self) {
        self.registry.record(self.stage, self.start.elapsed());
    }
}

/// Latest `capacity` samples, oldest overwritten first.
struct LatencyRing {
    samples_us: Vec<f64>,
    next: usize,
    capacity: usize,
}

impl LatencyRing {
    fn new(capacity: usize) -> Self {
        Self {
            samples_us: Vec::with_capacity(capacity),
            next: 0,
            capacity,
        }
    }

    fn push(&mut self, value_us: f64) {
        if self.samples_us.len() < self.capacity {
            self.samples_us.push(value_us);
        } else {
            self.samples_us[self.next] = value_us;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    fn sorted(&self) -> Vec<f64> {
        let mut sorted = self.samples_us.clone();
        sorted.sort_by(f64::total_cmp);
        sorted
    }
}

fn nearest_rank(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n => {
            let idx = ((p / 100.0) * (n as f64 - 1.0)).round() as usize;
            sorted[idx.min(n - 1)]
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub count: usize,
}

pub struct MetricsRegistry {
    histograms: Mutex<HashMap<Stage, LatencyRing>>,
    ring_capacity: usize,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(ring_capacity: usize) -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
            ring_capacity: ring_capacity.max(1),
        }
    }

    pub fn record(&self, stage: Stage, elapsed: Duration) {
        let value_us = elapsed.as_micros() as f64;
        self.histograms
            .lock()
            .entry(stage)
            .or_insert_with(|| LatencyRing::new(self.ring_capacity))
            .push(value_us);
        tracing::trace!(metric = stage.as_str(), value_us, "metric_recorded");
    }

    pub fn time(&self, stage: Stage) -> StageTimer<'_> {
        StageTimer {
            stage,
            start: Instant::now(),
            registry: self,
        }
    }

    /// Percentile (0-100) in microseconds; 0 for a stage with no samples.
    pub fn percentile(&self, stage: Stage, p: f64) -> f64 {
        self.histograms
            .lock()
            .get(&stage)
            .map(|ring| nearest_rank(&ring.sorted(), p))
            .unwrap_or(0.0)
    }

    pub fn summary(&self) -> HashMap<String, MetricSummary> {
        self.histograms
            .lock()
            .iter()
            .map(|(stage, ring)| {
                let sorted = ring.sorted();
                let summary = MetricSummary {
                    p50_us: nearest_rank(&sorted, 50.0),
                    p95_us: nearest_rank(&sorted, 95.0),
                    p99_us: nearest_rank(&sorted, 99.0),
                    count: sorted.len(),
                };
                (stage.as_str().to_string(), summary)
            })
            .collect()
    }
}
