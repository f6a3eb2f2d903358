// Grading metrics
//
// Counters and gauges for verdict outcomes, retries, failures and load.
// The registry is owned by whoever builds the engine and shared by handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::model::verdict::VerdictStatus;

/// Counter metric (monotonically increasing)
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Gauge metric (can go up or down)
#[derive(Debug)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram with fixed latency buckets (seconds)
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new_latency() -> Self {
        let bounds = vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];
        let buckets = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            buckets,
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        self.sum_micros
            .fetch_add(value.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        for (le, bucket) in self.bounds.iter().zip(&self.buckets) {
            if seconds <= *le {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_micros(&self) -> u64 {
        self.sum_micros.load(Ordering::Relaxed)
    }

    fn write_prometheus(&self, name: &str, output: &mut String) {
        output.push_str(&format!("# TYPE {} histogram\n", name));
        for (le, bucket) in self.bounds.iter().zip(&self.buckets) {
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                name,
                le,
                bucket.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, self.count()));
        output.push_str(&format!(
            "{}_sum {}\n",
            name,
            self.sum_micros() as f64 / 1_000_000.0
        ));
        output.push_str(&format!("{}_count {}\n", name, self.count()));
    }
}

fn status_index(status: VerdictStatus) -> usize {
    VerdictStatus::ALL
        .iter()
        .position(|s| *s == status)
        .unwrap_or(0)
}

/// Engine-wide counters
#[derive(Debug)]
pub struct GradingMetrics {
    verdicts: [Counter; 7],
    pub cases_executed: Counter,
    pub sandbox_retries: Counter,
    pub system_failures: Counter,
    pub cancellations: Counter,
    pub backpressure_rejections: Counter,
    pub configuration_failures: Counter,
    pub persistence_queued: Counter,
    pub achievements_unlocked: Counter,

    pub in_flight: Gauge,
    pub queued: Gauge,

    pub grade_duration: Histogram,
}

impl GradingMetrics {
    pub fn new() -> Self {
        Self {
            verdicts: Default::default(),
            cases_executed: Counter::new(),
            sandbox_retries: Counter::new(),
            system_failures: Counter::new(),
            cancellations: Counter::new(),
            backpressure_rejections: Counter::new(),
            configuration_failures: Counter::new(),
            persistence_queued: Counter::new(),
            achievements_unlocked: Counter::new(),
            in_flight: Gauge::new(),
            queued: Gauge::new(),
            grade_duration: Histogram::new_latency(),
        }
    }

    pub fn record_verdict(&self, status: VerdictStatus, elapsed: Duration) {
        self.verdicts[status_index(status)].inc();
        self.grade_duration.observe(elapsed);
    }

    pub fn verdicts(&self, status: VerdictStatus) -> u64 {
        self.verdicts[status_index(status)].get()
    }

    pub fn verdicts_total(&self) -> u64 {
        self.verdicts.iter().map(Counter::get).sum()
    }

    /// Prometheus text exposition
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# TYPE gradebox_verdicts_total counter\n");
        for status in VerdictStatus::ALL {
            output.push_str(&format!(
                "gradebox_verdicts_total{{status=\"{}\"}} {}\n",
                status.as_str(),
                self.verdicts(status)
            ));
        }

        let counters = [
            ("gradebox_cases_executed_total", &self.cases_executed),
            ("gradebox_sandbox_retries_total", &self.sandbox_retries),
            ("gradebox_system_failures_total", &self.system_failures),
            ("gradebox_cancellations_total", &self.cancellations),
            ("gradebox_backpressure_total", &self.backpressure_rejections),
            ("gradebox_configuration_failures_total", &self.configuration_failures),
            ("gradebox_persistence_queued_total", &self.persistence_queued),
            ("gradebox_achievements_unlocked_total", &self.achievements_unlocked),
        ];
        for (name, counter) in counters {
            output.push_str(&format!("# TYPE {} counter\n{} {}\n", name, name, counter.get()));
        }

        for (name, gauge) in [
            ("gradebox_in_flight", &self.in_flight),
            ("gradebox_queued", &self.queued),
        ] {
            output.push_str(&format!("# TYPE {} gauge\n{} {}\n", name, name, gauge.get()));
        }

        self.grade_duration
            .write_prometheus("gradebox_grade_duration_seconds", &mut output);
        output
    }
}

impl Default for GradingMetrics {
    fn default() -> Self {
        Self::new()
    }
}
