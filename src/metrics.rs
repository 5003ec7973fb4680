//! Prometheus-compatible metrics for request lifecycle and kernel dispatch.
//!
//! Each compiled network owns one [`Metrics`] instance; `export` renders it
//! in Prometheus text format.

use prometheus_client::{
    encoding::text::encode,
    metrics::counter::Counter,
    metrics::gauge::Gauge,
    metrics::histogram::{exponential_buckets, Histogram},
    registry::Registry,
};
use std::sync::Arc;
use std::time::Instant;

/// All lock-free; updates are atomic.
#[derive(Debug)]
pub struct Metrics {
    pub registry: Registry,

    pub requests_started: Counter<u64>,
    pub requests_completed: Counter<u64>,
    pub requests_failed: Counter<u64>,
    pub requests_cancelled: Counter<u64>,

    /// Kernel calls across all subgraph nodes
    pub kernel_invocations: Counter<u64>,

    pub active_requests: Gauge<i64>,

    pub infer_duration_seconds: Histogram,
    pub schedule_definition_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_started = Counter::default();
        registry.register(
            "snippetforge_requests_started",
            "Total number of infer requests started",
            requests_started.clone(),
        );

        let requests_completed = Counter::default();
        registry.register(
            "snippetforge_requests_completed",
            "Total number of infer requests completed",
            requests_completed.clone(),
        );

        let requests_failed = Counter::default();
        registry.register(
            "snippetforge_requests_failed",
            "Total number of infer requests failed",
            requests_failed.clone(),
        );

        let requests_cancelled = Counter::default();
        registry.register(
            "snippetforge_requests_cancelled",
            "Total number of infer requests cancelled",
            requests_cancelled.clone(),
        );

        let kernel_invocations = Counter::default();
        registry.register(
            "snippetforge_kernel_invocations",
            "Total number of compiled kernel calls",
            kernel_invocations.clone(),
        );

        let active_requests = Gauge::default();
        registry.register(
            "snippetforge_active_requests",
            "Current number of busy infer requests",
            active_requests.clone(),
        );

        // Buckets: 10us .. 100s
        let infer_duration_seconds = Histogram::new(exponential_buckets(0.00001, 10.0, 8));
        registry.register(
            "snippetforge_infer_duration_seconds",
            "Infer request duration in seconds",
            infer_duration_seconds.clone(),
        );

        let schedule_definition_seconds = Histogram::new(exponential_buckets(0.00001, 10.0, 8));
        registry.register(
            "snippetforge_schedule_definition_seconds",
            "Subgraph schedule definition time in seconds",
            schedule_definition_seconds.clone(),
        );

        Metrics {
            registry,
            requests_started,
            requests_completed,
            requests_failed,
            requests_cancelled,
            kernel_invocations,
            active_requests,
            infer_duration_seconds,
            schedule_definition_seconds,
        }
    }

    pub fn record_request_start(&self) {
        self.requests_started.inc();
        self.active_requests.inc();
    }

    pub fn record_request_complete(&self) {
        self.requests_completed.inc();
        self.active_requests.dec();
    }

    pub fn record_request_failed(&self) {
        self.requests_failed.inc();
        self.active_requests.dec();
    }

    pub fn record_request_cancelled(&self) {
        self.requests_cancelled.inc();
        self.active_requests.dec();
    }

    pub fn record_kernel_invocations(&self, count: u64) {
        self.kernel_invocations.inc_by(count);
    }

    pub fn record_infer_duration(&self, duration_sec: f64) {
        self.infer_duration_seconds.observe(duration_sec);
    }

    pub fn record_schedule_duration(&self, duration_sec: f64) {
        self.schedule_definition_seconds.observe(duration_sec);
    }

    /// Prometheus text format
    pub fn export(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Records the duration of a phase when dropped.
pub struct PhaseTimer {
    metrics: Option<Arc<Metrics>>,
    phase: Phase,
    start: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Schedule,
    Infer,
}

impl PhaseTimer {
    pub fn new(metrics: Option<Arc<Metrics>>, phase: Phase) -> Self {
        PhaseTimer {
            metrics,
            phase,
            start: Instant::now(),
        }
    }

    /// Record now instead of at drop.
    pub fn finish(self) {
        drop(self);
    }

    fn record(&self) {
        if let Some(metrics) = &self.metrics {
            let duration = self.start.elapsed().as_secs_f64();
            match self.phase {
                Phase::Schedule => metrics.record_schedule_duration(duration),
                Phase::Infer => metrics.record_infer_duration(duration),
            }
        }
    }
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        self.record();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new();
        assert_eq!(metrics.requests_started.get(), 0);
        assert_eq!(metrics.active_requests.get(), 0);
    }

    #[test]
    fn test_request_lifecycle() {
        let metrics = Metrics::new();

        metrics.record_request_start();
        metrics.record_request_start();
        metrics.record_request_start();
        assert_eq!(metrics.active_requests.get(), 3);

        metrics.record_request_complete();
        metrics.record_request_failed();
        metrics.record_request_cancelled();

        assert_eq!(metrics.requests_started.get(), 3);
        assert_eq!(metrics.requests_completed.get(), 1);
        assert_eq!(metrics.requests_failed.get(), 1);
        assert_eq!(metrics.requests_cancelled.get(), 1);
        assert_eq!(metrics.active_requests.get(), 0);
    }

    #[test]
    fn test_export_contains_metric_names() {
        let metrics = Metrics::new();
        metrics.record_request_start();
        metrics.record_kernel_invocations(12);
        metrics.record_infer_duration(0.002);

        let output = metrics.export();
        assert!(output.contains("snippetforge_requests_started_total"));
        assert!(output.contains("snippetforge_kernel_invocations_total 12"));
        assert!(output.contains("snippetforge_infer_duration_seconds"));
        assert!(output.contains("snippetforge_active_requests 1"));
    }

    #[test]
    fn test_phase_timer_records_on_drop() {
        let metrics = Arc::new(Metrics::new());
        {
            let _timer = PhaseTimer::new(Some(metrics.clone()), Phase::Schedule);
        }
        PhaseTimer::new(Some(metrics.clone()), Phase::Infer).finish();

        let output = metrics.export();
        assert!(output.contains("snippetforge_schedule_definition_seconds_count 1"));
        assert!(output.contains("snippetforge_infer_duration_seconds_count 1"));
    }

    #[test]
    fn test_phase_timer_without_metrics() {
        let timer = PhaseTimer::new(None, Phase::Infer);
        timer.finish();
    }
}
