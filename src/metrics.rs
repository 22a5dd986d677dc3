//! Prometheus-compatible metrics for the Tributary pipeline.
//!
//! Every absorbed failure (a backend that timed out, a malformed engine
//! record, a failed rerank call) increments a counter here so degraded
//! requests stay observable even when they succeed.

use prometheus::{
    self, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get or initialize the global metrics instance.
pub fn get_metrics() -> Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new())).clone()
}

/// Default histogram buckets for latency tracking (in seconds).
/// Covers from 1ms to 10s with reasonable granularity.
fn default_latency_buckets() -> Vec<f64> {
    vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}

/// All metrics for the Tributary server.
pub struct Metrics {
    /// Prometheus registry for all metrics.
    pub registry: Registry,

    // =========================================================================
    // Counters
    // =========================================================================
    /// Total number of search requests received.
    pub search_requests_total: IntCounter,
    /// Total number of search requests that failed.
    pub search_failures_total: IntCounter,
    /// Total number of expansion failures (after retries).
    pub expansion_failures_total: IntCounter,
    /// Total number of requests that fell back to the raw query.
    pub expansion_fallbacks_total: IntCounter,
    /// Total number of expansion retries.
    pub expansion_retries_total: IntCounter,
    /// Expansion cache hits.
    pub expansion_cache_hits_total: IntCounter,
    /// Expansion cache misses.
    pub expansion_cache_misses_total: IntCounter,
    /// Backend failures, labelled by backend and failure kind.
    pub backend_failures_total: IntCounterVec,
    /// Candidates returned, labelled by backend.
    pub backend_candidates_total: IntCounterVec,
    /// Malformed records dropped while parsing backend output.
    pub malformed_records_total: IntCounterVec,
    /// Total number of rerank failures.
    pub rerank_failures_total: IntCounter,

    // =========================================================================
    // Gauges
    // =========================================================================
    /// Uptime in seconds.
    pub uptime_seconds: IntGauge,

    // =========================================================================
    // Histograms (durations in seconds)
    // =========================================================================
    /// End-to-end search duration.
    pub search_duration_seconds: Histogram,
    /// Query expansion duration.
    pub expansion_duration_seconds: Histogram,
    /// Per-backend retrieval duration.
    pub retrieval_duration_seconds: HistogramVec,
    /// Reranking duration.
    pub rerank_duration_seconds: Histogram,

    /// Server start time.
    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("failed to create counter");
    registry
        .register(Box::new(counter.clone()))
        .expect("failed to register metric");
    counter
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels).expect("failed to create counter");
    registry
        .register(Box::new(counter.clone()))
        .expect("failed to register metric");
    counter
}

fn histogram(registry: &Registry, name: &str, help: &str) -> Histogram {
    let histogram =
        Histogram::with_opts(HistogramOpts::new(name, help).buckets(default_latency_buckets()))
            .expect("failed to create histogram");
    registry
        .register(Box::new(histogram.clone()))
        .expect("failed to register metric");
    histogram
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Self {
        let registry = Registry::new();

        let search_requests_total = counter(
            &registry,
            "tributary_search_requests_total",
            "Total number of search requests received",
        );
        let search_failures_total = counter(
            &registry,
            "tributary_search_failures_total",
            "Total number of search requests that failed",
        );
        let expansion_failures_total = counter(
            &registry,
            "tributary_expansion_failures_total",
            "Total number of query expansion failures",
        );
        let expansion_fallbacks_total = counter(
            &registry,
            "tributary_expansion_fallbacks_total",
            "Total number of requests that used the raw query after expansion failed",
        );
        let expansion_retries_total = counter(
            &registry,
            "tributary_expansion_retries_total",
            "Total number of query expansion retries",
        );
        let expansion_cache_hits_total = counter(
            &registry,
            "tributary_expansion_cache_hits_total",
            "Total number of expansion cache hits",
        );
        let expansion_cache_misses_total = counter(
            &registry,
            "tributary_expansion_cache_misses_total",
            "Total number of expansion cache misses",
        );
        let backend_failures_total = counter_vec(
            &registry,
            "tributary_backend_failures_total",
            "Total number of retrieval backend failures",
            &["backend", "kind"],
        );
        let backend_candidates_total = counter_vec(
            &registry,
            "tributary_backend_candidates_total",
            "Total number of candidates returned by retrieval backends",
            &["backend"],
        );
        let malformed_records_total = counter_vec(
            &registry,
            "tributary_malformed_records_total",
            "Total number of malformed backend records dropped",
            &["backend"],
        );
        let rerank_failures_total = counter(
            &registry,
            "tributary_rerank_failures_total",
            "Total number of rerank failures",
        );

        let uptime_seconds = IntGauge::new("tributary_uptime_seconds", "Server uptime in seconds")
            .expect("failed to create gauge");
        registry
            .register(Box::new(uptime_seconds.clone()))
            .expect("failed to register metric");

        let search_duration_seconds = histogram(
            &registry,
            "tributary_search_duration_seconds",
            "End-to-end search duration in seconds",
        );
        let expansion_duration_seconds = histogram(
            &registry,
            "tributary_expansion_duration_seconds",
            "Query expansion duration in seconds",
        );
        let retrieval_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "tributary_retrieval_duration_seconds",
                "Per-backend retrieval duration in seconds",
            )
            .buckets(default_latency_buckets()),
            &["backend"],
        )
        .expect("failed to create histogram");
        registry
            .register(Box::new(retrieval_duration_seconds.clone()))
            .expect("failed to register metric");
        let rerank_duration_seconds = histogram(
            &registry,
            "tributary_rerank_duration_seconds",
            "Reranking duration in seconds",
        );

        Self {
            registry,
            search_requests_total,
            search_failures_total,
            expansion_failures_total,
            expansion_fallbacks_total,
            expansion_retries_total,
            expansion_cache_hits_total,
            expansion_cache_misses_total,
            backend_failures_total,
            backend_candidates_total,
            malformed_records_total,
            rerank_failures_total,
            uptime_seconds,
            search_duration_seconds,
            expansion_duration_seconds,
            retrieval_duration_seconds,
            rerank_duration_seconds,
            start_time: Instant::now(),
        }
    }

    /// Record a failed backend call.
    pub fn record_backend_failure(&self, backend: &str, kind: &str) {
        self.backend_failures_total
            .with_label_values(&[backend, kind])
            .inc();
    }

    /// Record malformed records dropped from a backend's output.
    pub fn record_malformed(&self, backend: &str, dropped: usize) {
        if dropped > 0 {
            self.malformed_records_total
                .with_label_values(&[backend])
                .inc_by(dropped as u64);
        }
    }

    /// Update the uptime gauge.
    pub fn update_uptime(&self) {
        let uptime = self.start_time.elapsed();
        self.uptime_seconds.set(uptime.as_secs() as i64);
    }

    /// Uptime since the metrics were created.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;
        self.update_uptime();

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Export a summary of the metrics as JSON.
    pub fn export_json(&self) -> MetricsSnapshot {
        self.update_uptime();
        MetricsSnapshot {
            search_requests_total: self.search_requests_total.get(),
            search_failures_total: self.search_failures_total.get(),
            expansion_failures_total: self.expansion_failures_total.get(),
            expansion_fallbacks_total: self.expansion_fallbacks_total.get(),
            rerank_failures_total: self.rerank_failures_total.get(),
            uptime_seconds: self.uptime_seconds.get(),
            search_duration_seconds: HistogramSnapshot::from_prometheus(
                &self.search_duration_seconds,
            ),
        }
    }

    /// Start a timer that records duration to a histogram when dropped.
    /// Returns a guard that will observe the duration in seconds.
    pub fn start_timer(histogram: &Histogram) -> HistogramTimer {
        HistogramTimer {
            histogram: histogram.clone(),
            start: Instant::now(),
        }
    }
}

/// Timer that records duration to a histogram when dropped.
pub struct HistogramTimer {
    histogram: Histogram,
    start: Instant,
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.histogram.observe(duration.as_secs_f64());
    }
}

/// Summary of the request-level metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub search_requests_total: u64,
    pub search_failures_total: u64,
    pub expansion_failures_total: u64,
    pub expansion_fallbacks_total: u64,
    pub rerank_failures_total: u64,
    pub uptime_seconds: i64,
    pub search_duration_seconds: HistogramSnapshot,
}

/// Snapshot of a histogram for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub mean: Option<f64>,
}

impl HistogramSnapshot {
    /// Create a snapshot from a prometheus histogram.
    pub fn from_prometheus(h: &Histogram) -> Self {
        let sample_count = h.get_sample_count();
        let sample_sum = h.get_sample_sum();
        let mean = if sample_count > 0 {
            Some(sample_sum / sample_count as f64)
        } else {
            None
        };
        Self {
            count: sample_count,
            sum: sample_sum,
            mean,
        }
    }
}

/// Health status for the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub version: String,
    pub uptime_seconds: u64,
    pub backends: Vec<String>,
}

/// Health state enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

impl HealthState {
    /// Convert to HTTP status code.
    pub fn to_status_code(self) -> u16 {
        match self {
            HealthState::Healthy => 200,
            HealthState::Unhealthy => 503,
        }
    }
}
