//! Observability infrastructure for the stats forwarder
//!
//! Provides:
//! - Prometheus metrics (sample throughput, registry size, flush and dispatch outcomes)
//! - Structured JSON logging of lifecycle events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter,
    IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for ingestion API round trips (in seconds)
const DISPATCH_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    samples_received: IntCounter,
    samples_dropped: IntCounter,
    containers_tracked: IntGauge,
    buffered_metrics: IntGauge,
    flush_cycles: IntCounter,
    data_points_sent: IntCounter,
    dispatch_failures: IntCounter,
    dispatch_latency_seconds: Histogram,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            samples_received: register_int_counter!(
                "stats_forwarder_samples_received_total",
                "Raw samples received from the sample source"
            )
            .expect("Failed to register samples_received"),

            samples_dropped: register_int_counter!(
                "stats_forwarder_samples_dropped_total",
                "Samples dropped because their container was not registered"
            )
            .expect("Failed to register samples_dropped"),

            containers_tracked: register_int_gauge!(
                "stats_forwarder_containers_tracked",
                "Containers currently held in the registry"
            )
            .expect("Failed to register containers_tracked"),

            buffered_metrics: register_int_gauge!(
                "stats_forwarder_buffered_metrics",
                "Normalized metrics waiting for the next flush"
            )
            .expect("Failed to register buffered_metrics"),

            flush_cycles: register_int_counter!(
                "stats_forwarder_flush_cycles_total",
                "Completed flush cycles"
            )
            .expect("Failed to register flush_cycles"),

            data_points_sent: register_int_counter!(
                "stats_forwarder_data_points_sent_total",
                "Data points accepted by the ingestion API"
            )
            .expect("Failed to register data_points_sent"),

            dispatch_failures: register_int_counter!(
                "stats_forwarder_dispatch_failures_total",
                "Flush cycles whose dispatch failed"
            )
            .expect("Failed to register dispatch_failures"),

            dispatch_latency_seconds: register_histogram!(
                "stats_forwarder_dispatch_latency_seconds",
                "Time spent sending one flush cycle to the ingestion API",
                DISPATCH_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register dispatch_latency_seconds"),
        }
    }
}

/// Forwarder metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn inc_samples_received(&self) {
        self.inner().samples_received.inc();
    }

    pub fn inc_samples_dropped(&self) {
        self.inner().samples_dropped.inc();
    }

    pub fn set_containers_tracked(&self, count: usize) {
        self.inner().containers_tracked.set(count as i64);
    }

    pub fn set_buffered_metrics(&self, count: usize) {
        self.inner().buffered_metrics.set(count as i64);
    }

    pub fn inc_flush_cycles(&self) {
        self.inner().flush_cycles.inc();
    }

    pub fn add_data_points_sent(&self, count: usize) {
        self.inner().data_points_sent.inc_by(count as u64);
    }

    pub fn inc_dispatch_failures(&self) {
        self.inner().dispatch_failures.inc();
    }

    /// Record one dispatch round trip
    pub fn observe_dispatch_latency(&self, duration_secs: f64) {
        self.inner().dispatch_latency_seconds.observe(duration_secs);
    }
}

/// Structured logger for forwarder events
///
/// Every event carries an `event` field so log pipelines can select on it.
#[derive(Clone)]
pub struct StructuredLogger {
    host: String,
}

impl StructuredLogger {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    pub fn log_startup(&self, version: &str, namespace: &str, dry_run: bool) {
        info!(
            event = "forwarder_started",
            host = %self.host,
            forwarder_version = %version,
            namespace = %namespace,
            dry_run = dry_run,
            "Stats forwarder started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "forwarder_shutdown",
            host = %self.host,
            reason = %reason,
            "Stats forwarder shutting down"
        );
    }

    pub fn log_container_started(&self, container_id: &str, name: &str, image: Option<&str>) {
        info!(
            event = "container_started",
            host = %self.host,
            container_id = %container_id,
            name = %name,
            image = image.unwrap_or_default(),
            "Tracking container"
        );
    }

    pub fn log_container_stopped(&self, container_id: &str, name: &str) {
        info!(
            event = "container_stopped",
            host = %self.host,
            container_id = %container_id,
            name = %name,
            "Stopped tracking container"
        );
    }

    pub fn log_flush_completed(&self, metrics: usize, data_points: usize, chunks: usize) {
        info!(
            event = "flush_completed",
            host = %self.host,
            metrics = metrics,
            data_points = data_points,
            chunks = chunks,
            "Flushed container metrics"
        );
    }

    pub fn log_flush_failed(&self, error: &str, accepted_chunks: usize, total_chunks: usize) {
        warn!(
            event = "flush_failed",
            host = %self.host,
            error = %error,
            accepted_chunks = accepted_chunks,
            total_chunks = total_chunks,
            "Flush failed, remaining metrics for this cycle are discarded"
        );
    }
}
