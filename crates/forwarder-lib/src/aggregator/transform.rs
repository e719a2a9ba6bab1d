//! Raw sample to normalized metric conversion

use super::ContainerRegistry;
use crate::models::{CounterName, NormalizedMetric, RawSample};
use chrono::Utc;
use std::sync::Arc;
use tracing::trace;

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    (value * 100.0).round() / 100.0
}

/// Memory usage as a percentage of the limit.
///
/// A zero limit means the limit is unknown; the percentage is reported as
/// zero so every sample still encodes to a full data point set.
pub fn memory_percent(usage: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    round2(usage as f64 / limit as f64 * 100.0)
}

/// Converts raw samples into normalized metrics using registry state.
///
/// This is the only writer of counter baselines after a record is created.
#[derive(Clone)]
pub struct SampleTransformer {
    registry: Arc<ContainerRegistry>,
}

impl SampleTransformer {
    pub fn new(registry: Arc<ContainerRegistry>) -> Self {
        Self { registry }
    }

    /// Transform one sample; `None` when the container is not registered
    pub fn transform(&self, sample: &RawSample) -> Option<NormalizedMetric> {
        let stats = &sample.stats;
        let timestamp = Utc::now();

        let metric = self.registry.update(&sample.container_key, |record| {
            let network_in_delta =
                record.advance_counter(CounterName::NetworkRxBytes, stats.network.rx_bytes);
            let network_out_delta =
                record.advance_counter(CounterName::NetworkTxBytes, stats.network.tx_bytes);
            let identity = &record.identity;

            NormalizedMetric {
                container_id: identity.id.clone(),
                container_name: identity.name.clone(),
                image_name: identity.image_name.clone(),
                ecs_task_family: identity.ecs_task_family.clone(),
                ecs_container_name: identity.ecs_container_name.clone(),
                cpu_usage: stats.cpu.total_usage,
                cpu_percent: round2(stats.cpu.cpu_percent),
                memory_usage_bytes: stats.memory.usage,
                memory_percent: memory_percent(stats.memory.usage, stats.memory.limit),
                network_in_delta,
                network_out_delta,
                timestamp,
            }
        });

        if metric.is_none() {
            trace!(key = %sample.container_key, "Dropping sample for unknown container");
        }

        metric
    }
}
