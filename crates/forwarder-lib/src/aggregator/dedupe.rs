//! Collapse a drained batch to one metric per container

use crate::models::NormalizedMetric;
use std::collections::HashMap;

/// Keep the most recently appended metric for each container id.
///
/// Output is ordered by each container's first appearance in `metrics`.
pub fn dedupe(metrics: Vec<NormalizedMetric>) -> Vec<NormalizedMetric> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(metrics.len());
    let mut latest: Vec<NormalizedMetric> = Vec::with_capacity(metrics.len());

    for metric in metrics {
        match slots.get(&metric.container_id) {
            Some(&slot) => latest[slot] = metric,
            None => {
                slots.insert(metric.container_id.clone(), latest.len());
                latest.push(metric);
            }
        }
    }

    latest
}
