//! Normalized metric to data point encoding

use crate::models::{DataPoint, Dimension, MetricName, NormalizedMetric, StandardUnit};

/// Value used for dimensions whose source field is missing
pub const NO_VALUE: &str = "<no value>";

/// Number of data points produced per normalized metric
pub const DATA_POINTS_PER_METRIC: usize = 5;

/// Encodes normalized metrics into the data points sent to the ingestion API
#[derive(Debug, Clone, Default)]
pub struct MetricEncoder {
    host_id: Option<String>,
}

impl MetricEncoder {
    /// `host_id` adds an `InstanceId` dimension to every data point when set
    pub fn new(host_id: Option<String>) -> Self {
        Self { host_id }
    }

    /// Dimension set shared by all data points of one metric.
    ///
    /// The ECS dimensions and `ContainerName` are mutually exclusive, chosen by
    /// whether the ECS container name label is present.
    pub fn dimensions(&self, metric: &NormalizedMetric) -> Vec<Dimension> {
        let mut dimensions = Vec::with_capacity(4);

        dimensions.push(Dimension::new(
            "ImageName",
            metric.image_name.as_deref().unwrap_or(NO_VALUE),
        ));

        if let Some(host_id) = &self.host_id {
            dimensions.push(Dimension::new("InstanceId", host_id.as_str()));
        }

        match &metric.ecs_container_name {
            Some(ecs_container_name) => {
                dimensions.push(Dimension::new("ECSContainerName", ecs_container_name.as_str()));
                dimensions.push(Dimension::new(
                    "ECSTaskFamily",
                    metric.ecs_task_family.as_deref().unwrap_or(NO_VALUE),
                ));
            }
            None => {
                dimensions.push(Dimension::new("ContainerName", metric.container_name.as_str()));
            }
        }

        dimensions
    }

    pub fn encode(&self, metric: &NormalizedMetric) -> [DataPoint; DATA_POINTS_PER_METRIC] {
        let dimensions = self.dimensions(metric);
        let point = |metric_name, value: f64, unit| DataPoint {
            metric_name,
            dimensions: dimensions.clone(),
            timestamp: metric.timestamp,
            value,
            unit,
        };

        [
            point(
                MetricName::MemoryUsage,
                metric.memory_usage_bytes as f64,
                StandardUnit::Bytes,
            ),
            point(
                MetricName::MemoryPercent,
                metric.memory_percent,
                StandardUnit::Percent,
            ),
            point(
                MetricName::CpuUtilization,
                metric.cpu_percent,
                StandardUnit::Percent,
            ),
            point(
                MetricName::NetworkIn,
                metric.network_in_delta as f64,
                StandardUnit::Bytes,
            ),
            point(
                MetricName::NetworkOut,
                metric.network_out_delta as f64,
                StandardUnit::Bytes,
            ),
        ]
    }

    /// Encode a batch, keeping input order
    pub fn encode_all(&self, metrics: &[NormalizedMetric]) -> Vec<DataPoint> {
        metrics.iter().flat_map(|m| self.encode(m)).collect()
    }
}
