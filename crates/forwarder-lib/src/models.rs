//! Core data models for the forwarder

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of leading id characters used as the registry key
pub const SHORT_ID_LEN: usize = 12;

/// ECS label carrying the task definition family
pub const ECS_TASK_FAMILY_LABEL: &str = "com.amazonaws.ecs.task-definition-family";

/// ECS label carrying the container name from the task definition
pub const ECS_CONTAINER_NAME_LABEL: &str = "com.amazonaws.ecs.container-name";

/// Truncate a container id to the short form used as registry key.
///
/// Ids shorter than [`SHORT_ID_LEN`] are returned unchanged.
pub fn short_id(container_id: &str) -> &str {
    container_id.get(..SHORT_ID_LEN).unwrap_or(container_id)
}

/// Identity metadata resolved by inspecting a container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerIdentity {
    pub id: String,
    pub name: String,
    pub image_name: Option<String>,
    pub ecs_task_family: Option<String>,
    pub ecs_container_name: Option<String>,
}

impl ContainerIdentity {
    /// Build an identity from raw runtime fields.
    ///
    /// The runtime reports names with a leading `/`, which is stripped.
    pub fn from_runtime(
        id: impl Into<String>,
        name: &str,
        image_name: Option<String>,
        labels: Option<&HashMap<String, String>>,
    ) -> Self {
        let label = |key: &str| labels.and_then(|l| l.get(key)).cloned();

        Self {
            id: id.into(),
            name: name.strip_prefix('/').unwrap_or(name).to_string(),
            image_name,
            ecs_task_family: label(ECS_TASK_FAMILY_LABEL),
            ecs_container_name: label(ECS_CONTAINER_NAME_LABEL),
        }
    }
}

/// Cumulative counters tracked per container for delta computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterName {
    NetworkRxBytes,
    NetworkTxBytes,
}

/// Registry entry for a running container
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerRecord {
    pub identity: ContainerIdentity,
    pub previous_counters: HashMap<CounterName, u64>,
}

impl ContainerRecord {
    pub fn new(identity: ContainerIdentity) -> Self {
        Self {
            identity,
            previous_counters: HashMap::new(),
        }
    }

    /// Replace the baseline for `counter` with `current` and return the
    /// difference to the previous baseline.
    ///
    /// The first observation seeds the baseline and yields zero. A counter
    /// that went backwards (runtime reset) also yields zero.
    pub fn advance_counter(&mut self, counter: CounterName, current: u64) -> u64 {
        let previous = self
            .previous_counters
            .insert(counter, current)
            .unwrap_or(current);
        current.saturating_sub(previous)
    }
}

/// CPU counters from a raw sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuStats {
    /// Cumulative CPU time in nanoseconds
    pub total_usage: u64,
    /// Utilization percent computed by the sampler
    pub cpu_percent: f64,
}

/// Memory counters from a raw sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub usage: u64,
    pub limit: u64,
}

/// Network counters from a raw sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleStats {
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub network: NetworkStats,
}

/// Resource usage snapshot emitted by the sample source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Short container id matching a registry key
    pub container_key: String,
    pub stats: SampleStats,
}

/// Per-sample record held in the flush buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMetric {
    pub container_id: String,
    pub container_name: String,
    pub image_name: Option<String>,
    pub ecs_task_family: Option<String>,
    pub ecs_container_name: Option<String>,
    pub cpu_usage: u64,
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_percent: f64,
    pub network_in_delta: u64,
    pub network_out_delta: u64,
    pub timestamp: DateTime<Utc>,
}

/// Metric names accepted by the ingestion API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricName {
    MemoryUsage,
    MemoryPercent,
    #[serde(rename = "CPUUtilization")]
    CpuUtilization,
    NetworkIn,
    NetworkOut,
}

/// Units accepted by the ingestion API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StandardUnit {
    Bytes,
    Percent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// One data point as sent to the ingestion API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataPoint {
    pub metric_name: MetricName,
    pub dimensions: Vec<Dimension>,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub unit: StandardUnit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_truncates_to_twelve() {
        assert_eq!(short_id("abcdef123456789"), "abcdef123456");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_identity_from_runtime() {
        let mut labels = HashMap::new();
        labels.insert(ECS_TASK_FAMILY_LABEL.to_string(), "web-task".to_string());
        labels.insert(ECS_CONTAINER_NAME_LABEL.to_string(), "web".to_string());

        let identity = ContainerIdentity::from_runtime(
            "abcdef123456789",
            "/web-1",
            Some("nginx:latest".to_string()),
            Some(&labels),
        );

        assert_eq!(identity.name, "web-1");
        assert_eq!(identity.ecs_task_family.as_deref(), Some("web-task"));
        assert_eq!(identity.ecs_container_name.as_deref(), Some("web"));
    }

    #[test]
    fn test_advance_counter() {
        let identity = ContainerIdentity::from_runtime("abc", "/c", None, None);
        let mut record = ContainerRecord::new(identity);

        assert_eq!(record.advance_counter(CounterName::NetworkRxBytes, 500_000), 0);
        assert_eq!(record.advance_counter(CounterName::NetworkRxBytes, 500_250), 250);
        // Counter reset re-seeds the baseline
        assert_eq!(record.advance_counter(CounterName::NetworkRxBytes, 10), 0);
        assert_eq!(record.advance_counter(CounterName::NetworkRxBytes, 40), 30);
    }

    #[test]
    fn test_data_point_wire_format() {
        let point = DataPoint {
            metric_name: MetricName::CpuUtilization,
            dimensions: vec![Dimension::new("ImageName", "nginx:latest")],
            timestamp: Utc::now(),
            value: 12.5,
            unit: StandardUnit::Percent,
        };

        let json = serde_json::to_value(&point).unwrap();
        assert_eq!(json["MetricName"], "CPUUtilization");
        assert_eq!(json["Unit"], "Percent");
        assert_eq!(json["Dimensions"][0]["Name"], "ImageName");
        assert_eq!(json["Dimensions"][0]["Value"], "nginx:latest");
    }
}
