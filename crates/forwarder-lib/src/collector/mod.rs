//! Container lifecycle and resource sample sources
//!
//! This module provides the external collaborators feeding the aggregator:
//! - cgroup v2 (unified) and cgroup v1 (legacy) stats collectors
//! - a filesystem watcher turning cgroup directory changes into start/stop events
//! - an inspector resolving container identity from the docker state directory
//! - the sampling loop pushing raw samples on a fixed interval

mod cgroup_v1;
mod cgroup_v2;
mod discovery;
mod inspect;
mod r#loop;


pub use cgroup_v1::{detect_cgroup_version, CgroupV1Collector, CgroupVersion};
pub use cgroup_v2::CgroupV2Collector;
pub use discovery::{discover_existing_containers, ContainerEvent, ContainerWatcher, WatcherHandle};
pub use inspect::{ContainerInspector, DockerConfigInspector};
pub use r#loop::{SamplingConfig, SamplingLoop};

use crate::models::RawSample;
use anyhow::{Context, Result};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;

pub use async_trait::async_trait;

/// A container cgroup found on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCgroup {
    /// Full 64-character container id
    pub container_id: String,
    /// Container cgroup directory (memory controller directory on v1)
    pub cgroup_path: PathBuf,
}

/// Trait for raw sample collection implementations
#[async_trait]
pub trait StatsCollector: Send + Sync {
    /// Take one usage sample for a container
    async fn sample(&self, container: &ContainerCgroup) -> Result<RawSample>;

    /// List all container cgroups currently present
    async fn list_containers(&self) -> Result<Vec<ContainerCgroup>>;
}

/// Create the appropriate collector based on detected cgroup version
pub async fn create_collector(
    cgroup_root: &Path,
    proc_path: &Path,
) -> Result<Arc<dyn StatsCollector>> {
    let version = detect_cgroup_version(cgroup_root).await;

    match version {
        CgroupVersion::V2 => {
            tracing::info!("Detected cgroup v2, using unified hierarchy collector");
            Ok(Arc::new(CgroupV2Collector::with_proc_path(
                cgroup_root,
                proc_path,
            )))
        }
        CgroupVersion::V1 => {
            tracing::info!("Detected cgroup v1, using legacy hierarchy collector");
            Ok(Arc::new(CgroupV1Collector::with_proc_path(
                cgroup_root,
                proc_path,
            )))
        }
        CgroupVersion::Unknown => {
            tracing::warn!("Could not detect cgroup version, defaulting to v2");
            Ok(Arc::new(CgroupV2Collector::with_proc_path(
                cgroup_root,
                proc_path,
            )))
        }
    }
}

fn is_container_id(candidate: &str) -> bool {
    candidate.len() == 64 && candidate.chars().all(|c| c.is_ascii_hexdigit())
}

/// Extract a container ID from a cgroup path
///
/// Handles the container runtime formats for both hierarchies:
/// - Docker (cgroupfs driver): /docker/<container_id>
/// - Docker (systemd driver): /system.slice/docker-<container_id>.scope
/// - containerd: /kubepods/pod<pod_id>/cri-containerd-<container_id>.scope
/// - CRI-O: /kubepods.slice/.../crio-<container_id>.scope
pub fn extract_container_id(cgroup_path: &str) -> Option<String> {
    for part in cgroup_path.split('/').rev() {
        let unscoped = part.strip_suffix(".scope").unwrap_or(part);

        for prefix in ["docker-", "cri-containerd-", "crio-"] {
            if let Some(id) = unscoped.strip_prefix(prefix) {
                if is_container_id(id) {
                    return Some(id.to_string());
                }
            }
        }

        if is_container_id(part) {
            return Some(part.to_string());
        }
    }

    None
}

/// Parse a whitespace separated `key value` stat file into pairs
pub fn parse_flat_keyed(content: &str) -> impl Iterator<Item = (&str, u64)> {
    content.lines().filter_map(|line| {
        let mut parts = line.split_whitespace();
        let key = parts.next()?;
        let value = parts.next()?.parse().ok()?;
        Some((key, value))
    })
}

/// Parse /proc/<pid>/net/dev and sum (rx_bytes, tx_bytes) over all
/// interfaces except loopback
pub fn parse_net_dev(content: &str) -> (u64, u64) {
    let mut rx_total = 0u64;
    let mut tx_total = 0u64;

    // Two header lines precede the per-interface rows
    for line in content.lines().skip(2) {
        let Some((iface, counters)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }

        let fields: Vec<u64> = counters
            .split_whitespace()
            .map(|f| f.parse().unwrap_or(0))
            .collect();

        // Receive block is 8 columns wide; tx_bytes is the first transmit column
        if fields.len() >= 9 {
            rx_total = rx_total.saturating_add(fields[0]);
            tx_total = tx_total.saturating_add(fields[8]);
        }
    }

    (rx_total, tx_total)
}

/// Read the network counters of the namespace the container lives in.
///
/// Uses the first pid listed in `cgroup.procs`; a cgroup with no live
/// process reports zero traffic.
pub async fn read_network_counters(proc_path: &Path, cgroup_path: &Path) -> Result<(u64, u64)> {
    let procs = fs::read_to_string(cgroup_path.join("cgroup.procs"))
        .await
        .with_context(|| format!("Failed to read cgroup.procs in {}", cgroup_path.display()))?;

    let Some(pid) = procs.lines().find_map(|l| l.trim().parse::<u32>().ok()) else {
        return Ok((0, 0));
    };

    let net_dev_path = proc_path.join(pid.to_string()).join("net/dev");
    let content = fs::read_to_string(&net_dev_path)
        .await
        .with_context(|| format!("Failed to read {}", net_dev_path.display()))?;

    Ok(parse_net_dev(&content))
}

/// Read total host memory from /proc/meminfo, used when a cgroup has no limit
pub async fn read_host_memory(proc_path: &Path) -> Option<u64> {
    let content = fs::read_to_string(proc_path.join("meminfo")).await.ok()?;

    content.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        let kib: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
        Some(kib * 1024)
    })
}

/// Tracks the previous CPU reading per container to turn cumulative CPU
/// time into a utilization percentage
#[derive(Debug)]
pub struct CpuTracker {
    previous: DashMap<String, (u64, Instant)>,
    online_cpus: u32,
}

impl Default for CpuTracker {
    fn default() -> Self {
        let online_cpus = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1);
        Self::with_cpus(online_cpus)
    }
}

impl CpuTracker {
    pub fn with_cpus(online_cpus: u32) -> Self {
        Self {
            previous: DashMap::new(),
            online_cpus: online_cpus.max(1),
        }
    }

    /// Record a cumulative reading and return the utilization since the
    /// previous one, normalized to 0-100 across all online CPUs
    pub fn percent(&self, container_id: &str, total_usage_ns: u64, now: Instant) -> f64 {
        let previous = self
            .previous
            .insert(container_id.to_string(), (total_usage_ns, now));

        let Some((prev_usage, prev_time)) = previous else {
            return 0.0;
        };

        let wall_ns = now.saturating_duration_since(prev_time).as_nanos() as f64;
        if wall_ns <= 0.0 {
            return 0.0;
        }

        let cpu_ns = total_usage_ns.saturating_sub(prev_usage) as f64;
        (cpu_ns / (wall_ns * self.online_cpus as f64) * 100.0).clamp(0.0, 100.0)
    }

    /// Drop state for containers no longer present
    pub fn retain(&self, live: &[ContainerCgroup]) {
        self.previous
            .retain(|id, _| live.iter().any(|c| &c.container_id == id));
    }
}
