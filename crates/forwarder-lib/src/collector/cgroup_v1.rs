//! cgroup v1 stats collection (fallback)
//!
//! Reads usage from the legacy cgroup v1 hierarchy:
//! - cpuacct controller for cumulative CPU time
//! - memory controller for memory usage and limit

use super::{
    extract_container_id, read_host_memory, read_network_counters, ContainerCgroup, CpuTracker,
    StatsCollector,
};
use crate::models::{short_id, CpuStats, MemoryStats, NetworkStats, RawSample, SampleStats};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tracing::debug;

/// Values at or above this are the kernel's "no limit" marker
/// (PAGE_COUNTER_MAX rounded to the page size)
const UNLIMITED_THRESHOLD: u64 = 1 << 62;

/// Collector for legacy cgroup v1 hierarchy
pub struct CgroupV1Collector {
    /// Root path for cgroup v1 controllers (typically /sys/fs/cgroup)
    cgroup_root: PathBuf,
    /// Path to /proc filesystem
    proc_path: PathBuf,
    cpu: CpuTracker,
}

impl CgroupV1Collector {
    /// Create a new cgroup v1 collector
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self::with_proc_path(cgroup_root, "/proc")
    }

    /// Create collector with custom proc path (for testing)
    pub fn with_proc_path(cgroup_root: impl Into<PathBuf>, proc_path: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            proc_path: proc_path.into(),
            cpu: CpuTracker::default(),
        }
    }

    /// Parent directories in the memory controller under which container cgroups appear
    pub fn container_parents(cgroup_root: &Path) -> Vec<PathBuf> {
        let memory_root = cgroup_root.join("memory");
        vec![
            memory_root.join("docker"),
            memory_root.join("system.slice"),
            memory_root.join("kubepods"),
        ]
    }

    /// Read a single value from a cgroup file
    async fn read_cgroup_value(cgroup_path: &Path, filename: &str) -> Result<u64> {
        let file_path = cgroup_path.join(filename);
        let content = fs::read_to_string(&file_path)
            .await
            .with_context(|| format!("Failed to read {}", file_path.display()))?;

        content
            .trim()
            .parse()
            .with_context(|| format!("Failed to parse {} value", filename))
    }

    /// Map a memory controller directory onto the matching cpuacct directory
    pub fn cpuacct_path(&self, memory_path: &Path) -> PathBuf {
        let memory_root = self.cgroup_root.join("memory");
        match memory_path.strip_prefix(&memory_root) {
            Ok(relative) => self.cgroup_root.join("cpuacct").join(relative),
            Err(_) => memory_path.to_path_buf(),
        }
    }

    async fn memory_limit(&self, memory_path: &Path) -> u64 {
        match Self::read_cgroup_value(memory_path, "memory.limit_in_bytes").await {
            Ok(limit) if limit < UNLIMITED_THRESHOLD => limit,
            _ => read_host_memory(&self.proc_path).await.unwrap_or(0),
        }
    }

    /// Recursively scan cgroup directory for containers
    async fn scan_cgroup_dir(path: &Path) -> Result<Vec<ContainerCgroup>> {
        let mut containers = Vec::new();
        let mut entries = fs::read_dir(path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();

            if entry_path.is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();

                if let Some(container_id) = extract_container_id(&name) {
                    if entry_path.join("memory.usage_in_bytes").exists() {
                        containers.push(ContainerCgroup {
                            container_id,
                            cgroup_path: entry_path.clone(),
                        });
                        continue;
                    }
                }

                if let Ok(sub_containers) = Box::pin(Self::scan_cgroup_dir(&entry_path)).await {
                    containers.extend(sub_containers);
                }
            }
        }

        Ok(containers)
    }
}

#[async_trait]
impl StatsCollector for CgroupV1Collector {
    async fn sample(&self, container: &ContainerCgroup) -> Result<RawSample> {
        let memory_path = &container.cgroup_path;
        let cpuacct_path = self.cpuacct_path(memory_path);

        if !cpuacct_path.exists() && !memory_path.exists() {
            anyhow::bail!(
                "Cgroup paths not found for container {}",
                container.container_id
            );
        }

        let total_usage = Self::read_cgroup_value(&cpuacct_path, "cpuacct.usage")
            .await
            .unwrap_or(0);
        let cpu_percent = self
            .cpu
            .percent(&container.container_id, total_usage, Instant::now());

        let usage = Self::read_cgroup_value(memory_path, "memory.usage_in_bytes")
            .await
            .unwrap_or(0);
        let limit = self.memory_limit(memory_path).await;

        let (rx_bytes, tx_bytes) = read_network_counters(&self.proc_path, memory_path)
            .await
            .unwrap_or_else(|e| {
                debug!(container_id = %container.container_id, error = %e, "No network counters");
                (0, 0)
            });

        Ok(RawSample {
            container_key: short_id(&container.container_id).to_string(),
            stats: SampleStats {
                cpu: CpuStats {
                    total_usage,
                    cpu_percent,
                },
                memory: MemoryStats { usage, limit },
                network: NetworkStats { rx_bytes, tx_bytes },
            },
        })
    }

    async fn list_containers(&self) -> Result<Vec<ContainerCgroup>> {
        fs::metadata(&self.cgroup_root)
            .await
            .with_context(|| format!("Cgroup root {} is not readable", self.cgroup_root.display()))?;

        let mut containers = Vec::new();

        for parent in Self::container_parents(&self.cgroup_root) {
            if parent.exists() {
                let entries = Self::scan_cgroup_dir(&parent)
                    .await
                    .with_context(|| format!("Failed to scan {}", parent.display()))?;
                containers.extend(entries);
            }
        }

        self.cpu.retain(&containers);
        Ok(containers)
    }
}

/// Detect which cgroup version is available on the system
pub async fn detect_cgroup_version(cgroup_root: &Path) -> CgroupVersion {
    // Check for cgroup v2 unified hierarchy
    let v2_controllers = cgroup_root.join("cgroup.controllers");
    if fs::metadata(&v2_controllers).await.is_ok() {
        return CgroupVersion::V2;
    }

    // Check for cgroup v1 controllers
    let v1_memory = cgroup_root.join("memory");
    let v1_cpuacct = cgroup_root.join("cpuacct");
    if fs::metadata(&v1_memory).await.is_ok() && fs::metadata(&v1_cpuacct).await.is_ok() {
        return CgroupVersion::V1;
    }

    CgroupVersion::Unknown
}

/// Cgroup version detected on the system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    V1,
    V2,
    Unknown,
}
