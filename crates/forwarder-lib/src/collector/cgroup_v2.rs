//! cgroup v2 stats collection
//!
//! Reads usage from the unified cgroup v2 hierarchy:
//! - cpu.stat for cumulative CPU time
//! - memory.current for current memory usage
//! - memory.max for the memory limit

use super::{
    extract_container_id, parse_flat_keyed, read_host_memory, read_network_counters,
    ContainerCgroup, CpuTracker, StatsCollector,
};
use crate::models::{short_id, CpuStats, MemoryStats, NetworkStats, RawSample, SampleStats};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tracing::debug;

/// Collector for cgroup v2 unified hierarchy
pub struct CgroupV2Collector {
    cgroup_root: PathBuf,
    proc_path: PathBuf,
    cpu: CpuTracker,
}

impl CgroupV2Collector {
    /// Create a new cgroup v2 collector
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

    /// Parent directories under which container cgroups appear
    pub fn container_parents(cgroup_root: &Path) -> Vec<PathBuf> {
        vec![
            cgroup_root.join("system.slice"),
            cgroup_root.join("docker"),
            cgroup_root.join("kubepods.slice"),
        ]
    }

    /// Parse cpu.stat file contents, returning usage in nanoseconds
    pub fn parse_cpu_usage_ns(content: &str) -> u64 {
        parse_flat_keyed(content)
            .find(|(key, _)| *key == "usage_usec")
            .map(|(_, usec)| usec.saturating_mul(1000))
            .unwrap_or(0)
    }

    /// Parse memory.max; `max` means the cgroup is unlimited
    pub fn parse_memory_max(content: &str) -> Option<u64> {
        match content.trim() {
            "max" => None,
            value => value.parse().ok(),
        }
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

    async fn memory_limit(&self, cgroup_path: &Path) -> u64 {
        let configured = fs::read_to_string(cgroup_path.join("memory.max"))
            .await
            .ok()
            .and_then(|c| Self::parse_memory_max(&c));

        match configured {
            Some(limit) => limit,
            None => read_host_memory(&self.proc_path).await.unwrap_or(0),
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
                    if entry_path.join("cpu.stat").exists() {
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
impl StatsCollector for CgroupV2Collector {
    async fn sample(&self, container: &ContainerCgroup) -> Result<RawSample> {
        let cgroup_path = &container.cgroup_path;
        if !cgroup_path.exists() {
            anyhow::bail!(
                "Cgroup path not found for container {}",
                container.container_id
            );
        }

        let cpu_stat_content = fs::read_to_string(cgroup_path.join("cpu.stat"))
            .await
            .unwrap_or_default();
        let total_usage = Self::parse_cpu_usage_ns(&cpu_stat_content);
        let cpu_percent = self
            .cpu
            .percent(&container.container_id, total_usage, Instant::now());

        let usage = Self::read_cgroup_value(cgroup_path, "memory.current")
            .await
            .unwrap_or(0);
        let limit = self.memory_limit(cgroup_path).await;

        let (rx_bytes, tx_bytes) = read_network_counters(&self.proc_path, cgroup_path)
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
