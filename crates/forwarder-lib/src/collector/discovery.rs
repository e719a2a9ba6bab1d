//! Container discovery and lifecycle events
//!
//! Watches for container start/stop via filesystem notifications on the
//! cgroup directories container runtimes create, and performs the initial
//! scan for containers that were already running at startup.

use super::{extract_container_id, CgroupV1Collector, CgroupV2Collector, StatsCollector};
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Container lifecycle events carrying the full container id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    Started(String),
    Stopped(String),
}

/// Watches cgroup directories for container lifecycle events
pub struct ContainerWatcher {
    /// Root path for cgroup filesystem
    cgroup_root: PathBuf,
    /// Whether using cgroup v2
    is_v2: bool,
    /// Event sender
    event_tx: mpsc::Sender<ContainerEvent>,
}

impl ContainerWatcher {
    /// Create a new container watcher
    pub fn new(
        cgroup_root: impl Into<PathBuf>,
        is_v2: bool,
        event_tx: mpsc::Sender<ContainerEvent>,
    ) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            is_v2,
            event_tx,
        }
    }

    /// Start watching for container events
    /// Returns a handle that stops watching when dropped
    pub fn start(self) -> Result<WatcherHandle> {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create filesystem watcher")?;

        for path in self.watch_paths() {
            if path.exists() {
                watcher
                    .watch(&path, RecursiveMode::Recursive)
                    .with_context(|| format!("Failed to watch {}", path.display()))?;
                info!(path = %path.display(), "Watching cgroup directory");
            }
        }

        let event_tx = self.event_tx;
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                for container_event in Self::translate(&event) {
                    if event_tx.send(container_event).await.is_err() {
                        debug!("Lifecycle event receiver dropped");
                        return;
                    }
                }
            }
            debug!("Watcher channel closed");
        });

        Ok(WatcherHandle {
            _watcher: watcher,
            _task: task,
        })
    }

    /// Get paths to watch based on cgroup version
    fn watch_paths(&self) -> Vec<PathBuf> {
        if self.is_v2 {
            CgroupV2Collector::container_parents(&self.cgroup_root)
        } else {
            CgroupV1Collector::container_parents(&self.cgroup_root)
        }
    }

    /// Translate a filesystem event into lifecycle events.
    ///
    /// Only the final path component is considered, so files created inside
    /// an existing container cgroup never produce a second start event.
    pub fn translate(event: &Event) -> Vec<ContainerEvent> {
        let mut events = Vec::new();

        for path in &event.paths {
            let Some(container_id) = Self::container_id_of(path) else {
                continue;
            };

            match event.kind {
                EventKind::Create(_) if path.is_dir() => {
                    debug!(container_id = %container_id, path = %path.display(), "Container started");
                    events.push(ContainerEvent::Started(container_id));
                }
                EventKind::Remove(_) => {
                    debug!(container_id = %container_id, path = %path.display(), "Container stopped");
                    events.push(ContainerEvent::Stopped(container_id));
                }
                _ => {}
            }
        }

        events
    }

    fn container_id_of(path: &Path) -> Option<String> {
        let name = path.file_name()?.to_string_lossy();
        extract_container_id(&name)
    }
}

/// Handle to a running watcher
/// Stops watching when dropped
pub struct WatcherHandle {
    _watcher: RecommendedWatcher,
    _task: tokio::task::JoinHandle<()>,
}

/// Emit a start event for every container already present, so containers
/// running before the forwarder started are tracked too
pub async fn discover_existing_containers(
    collector: &dyn StatsCollector,
    event_tx: &mpsc::Sender<ContainerEvent>,
) -> Result<usize> {
    let containers = collector.list_containers().await?;
    let count = containers.len();

    for container in containers {
        if event_tx
            .send(ContainerEvent::Started(container.container_id))
            .await
            .is_err()
        {
            warn!("Lifecycle event receiver dropped during discovery");
            break;
        }
    }

    info!(count, "Discovered existing containers");
    Ok(count)
}
