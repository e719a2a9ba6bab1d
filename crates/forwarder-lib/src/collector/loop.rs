//! Sample collection loop
//!
//! Periodically lists the container cgroups on the host and pushes one raw
//! sample per container into a channel consumed by the aggregator.

use super::StatsCollector;
use crate::health::{components, HealthRegistry};
use crate::models::RawSample;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the sampling loop
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Sampling interval (default: 5 seconds)
    pub interval: Duration,
    /// Channel buffer size for collected samples
    pub buffer_size: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            buffer_size: 1000,
        }
    }
}

/// Sampling loop that periodically samples every container cgroup
pub struct SamplingLoop {
    collector: Arc<dyn StatsCollector>,
    config: SamplingConfig,
    samples_tx: mpsc::Sender<RawSample>,
    health: Option<HealthRegistry>,
}

/// Results from a sampling cycle
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SamplingResults {
    pub(crate) success_count: usize,
    pub(crate) error_count: usize,
    /// Listing the container cgroups failed, nothing was sampled
    pub(crate) list_failed: bool,
}

impl SamplingLoop {
    /// Create a new sampling loop
    pub fn new(
        collector: Arc<dyn StatsCollector>,
        config: SamplingConfig,
    ) -> (Self, mpsc::Receiver<RawSample>) {
        let (samples_tx, samples_rx) = mpsc::channel(config.buffer_size);

        let loop_instance = Self {
            collector,
            config,
            samples_tx,
            health: None,
        };

        (loop_instance, samples_rx)
    }

    /// Report listing failures as a degraded sampler
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Run until the shutdown signal fires
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting sampling loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let results = self.sample_all().await;

                    debug!(
                        containers = results.success_count,
                        errors = results.error_count,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Sampling cycle complete"
                    );

                    if let Some(health) = &self.health {
                        if results.list_failed {
                            health
                                .set_degraded(components::SAMPLER, "Failed to list container cgroups")
                                .await;
                        } else {
                            health.set_healthy(components::SAMPLER).await;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down sampling loop");
                    break;
                }
            }
        }
    }

    /// Sample all container cgroups currently present
    pub(crate) async fn sample_all(&self) -> SamplingResults {
        let mut results = SamplingResults::default();

        let containers = match self.collector.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "Failed to list container cgroups");
                results.list_failed = true;
                return results;
            }
        };

        for container in containers {
            match self.collector.sample(&container).await {
                Ok(sample) => {
                    results.success_count += 1;

                    if let Err(e) = self.samples_tx.send(sample).await {
                        warn!(error = %e, "Failed to send sample to channel");
                    }
                }
                Err(e) => {
                    results.error_count += 1;
                    debug!(
                        container_id = %container.container_id,
                        error = %e,
                        "Failed to sample container"
                    );
                }
            }
        }

        results
    }
}
