//! Periodic flush loop
//!
//! Each cycle drains the flush buffer, keeps the latest metric per
//! container, encodes the survivors and dispatches the data points.

use crate::aggregator::{dedupe, FlushBuffer};
use crate::dispatch::{ChunkedDispatcher, DispatchError, DispatchOutcome, MetricEncoder};
use crate::health::{components, HealthRegistry};
use crate::observability::{AgentMetrics, StructuredLogger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Time between flush cycles; the first cycle runs one full interval after start
    pub interval: Duration,
    /// Stop after the first cycle
    pub run_once: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            run_once: false,
        }
    }
}

/// Summary of one flush cycle
#[derive(Debug)]
pub struct CycleReport {
    /// Metrics left after deduplication
    pub metrics: usize,
    pub data_points: usize,
    pub result: Result<DispatchOutcome, DispatchError>,
}

pub struct FlushLoop {
    buffer: Arc<FlushBuffer>,
    encoder: MetricEncoder,
    dispatcher: ChunkedDispatcher,
    config: FlushConfig,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl FlushLoop {
    pub fn new(
        buffer: Arc<FlushBuffer>,
        encoder: MetricEncoder,
        dispatcher: ChunkedDispatcher,
        config: FlushConfig,
        metrics: AgentMetrics,
        logger: StructuredLogger,
        health: HealthRegistry,
    ) -> Self {
        Self {
            buffer,
            encoder,
            dispatcher,
            config,
            metrics,
            logger,
            health,
        }
    }

    /// Drain, dedupe, encode and dispatch once
    pub async fn run_cycle(&self) -> CycleReport {
        let drained = self.buffer.drain();
        self.metrics.set_buffered_metrics(self.buffer.len());

        let latest = dedupe(drained);
        let points = self.encoder.encode_all(&latest);

        let start = Instant::now();
        let result = self.dispatcher.dispatch(&points).await;
        self.metrics.inc_flush_cycles();

        let report = CycleReport {
            metrics: latest.len(),
            data_points: points.len(),
            result,
        };
        self.record(&report, start.elapsed()).await;
        report
    }

    async fn record(&self, report: &CycleReport, elapsed: Duration) {
        match &report.result {
            Ok(DispatchOutcome::Delivered(acks)) => {
                self.metrics.observe_dispatch_latency(elapsed.as_secs_f64());
                self.metrics.add_data_points_sent(report.data_points);
                self.logger
                    .log_flush_completed(report.metrics, report.data_points, acks.len());
                self.health.set_healthy(components::DISPATCHER).await;
            }
            Ok(DispatchOutcome::DryRun { payload }) => {
                info!(
                    metrics = report.metrics,
                    data_points = report.data_points,
                    "Dry run, printing payload instead of sending"
                );
                println!("{}", payload);
            }
            Err(DispatchError::Empty) => {
                info!("Nothing to report");
            }
            Err(DispatchError::Partial {
                accepted_chunks,
                total_chunks,
                source,
            }) => {
                self.metrics.observe_dispatch_latency(elapsed.as_secs_f64());
                self.metrics.inc_dispatch_failures();
                self.logger
                    .log_flush_failed(&source.to_string(), *accepted_chunks, *total_chunks);
                self.health
                    .set_degraded(components::DISPATCHER, source.to_string())
                    .await;
            }
            Err(e @ DispatchError::Payload(_)) => {
                self.metrics.inc_dispatch_failures();
                error!(error = %e, "Failed to build dispatch payload");
                self.health
                    .set_degraded(components::DISPATCHER, e.to_string())
                    .await;
            }
        }
    }

    /// Run cycles on the configured interval until shutdown, or once when
    /// `run_once` is set
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            run_once = self.config.run_once,
            namespace = %self.dispatcher.namespace(),
            "Starting flush loop"
        );

        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;

                    if self.config.run_once {
                        info!("Run-once cycle complete, stopping flush loop");
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down flush loop");
                    break;
                }
            }
        }
    }
}
