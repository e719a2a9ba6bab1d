//! Aggregation core
//!
//! Consumes container lifecycle events and raw samples, keeps the registry
//! of running containers, converts samples into normalized metrics and
//! appends them to the flush buffer drained by the flush loop.

mod buffer;
mod dedupe;
mod filter;
mod registry;
mod transform;


pub use buffer::FlushBuffer;
pub use dedupe::dedupe;
pub use filter::ContainerFilter;
pub use registry::{ContainerRegistry, StartOutcome, StartTicket};
pub use transform::{memory_percent, round2, SampleTransformer};

use crate::collector::{ContainerEvent, ContainerInspector};
use crate::models::RawSample;
use crate::observability::{AgentMetrics, StructuredLogger};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Wires lifecycle events and samples into the registry and flush buffer
pub struct Aggregator {
    registry: Arc<ContainerRegistry>,
    transformer: SampleTransformer,
    buffer: Arc<FlushBuffer>,
    inspector: Arc<dyn ContainerInspector>,
    metrics: AgentMetrics,
    logger: StructuredLogger,
}

impl Aggregator {
    pub fn new(
        registry: Arc<ContainerRegistry>,
        buffer: Arc<FlushBuffer>,
        inspector: Arc<dyn ContainerInspector>,
        metrics: AgentMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            transformer: SampleTransformer::new(registry.clone()),
            registry,
            buffer,
            inspector,
            metrics,
            logger,
        }
    }

    pub fn registry(&self) -> &Arc<ContainerRegistry> {
        &self.registry
    }

    pub fn buffer(&self) -> &Arc<FlushBuffer> {
        &self.buffer
    }

    /// Apply a lifecycle event.
    ///
    /// Start events resolve identity on a separate task so a slow inspection
    /// never holds up sample ingestion; the task handle is returned. Stop
    /// events are applied immediately and cancel a start still being resolved.
    pub fn handle_event(&self, event: ContainerEvent) -> Option<JoinHandle<()>> {
        match event {
            ContainerEvent::Started(container_id) => {
                // Taken before spawning so a stop handled next sees the pending start
                let ticket = self.registry.begin_start(&container_id);
                let registry = self.registry.clone();
                let inspector = self.inspector.clone();
                let metrics = self.metrics.clone();
                let logger = self.logger.clone();

                Some(tokio::spawn(async move {
                    match registry.complete_start(ticket, inspector.as_ref()).await {
                        Ok(StartOutcome::Registered(key)) => {
                            if let Some(record) = registry.lookup(&key) {
                                logger.log_container_started(
                                    &container_id,
                                    &record.identity.name,
                                    record.identity.image_name.as_deref(),
                                );
                            }
                            metrics.set_containers_tracked(registry.len());
                        }
                        Ok(StartOutcome::Filtered) => {}
                        Ok(StartOutcome::Superseded) => {
                            debug!(
                                container_id = %container_id,
                                "Container stopped before its identity was resolved"
                            );
                        }
                        Err(e) => {
                            warn!(
                                container_id = %container_id,
                                error = %e,
                                "Failed to inspect container, it will not be tracked"
                            );
                        }
                    }
                }))
            }
            ContainerEvent::Stopped(container_id) => {
                if let Some(record) = self.registry.on_stop(&container_id) {
                    self.logger
                        .log_container_stopped(&container_id, &record.identity.name);
                    self.metrics.set_containers_tracked(self.registry.len());
                }
                None
            }
        }
    }

    /// Transform one sample into the flush buffer; false when it was dropped
    pub fn ingest(&self, sample: &RawSample) -> bool {
        self.metrics.inc_samples_received();

        match self.transformer.transform(sample) {
            Some(metric) => {
                let buffered = self.buffer.append(metric);
                self.metrics.set_buffered_metrics(buffered);
                true
            }
            None => {
                self.metrics.inc_samples_dropped();
                false
            }
        }
    }

    /// Consume events and samples until shutdown
    pub async fn run(
        self,
        mut events: mpsc::Receiver<ContainerEvent>,
        mut samples: mpsc::Receiver<RawSample>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Starting aggregator");

        loop {
            tokio::select! {
                Some(event) = events.recv() => {
                    self.handle_event(event);
                }
                Some(sample) = samples.recv() => {
                    self.ingest(&sample);
                }
                _ = shutdown.recv() => {
                    info!("Shutting down aggregator");
                    break;
                }
            }
        }
    }
}
