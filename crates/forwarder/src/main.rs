//! Stats Forwarder - container resource usage forwarder
//!
//! Runs on each container host, correlating cgroup resource samples with
//! container identity and periodically sending per-container metrics to
//! a metrics ingestion API.

use anyhow::{Context, Result};
use clap::Parser;
use forwarder_lib::{
    aggregator::{Aggregator, ContainerRegistry, FlushBuffer},
    api::{self, AppState},
    collector::{
        create_collector, detect_cgroup_version, discover_existing_containers, CgroupVersion,
        ContainerWatcher, DockerConfigInspector, SamplingConfig, SamplingLoop,
    },
    dispatch::{
        resolve_instance_id, ChunkedDispatcher, HttpSink, MetricEncoder, INSTANCE_ID_TIMEOUT,
    },
    flush::{FlushConfig, FlushLoop},
    health::{components, HealthRegistry},
    observability::{AgentMetrics, StructuredLogger},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn, Subscriber};
use tracing_subscriber::{fmt, fmt::MakeWriter, prelude::*, EnvFilter};

mod config;

const FORWARDER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Capacity of the lifecycle event channel
const EVENT_CHANNEL_SIZE: usize = 256;

/// JSON log subscriber writing to `writer`; stdout is left to dry-run payloads
fn log_subscriber<W>(filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_writer(writer))
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    log_subscriber(filter, std::io::stderr).init();

    let args = config::Args::parse();
    let config = config::ForwarderConfig::load(&args)?;
    let namespace = config.effective_namespace().to_string();
    info!(
        namespace = %namespace,
        endpoint = %config.endpoint,
        flush_interval_secs = config.flush_interval().as_secs(),
        "Forwarder configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::EVENT_SOURCE).await;
    health_registry.register(components::SAMPLER).await;
    health_registry.register(components::DISPATCHER).await;

    let metrics = AgentMetrics::new();

    // Resolved once; the InstanceId dimension is omitted for the whole run on failure
    let host_id = resolve_instance_id(&config.instance_id_url, INSTANCE_ID_TIMEOUT).await;
    let host_label = host_id
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string());

    let logger = StructuredLogger::new(host_label);
    logger.log_startup(FORWARDER_VERSION, &namespace, config.dry_run);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Aggregation core
    let registry = Arc::new(ContainerRegistry::with_filter(config.container_filter()?));
    let buffer = Arc::new(FlushBuffer::new());
    let inspector = Arc::new(DockerConfigInspector::new(&config.docker_root));
    let aggregator = Aggregator::new(
        registry,
        buffer.clone(),
        inspector,
        metrics.clone(),
        logger.clone(),
    );

    // Sample source
    let collector = create_collector(&config.cgroup_root, &config.proc_root)
        .await
        .context("Failed to create stats collector")?;
    let (sampling_loop, samples_rx) = SamplingLoop::new(
        collector.clone(),
        SamplingConfig {
            interval: config.sample_interval(),
            ..Default::default()
        },
    );
    let sampling_loop = sampling_loop.with_health(health_registry.clone());

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let aggregator_handle =
        tokio::spawn(aggregator.run(events_rx, samples_rx, shutdown_tx.subscribe()));

    // Lifecycle event source
    let is_v2 = detect_cgroup_version(&config.cgroup_root).await != CgroupVersion::V1;
    let _watcher = match ContainerWatcher::new(&config.cgroup_root, is_v2, events_tx.clone())
        .start()
    {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Container watcher unavailable, only running containers are tracked");
            health_registry
                .set_degraded(components::EVENT_SOURCE, e.to_string())
                .await;
            None
        }
    };

    discover_existing_containers(collector.as_ref(), &events_tx)
        .await
        .context("Failed to discover running containers")?;

    let sampling_handle = tokio::spawn(sampling_loop.run(shutdown_tx.subscribe()));

    // Dispatch
    let sink = Arc::new(HttpSink::new(config.endpoint.clone())?);
    let flush_loop = FlushLoop::new(
        buffer,
        MetricEncoder::new(host_id),
        ChunkedDispatcher::new(sink, namespace, config.dry_run),
        FlushConfig {
            interval: config.flush_interval(),
            run_once: config.once,
        },
        metrics.clone(),
        logger.clone(),
        health_registry.clone(),
    );
    let mut flush_handle = tokio::spawn(flush_loop.run(shutdown_tx.subscribe()));

    // Health and metrics server
    let app_state = Arc::new(AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    health_registry.set_ready(true).await;

    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            "SIGINT received"
        }
        joined = &mut flush_handle => {
            joined.context("Flush loop panicked")?;
            "run-once cycle complete"
        }
    };

    logger.log_shutdown(reason);
    // Receivers may already be gone after a run-once exit
    let _ = shutdown_tx.send(());

    let drain = async {
        let _ = aggregator_handle.await;
        let _ = sampling_handle.await;
        if !flush_handle.is_finished() {
            let _ = flush_handle.await;
        }
        match api_handle.await {
            Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
            Err(e) => warn!(error = %e, "API server task failed"),
            Ok(Ok(())) => {}
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
        warn!("Timed out waiting for tasks to stop");
    }

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_logs_go_to_configured_writer_as_json() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = log_subscriber(EnvFilter::new("info"), move || writer.clone());

        tracing::subscriber::with_default(subscriber, || {
            info!(namespace = "ECS Custom", "Forwarder configured");
            tracing::debug!("filtered out");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 1);

        let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["fields"]["message"], "Forwarder configured");
        assert_eq!(event["fields"]["namespace"], "ECS Custom");
    }
}
