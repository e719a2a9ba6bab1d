//! End-to-end tests: lifecycle event, samples, flush cycle, sink

use anyhow::Result;
use async_trait::async_trait;
use forwarder_lib::{
    aggregator::{Aggregator, ContainerRegistry, FlushBuffer},
    collector::{ContainerEvent, ContainerInspector, DockerConfigInspector},
    dispatch::{ChunkedDispatcher, DispatchOutcome, HttpSink, MetricEncoder, MetricSink, PutAck, SinkError},
    flush::{FlushConfig, FlushLoop},
    health::HealthRegistry,
    models::{
        ContainerIdentity, DataPoint, MetricName, NetworkStats, RawSample, SampleStats,
        ECS_CONTAINER_NAME_LABEL, ECS_TASK_FAMILY_LABEL,
    },
    observability::{AgentMetrics, StructuredLogger},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const FULL_ID: &str = "abcdef123456789";
const SHORT_ID: &str = "abcdef123456";

struct StaticInspector {
    labels: Option<HashMap<String, String>>,
}

#[async_trait]
impl ContainerInspector for StaticInspector {
    async fn inspect(&self, container_id: &str) -> Result<ContainerIdentity> {
        Ok(ContainerIdentity::from_runtime(
            container_id,
            "/web-1",
            Some("nginx:latest".to_string()),
            self.labels.as_ref(),
        ))
    }
}

#[derive(Default)]
struct CapturingSink {
    chunks: Mutex<Vec<Vec<DataPoint>>>,
}

#[async_trait]
impl MetricSink for CapturingSink {
    async fn put_metric_data(
        &self,
        _namespace: &str,
        data: &[DataPoint],
    ) -> Result<PutAck, SinkError> {
        self.chunks.lock().unwrap().push(data.to_vec());
        Ok(PutAck {
            request_id: None,
            accepted: data.len(),
        })
    }
}

struct Pipeline {
    aggregator: Aggregator,
    flush: FlushLoop,
    sink: Arc<CapturingSink>,
}

fn pipeline(inspector: Arc<dyn ContainerInspector>, host_id: Option<&str>) -> Pipeline {
    let buffer = Arc::new(FlushBuffer::new());
    let sink = Arc::new(CapturingSink::default());
    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new("test-host");

    let aggregator = Aggregator::new(
        Arc::new(ContainerRegistry::new()),
        buffer.clone(),
        inspector,
        metrics.clone(),
        logger.clone(),
    );
    let flush = FlushLoop::new(
        buffer,
        MetricEncoder::new(host_id.map(str::to_string)),
        ChunkedDispatcher::new(sink.clone(), "ECS Custom", false),
        FlushConfig::default(),
        metrics,
        logger,
        HealthRegistry::new(),
    );

    Pipeline {
        aggregator,
        flush,
        sink,
    }
}

fn sample(rx: u64) -> RawSample {
    RawSample {
        container_key: SHORT_ID.to_string(),
        stats: SampleStats {
            network: NetworkStats {
                rx_bytes: rx,
                tx_bytes: 0,
            },
            ..Default::default()
        },
    }
}

fn dimension<'a>(point: &'a DataPoint, name: &str) -> Option<&'a str> {
    point
        .dimensions
        .iter()
        .find(|d| d.name == name)
        .map(|d| d.value.as_str())
}

#[tokio::test]
async fn test_round_trip_network_delta() {
    let p = pipeline(Arc::new(StaticInspector { labels: None }), None);

    p.aggregator
        .handle_event(ContainerEvent::Started(FULL_ID.to_string()))
        .unwrap()
        .await
        .unwrap();

    assert!(p.aggregator.ingest(&sample(1000)));
    assert!(p.aggregator.ingest(&sample(1500)));

    let report = p.flush.run_cycle().await;
    assert!(matches!(report.result, Ok(DispatchOutcome::Delivered(_))));
    assert_eq!(report.metrics, 1);

    let chunks = p.sink.chunks.lock().unwrap();
    assert_eq!(chunks.len(), 1);
    let points = &chunks[0];
    assert_eq!(points.len(), 5);

    let network_in = points
        .iter()
        .find(|p| p.metric_name == MetricName::NetworkIn)
        .unwrap();
    assert_eq!(network_in.value, 500.0);
    assert_eq!(dimension(network_in, "ContainerName"), Some("web-1"));
    assert_eq!(dimension(network_in, "ImageName"), Some("nginx:latest"));
    assert_eq!(dimension(network_in, "InstanceId"), None);
}

#[tokio::test]
async fn test_samples_before_start_are_lost() {
    let p = pipeline(Arc::new(StaticInspector { labels: None }), None);

    assert!(!p.aggregator.ingest(&sample(1000)));

    p.aggregator
        .handle_event(ContainerEvent::Started(FULL_ID.to_string()))
        .unwrap()
        .await
        .unwrap();
    assert!(p.aggregator.ingest(&sample(1500)));

    let report = p.flush.run_cycle().await;
    assert_eq!(report.metrics, 1);

    // The first sample seen after registration seeds the baseline
    let chunks = p.sink.chunks.lock().unwrap();
    let network_in = chunks[0]
        .iter()
        .find(|p| p.metric_name == MetricName::NetworkIn)
        .unwrap();
    assert_eq!(network_in.value, 0.0);
}

#[tokio::test]
async fn test_ecs_dimensions_exclude_container_name() {
    let mut labels = HashMap::new();
    labels.insert(ECS_TASK_FAMILY_LABEL.to_string(), "web-task".to_string());
    labels.insert(ECS_CONTAINER_NAME_LABEL.to_string(), "web".to_string());

    let p = pipeline(
        Arc::new(StaticInspector {
            labels: Some(labels),
        }),
        Some("i-0abc"),
    );

    p.aggregator
        .handle_event(ContainerEvent::Started(FULL_ID.to_string()))
        .unwrap()
        .await
        .unwrap();
    p.aggregator.ingest(&sample(1));
    p.flush.run_cycle().await;

    let chunks = p.sink.chunks.lock().unwrap();
    for point in &chunks[0] {
        let names: Vec<_> = point.dimensions.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["ImageName", "InstanceId", "ECSContainerName", "ECSTaskFamily"]
        );
        assert_eq!(dimension(point, "ContainerName"), None);
    }
}

#[tokio::test]
async fn test_docker_inspector_and_http_sink() {
    let docker_root = TempDir::new().unwrap();
    let container_dir = docker_root.path().join("containers").join(FULL_ID);
    std::fs::create_dir_all(&container_dir).unwrap();
    std::fs::write(
        container_dir.join("config.v2.json"),
        format!(
            r#"{{"ID": "{}", "Name": "/web-1", "Config": {{"Image": "nginx:latest", "Labels": {{}}}}}}"#,
            FULL_ID
        ),
    )
    .unwrap();

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/put")
        .match_body(mockito::Matcher::Regex(r#""Value":500.0"#.to_string()))
        .with_status(200)
        .with_body(r#"{"RequestId": "abc"}"#)
        .expect(1)
        .create_async()
        .await;

    let buffer = Arc::new(FlushBuffer::new());
    let aggregator = Aggregator::new(
        Arc::new(ContainerRegistry::new()),
        buffer.clone(),
        Arc::new(DockerConfigInspector::new(docker_root.path())),
        AgentMetrics::new(),
        StructuredLogger::new("test-host"),
    );
    let flush = FlushLoop::new(
        buffer,
        MetricEncoder::default(),
        ChunkedDispatcher::new(
            Arc::new(HttpSink::new(format!("{}/put", server.url())).unwrap()),
            "ECS Custom",
            false,
        ),
        FlushConfig::default(),
        AgentMetrics::new(),
        StructuredLogger::new("test-host"),
        HealthRegistry::new(),
    );

    aggregator
        .handle_event(ContainerEvent::Started(FULL_ID.to_string()))
        .unwrap()
        .await
        .unwrap();
    aggregator.ingest(&sample(1000));
    aggregator.ingest(&sample(1500));

    let report = flush.run_cycle().await;
    match report.result {
        Ok(DispatchOutcome::Delivered(acks)) => {
            assert_eq!(acks.len(), 1);
            assert_eq!(acks[0].request_id.as_deref(), Some("abc"));
            assert_eq!(acks[0].accepted, 5);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    mock.assert_async().await;
}
