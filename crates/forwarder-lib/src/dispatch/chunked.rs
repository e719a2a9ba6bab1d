//! Size-bounded sequential dispatch

use super::sink::{MetricSink, PutAck, PutMetricDataRequest, SinkError};
use crate::models::DataPoint;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

/// Maximum number of data points the ingestion API accepts per call
pub const MAX_DATA_POINTS_PER_CALL: usize = 20;

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Every chunk was accepted; one ack per chunk in send order
    Delivered(Vec<PutAck>),
    /// Nothing was sent; `payload` is the request body that would have been
    DryRun { payload: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("nothing to report")]
    Empty,

    #[error("dispatch stopped after {accepted_chunks} of {total_chunks} chunks: {source}")]
    Partial {
        accepted_chunks: usize,
        total_chunks: usize,
        #[source]
        source: SinkError,
    },

    #[error("failed to render payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Number of calls needed to send `points` data points
pub fn chunk_count(points: usize) -> usize {
    points.div_ceil(MAX_DATA_POINTS_PER_CALL)
}

/// Sends data points to a sink in chunks of at most
/// [`MAX_DATA_POINTS_PER_CALL`], one chunk at a time.
///
/// The first failing chunk ends the dispatch. Points in later chunks are
/// dropped; nothing is retried.
pub struct ChunkedDispatcher {
    sink: Arc<dyn MetricSink>,
    namespace: String,
    dry_run: bool,
}

impl ChunkedDispatcher {
    pub fn new(sink: Arc<dyn MetricSink>, namespace: impl Into<String>, dry_run: bool) -> Self {
        Self {
            sink,
            namespace: namespace.into(),
            dry_run,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn dispatch(&self, points: &[DataPoint]) -> Result<DispatchOutcome, DispatchError> {
        if points.is_empty() {
            return Err(DispatchError::Empty);
        }

        if self.dry_run {
            let payload = serde_json::to_string_pretty(&PutMetricDataRequest {
                namespace: &self.namespace,
                metric_data: points,
            })?;
            return Ok(DispatchOutcome::DryRun { payload });
        }

        let total_chunks = chunk_count(points.len());
        let mut acks = Vec::with_capacity(total_chunks);

        for chunk in points.chunks(MAX_DATA_POINTS_PER_CALL) {
            match self.sink.put_metric_data(&self.namespace, chunk).await {
                Ok(ack) => {
                    debug!(
                        chunk = acks.len() + 1,
                        total_chunks = total_chunks,
                        points = chunk.len(),
                        "Chunk delivered"
                    );
                    acks.push(ack);
                }
                Err(source) => {
                    error!(
                        accepted_chunks = acks.len(),
                        total_chunks = total_chunks,
                        error = %source,
                        "Chunk rejected, abandoning remaining chunks"
                    );
                    return Err(DispatchError::Partial {
                        accepted_chunks: acks.len(),
                        total_chunks,
                        source,
                    });
                }
            }
        }

        Ok(DispatchOutcome::Delivered(acks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dimension, MetricName, StandardUnit};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Records chunk sizes; fails the call with the given 1-based index
    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<usize>>,
        fail_on: Option<usize>,
    }

    impl RecordingSink {
        fn failing_on(call: usize) -> Self {
            Self {
                fail_on: Some(call),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<usize> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MetricSink for RecordingSink {
        async fn put_metric_data(
            &self,
            namespace: &str,
            data: &[DataPoint],
        ) -> Result<PutAck, SinkError> {
            assert_eq!(namespace, "ECS Custom");
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(data.len());
                calls.len()
            };

            if self.fail_on == Some(call) {
                return Err(SinkError::Rejected {
                    status: 500,
                    body: "InternalFailure".to_string(),
                });
            }

            Ok(PutAck {
                request_id: Some(format!("req-{}", call)),
                accepted: data.len(),
            })
        }
    }

    fn points(n: usize) -> Vec<DataPoint> {
        (0..n)
            .map(|i| DataPoint {
                metric_name: MetricName::MemoryUsage,
                dimensions: vec![Dimension::new("ContainerName", format!("c{}", i))],
                timestamp: Utc::now(),
                value: i as f64,
                unit: StandardUnit::Bytes,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_chunks_of_twenty() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = ChunkedDispatcher::new(sink.clone(), "ECS Custom", false);

        let outcome = dispatcher.dispatch(&points(45)).await.unwrap();

        assert_eq!(sink.calls(), vec![20, 20, 5]);
        match outcome {
            DispatchOutcome::Delivered(acks) => {
                assert_eq!(acks.len(), 3);
                assert_eq!(acks[2].accepted, 5);
                assert_eq!(acks[0].request_id.as_deref(), Some("req-1"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_chunks() {
        let sink = Arc::new(RecordingSink::failing_on(2));
        let dispatcher = ChunkedDispatcher::new(sink.clone(), "ECS Custom", false);

        let err = dispatcher.dispatch(&points(45)).await.unwrap_err();

        // Third chunk never attempted
        assert_eq!(sink.calls(), vec![20, 20]);
        match err {
            DispatchError::Partial {
                accepted_chunks,
                total_chunks,
                source: SinkError::Rejected { status, .. },
            } => {
                assert_eq!(accepted_chunks, 1);
                assert_eq!(total_chunks, 3);
                assert_eq!(status, 500);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_exact_multiple() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = ChunkedDispatcher::new(sink.clone(), "ECS Custom", false);

        dispatcher.dispatch(&points(40)).await.unwrap();
        assert_eq!(sink.calls(), vec![20, 20]);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let sink = Arc::new(RecordingSink::default());

        for dry_run in [false, true] {
            let dispatcher = ChunkedDispatcher::new(sink.clone(), "ECS Custom", dry_run);
            assert!(matches!(
                dispatcher.dispatch(&[]).await,
                Err(DispatchError::Empty)
            ));
        }
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_renders_payload_without_sending() {
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = ChunkedDispatcher::new(sink.clone(), "ECS Custom", true);

        let outcome = dispatcher.dispatch(&points(25)).await.unwrap();

        assert!(sink.calls().is_empty());
        let DispatchOutcome::DryRun { payload } = outcome else {
            panic!("expected dry run outcome");
        };
        let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(json["Namespace"], "ECS Custom");
        assert_eq!(json["MetricData"].as_array().unwrap().len(), 25);
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0), 0);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(20), 1);
        assert_eq!(chunk_count(21), 2);
        assert_eq!(chunk_count(45), 3);
    }
}
