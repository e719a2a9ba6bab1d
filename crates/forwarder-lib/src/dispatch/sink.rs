//! Ingestion API client

use crate::models::DataPoint;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors returned by a metric sink for one call
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request to ingestion API failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ingestion API rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Acknowledgement for one accepted call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutAck {
    pub request_id: Option<String>,
    /// Number of data points in the accepted call
    pub accepted: usize,
}

/// Request body accepted by the ingestion API
#[derive(Debug, Serialize)]
pub struct PutMetricDataRequest<'a> {
    #[serde(rename = "Namespace")]
    pub namespace: &'a str,
    #[serde(rename = "MetricData")]
    pub metric_data: &'a [DataPoint],
}

#[derive(Debug, Default, Deserialize)]
struct PutMetricDataResponse {
    #[serde(rename = "RequestId")]
    request_id: Option<String>,
}

/// Destination for encoded data points
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Submit one chunk of data points
    async fn put_metric_data(
        &self,
        namespace: &str,
        data: &[DataPoint],
    ) -> Result<PutAck, SinkError>;
}

/// Sink posting JSON to an HTTP ingestion endpoint
pub struct HttpSink {
    client: Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SinkError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MetricSink for HttpSink {
    async fn put_metric_data(
        &self,
        namespace: &str,
        data: &[DataPoint],
    ) -> Result<PutAck, SinkError> {
        let request = PutMetricDataRequest {
            namespace,
            metric_data: data,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PutMetricDataResponse = serde_json::from_str(&body).unwrap_or_default();
        debug!(
            points = data.len(),
            request_id = ?parsed.request_id,
            "Chunk accepted by ingestion API"
        );

        Ok(PutAck {
            request_id: parsed.request_id,
            accepted: data.len(),
        })
    }
}
