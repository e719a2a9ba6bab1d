//! Metric dispatch
//!
//! Encodes normalized metrics into dimensioned data points and sends them to
//! the ingestion API in chunks bounded by the per-call ceiling.

mod chunked;
mod encoder;
mod host;
mod sink;

pub use chunked::{
    chunk_count, ChunkedDispatcher, DispatchError, DispatchOutcome, MAX_DATA_POINTS_PER_CALL,
};
pub use encoder::{MetricEncoder, DATA_POINTS_PER_METRIC, NO_VALUE};
pub use host::{resolve_instance_id, INSTANCE_ID_TIMEOUT, INSTANCE_ID_URL};
pub use sink::{HttpSink, MetricSink, PutAck, PutMetricDataRequest, SinkError};
