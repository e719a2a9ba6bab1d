//! Container stats forwarder library
//!
//! This crate provides the core functionality for:
//! - Container lifecycle events and resource sampling from cgroups
//! - Identity correlation and delta computation per container
//! - Periodic deduplicated, chunked dispatch to a metrics ingestion API
//! - Health checks and observability

pub mod aggregator;
pub mod api;
pub mod collector;
pub mod dispatch;
pub mod flush;
pub mod health;
pub mod models;
pub mod observability;

pub use aggregator::{Aggregator, ContainerFilter, ContainerRegistry, FlushBuffer};
pub use dispatch::{ChunkedDispatcher, DispatchError, DispatchOutcome, HttpSink, MetricEncoder};
pub use flush::{FlushConfig, FlushLoop};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
