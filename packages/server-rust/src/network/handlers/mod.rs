//! HTTP handler definitions for the grid node.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod context;
pub mod health;

pub use context::context_handler;
pub use health::{health_handler, liveness_handler, metrics_handler, readiness_handler};

use std::sync::Arc;

use gridmesh_core::NodeContext;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::{LifecycleAggregator, LifecycleController};

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide node identity and lifecycle stage.
    pub node: Arc<NodeContext>,
    /// Registered health and readiness contributors.
    pub aggregator: Arc<LifecycleAggregator>,
    /// Stage transitions and in-flight tracking.
    pub controller: Arc<LifecycleController>,
    /// Cancelled when the node shuts down; probes run on child tokens.
    pub shutdown: CancellationToken,
    /// Prometheus render handle, when a recorder was installed.
    pub metrics: Option<PrometheusHandle>,
}
