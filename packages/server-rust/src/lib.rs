//! Gridmesh Server — transport context propagation, health aggregation, and node lifecycle.

pub mod config;
pub mod lifecycle;
pub mod network;
pub mod telemetry;
pub mod transport;

pub use config::{LogFormat, NodeConfig};
pub use lifecycle::{
    HealthCheck, HealthContributor, HealthStatus, LifecycleAggregator, LifecycleController,
    ReadinessCheck, ReadinessContributor,
};
pub use network::{NetworkConfig, NodeServer};
pub use transport::{
    BinderSet, ContextBinder, ContextMapper, Envelope, TransportError, TransportKind,
};
