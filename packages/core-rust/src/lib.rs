//! Gridmesh Core — identity primitives, execution contexts, baggage, and ambient propagation.

pub mod ambient;
pub mod baggage;
pub mod context;
pub mod headers;
pub mod ids;
pub mod resolver;
pub mod snapshot;

pub use ambient::{AmbientContext, UnitOfWorkError};
pub use baggage::Baggage;
pub use context::{
    ContextError, ContextState, GridContext, LifecycleStage, NodeContext, NodeDescriptor,
    OperationContext, RequestData,
};
pub use ids::{
    CausationId, CorrelationId, Environment, IdError, NodeId, OperationId, ProjectId, StudioId,
    TenantId, MAX_IDENTITY_LEN,
};
pub use resolver::CorrelationSource;
pub use snapshot::ContextSnapshot;
