//! Execution context model.
//!
//! - [`NodeContext`]: process-wide identity and lifecycle stage
//! - [`GridContext`]: per-request identity, tenancy, and baggage
//! - [`OperationContext`]: one unit of work executing within a `GridContext`

pub mod grid;
pub mod node;
pub mod operation;

pub use grid::{ContextState, GridContext, RequestData};
pub use node::{LifecycleStage, NodeContext, NodeDescriptor};
pub use operation::OperationContext;

/// Errors from misusing a [`GridContext`] lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// `initialize` was called on a context that already holds request data.
    #[error("grid context is already initialized")]
    AlreadyInitialized,
    /// Request data was read before `initialize`.
    #[error("grid context has not been initialized")]
    NotInitialized,
    /// The context was used after its scope ended.
    #[error("grid context has been disposed")]
    Disposed,
}
