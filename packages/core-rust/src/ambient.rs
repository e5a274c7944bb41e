//! Ambient access to the active context across `.await` points.
//!
//! The active [`GridContext`] and [`OperationContext`] live in a tokio
//! task-local, so they follow the logical continuation of a unit of work
//! rather than an OS thread. The value exists only while the scoped future
//! runs: once it completes (or is dropped) nothing remains for the next
//! unit of work scheduled on the same worker.
//!
//! `tokio::spawn` does not inherit task-locals; wrap spawned futures with
//! [`propagate`] to carry the current context into them.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tracing::Instrument;

use crate::context::{ContextError, GridContext, OperationContext};

tokio::task_local! {
    static CURRENT: AmbientContext;
}

/// The context pair visible to code running inside a unit of work.
#[derive(Debug, Clone)]
pub struct AmbientContext {
    pub grid: Arc<GridContext>,
    pub operation: Arc<OperationContext>,
}

impl AmbientContext {
    #[must_use]
    pub fn new(operation: Arc<OperationContext>) -> Self {
        Self {
            grid: Arc::clone(operation.grid()),
            operation,
        }
    }
}

/// Runs `fut` with `context` as the ambient context.
pub async fn scope<F>(context: AmbientContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(context, fut).await
}

/// Returns the ambient context, if called within a [`scope`].
#[must_use]
pub fn current() -> Option<AmbientContext> {
    CURRENT.try_with(Clone::clone).ok()
}

#[must_use]
pub fn current_grid() -> Option<Arc<GridContext>> {
    CURRENT.try_with(|ctx| Arc::clone(&ctx.grid)).ok()
}

#[must_use]
pub fn current_operation() -> Option<Arc<OperationContext>> {
    CURRENT.try_with(|ctx| Arc::clone(&ctx.operation)).ok()
}

/// Captures the current ambient context (if any) so `fut` sees it when spawned elsewhere.
pub fn propagate<F>(fut: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    let captured = current();
    async move {
        match captured {
            Some(context) => CURRENT.scope(context, fut).await,
            None => fut.await,
        }
    }
}

/// Executes one unit of work end to end.
///
/// Begins an operation named `name` on `grid`, runs `work` with the
/// operation as ambient context inside a `tracing` span carrying the
/// correlation identity, completes or fails the operation from the result,
/// and disposes `grid` afterwards.
///
/// If the returned future is dropped before `work` finishes (a request
/// timeout, a lost `select!`), the operation is failed as cancelled and
/// `grid` is still disposed.
///
/// # Errors
///
/// Returns [`UnitOfWorkError::Context`] if `grid` is not initialized, and
/// [`UnitOfWorkError::Failed`] wrapping the error returned by `work`.
pub async fn run_unit_of_work<W, Fut, T, E>(
    grid: Arc<GridContext>,
    name: &str,
    work: W,
) -> Result<T, UnitOfWorkError<E>>
where
    W: FnOnce(Arc<OperationContext>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let operation = match grid.begin_operation(name) {
        Ok(op) => Arc::new(op),
        Err(err) => {
            grid.dispose();
            return Err(UnitOfWorkError::Context(err));
        }
    };

    let span = tracing::info_span!(
        "unit_of_work",
        operation = name,
        operation_id = %operation.operation_id(),
        correlation_id = %grid.correlation_id().map(|id| id.to_string()).unwrap_or_default(),
        node_id = %grid.node_id(),
    );

    let guard = UnitOfWorkGuard {
        operation: Arc::clone(&operation),
        grid,
    };
    let context = AmbientContext::new(Arc::clone(&operation));
    let result = scope(context, work(operation)).instrument(span).await;

    match &result {
        Ok(_) => guard.operation.complete(),
        Err(err) => guard.operation.fail(err.to_string()),
    };
    drop(guard);

    result.map_err(UnitOfWorkError::Failed)
}

/// Terminates the operation and disposes the grid however the unit of work ends.
struct UnitOfWorkGuard {
    operation: Arc<OperationContext>,
    grid: Arc<GridContext>,
}

impl Drop for UnitOfWorkGuard {
    fn drop(&mut self) {
        if !self.operation.is_terminated() {
            self.operation.fail("unit of work cancelled");
        }
        self.grid.dispose();
    }
}

/// Errors from [`run_unit_of_work`].
#[derive(Debug, thiserror::Error)]
pub enum UnitOfWorkError<E> {
    #[error(transparent)]
    Context(ContextError),
    #[error("unit of work failed: {0}")]
    Failed(E),
}
