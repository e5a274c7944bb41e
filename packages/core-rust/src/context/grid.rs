//! Per-request execution context with two-phase initialization.
//!
//! A `GridContext` is constructed with node identity only, receives its
//! request data exactly once via [`GridContext::initialize`], and is
//! disposed when its scope ends:
//!
//! ```text
//! Uninitialized --initialize--> Initialized --dispose--> Disposed
//!       \______________________dispose_______________________/
//! ```
//!
//! Request data is held behind an `Arc` so readers can take a cheap snapshot
//! without holding the state lock across `.await` points.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::operation::OperationContext;
use super::ContextError;
use crate::baggage::Baggage;
use crate::ids::{CausationId, CorrelationId, Environment, NodeId, ProjectId, StudioId, TenantId};

/// Observable lifecycle state of a [`GridContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    Initialized,
    Disposed,
}

/// Request-scoped data set once when a [`GridContext`] is initialized.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestData {
    /// Constant across the whole causal chain.
    pub correlation_id: CorrelationId,
    /// Operation id of the causing unit of work, if any.
    pub causation_id: Option<CausationId>,
    pub tenant_id: Option<TenantId>,
    pub project_id: Option<ProjectId>,
    pub baggage: Baggage,
    pub created_at: DateTime<Utc>,
}

impl RequestData {
    /// Creates request data for `correlation_id`, stamped with the current time.
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            causation_id: None,
            tenant_id: None,
            project_id: None,
            baggage: Baggage::new(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_causation(mut self, causation_id: Option<CausationId>) -> Self {
        self.causation_id = causation_id;
        self
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant_id: Option<TenantId>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    #[must_use]
    pub fn with_project(mut self, project_id: Option<ProjectId>) -> Self {
        self.project_id = project_id;
        self
    }

    #[must_use]
    pub fn with_baggage(mut self, baggage: Baggage) -> Self {
        self.baggage = baggage;
        self
    }
}

/// Internal tagged state; request data only exists while initialized.
#[derive(Debug)]
enum Phase {
    Uninitialized,
    Initialized(Arc<RequestData>),
    Disposed,
}

/// Per-operation execution context carried through a unit of work.
#[derive(Debug)]
pub struct GridContext {
    node_id: NodeId,
    studio_id: StudioId,
    environment: Environment,
    phase: RwLock<Phase>,
    cancellation: CancellationToken,
}

impl GridContext {
    /// Creates an uninitialized context bound to the given node identity.
    #[must_use]
    pub fn new(node_id: NodeId, studio_id: StudioId, environment: Environment) -> Self {
        Self::with_cancellation(node_id, studio_id, environment, CancellationToken::new())
    }

    /// Creates an uninitialized context governed by an existing cancellation signal.
    #[must_use]
    pub fn with_cancellation(
        node_id: NodeId,
        studio_id: StudioId,
        environment: Environment,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            node_id,
            studio_id,
            environment,
            phase: RwLock::new(Phase::Uninitialized),
            cancellation,
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    #[must_use]
    pub fn studio_id(&self) -> &StudioId {
        &self.studio_id
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    #[must_use]
    pub fn state(&self) -> ContextState {
        match *self.phase.read() {
            Phase::Uninitialized => ContextState::Uninitialized,
            Phase::Initialized(_) => ContextState::Initialized,
            Phase::Disposed => ContextState::Disposed,
        }
    }

    /// Sets the request data. Valid exactly once, from `Uninitialized`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::AlreadyInitialized`] on a second call and
    /// [`ContextError::Disposed`] after the context has been disposed.
    pub fn initialize(&self, data: RequestData) -> Result<(), ContextError> {
        let mut phase = self.phase.write();
        match *phase {
            Phase::Uninitialized => {
                tracing::trace!(
                    correlation_id = %data.correlation_id,
                    node_id = %self.node_id,
                    "grid context initialized"
                );
                *phase = Phase::Initialized(Arc::new(data));
                Ok(())
            }
            Phase::Initialized(_) => Err(ContextError::AlreadyInitialized),
            Phase::Disposed => Err(ContextError::Disposed),
        }
    }

    /// Sets the request data, treating any failure as a fatal misuse.
    ///
    /// # Panics
    ///
    /// Panics if the context was already initialized or disposed.
    #[track_caller]
    pub fn initialize_once(&self, data: RequestData) {
        if let Err(err) = self.initialize(data) {
            panic!("grid context initialization violated: {err}");
        }
    }

    /// Clears request data at scope exit. Idempotent.
    pub fn dispose(&self) {
        let mut phase = self.phase.write();
        if !matches!(*phase, Phase::Disposed) {
            *phase = Phase::Disposed;
            tracing::trace!(node_id = %self.node_id, "grid context disposed");
        }
    }

    /// Returns a snapshot of the request data.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::NotInitialized`] before `initialize` and
    /// [`ContextError::Disposed`] after `dispose`.
    pub fn request(&self) -> Result<Arc<RequestData>, ContextError> {
        match &*self.phase.read() {
            Phase::Initialized(data) => Ok(Arc::clone(data)),
            Phase::Uninitialized => Err(ContextError::NotInitialized),
            Phase::Disposed => Err(ContextError::Disposed),
        }
    }

    /// Returns the correlation id.
    ///
    /// # Errors
    ///
    /// Same as [`GridContext::request`].
    pub fn correlation_id(&self) -> Result<CorrelationId, ContextError> {
        self.request().map(|data| data.correlation_id.clone())
    }

    /// Returns the causation id, if the context was caused by another operation.
    ///
    /// # Errors
    ///
    /// Same as [`GridContext::request`].
    pub fn causation_id(&self) -> Result<Option<CausationId>, ContextError> {
        self.request().map(|data| data.causation_id.clone())
    }

    /// Returns the cancellation signal governing this unit of work.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Starts a new unit of work within this context.
    ///
    /// # Errors
    ///
    /// Returns an error unless the context is initialized.
    pub fn begin_operation(
        self: &Arc<Self>,
        name: impl Into<String>,
    ) -> Result<OperationContext, ContextError> {
        self.request()?;
        Ok(OperationContext::start(Arc::clone(self), name.into()))
    }

    /// Tag name to value pairs for telemetry enrichment.
    ///
    /// Identity tags are always present; request tags only while initialized.
    #[must_use]
    pub fn enrichment_tags(&self) -> BTreeMap<&'static str, String> {
        let mut tags = BTreeMap::new();
        tags.insert("grid.node_id", self.node_id.to_string());
        tags.insert("grid.studio_id", self.studio_id.to_string());
        tags.insert("grid.environment", self.environment.to_string());

        if let Ok(data) = self.request() {
            tags.insert("grid.correlation_id", data.correlation_id.to_string());
            if let Some(causation) = &data.causation_id {
                tags.insert("grid.causation_id", causation.to_string());
            }
            if let Some(tenant) = &data.tenant_id {
                tags.insert("grid.tenant_id", tenant.to_string());
            }
            if let Some(project) = &data.project_id {
                tags.insert("grid.project_id", project.to_string());
            }
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> GridContext {
        GridContext::new(
            NodeId::new("node-a").unwrap(),
            StudioId::new("studio-1").unwrap(),
            Environment::new("test").unwrap(),
        )
    }

    fn data() -> RequestData {
        RequestData::new(CorrelationId::new("corr-1").unwrap())
    }

    #[test]
    fn starts_uninitialized() {
        let ctx = context();
        assert_eq!(ctx.state(), ContextState::Uninitialized);
        assert_eq!(ctx.request().unwrap_err(), ContextError::NotInitialized);
    }

    #[test]
    fn initialize_sets_request_data() {
        let ctx = context();
        ctx.initialize(data().with_tenant(TenantId::parse_optional(Some("t1"))))
            .unwrap();
        assert_eq!(ctx.state(), ContextState::Initialized);
        assert_eq!(ctx.correlation_id().unwrap().as_str(), "corr-1");
        assert_eq!(ctx.request().unwrap().tenant_id.as_ref().unwrap().as_str(), "t1");
        assert!(ctx.causation_id().unwrap().is_none());
    }

    #[test]
    fn second_initialize_is_rejected() {
        let ctx = context();
        ctx.initialize(data()).unwrap();
        let second = RequestData::new(CorrelationId::new("corr-2").unwrap());
        assert_eq!(ctx.initialize(second), Err(ContextError::AlreadyInitialized));
        // The first correlation id is kept.
        assert_eq!(ctx.correlation_id().unwrap().as_str(), "corr-1");
    }

    #[test]
    #[should_panic(expected = "grid context initialization violated")]
    fn initialize_once_panics_on_second_call() {
        let ctx = context();
        ctx.initialize_once(data());
        ctx.initialize_once(data());
    }

    #[test]
    fn dispose_clears_request_data() {
        let ctx = context();
        ctx.initialize(data()).unwrap();
        ctx.dispose();
        assert_eq!(ctx.state(), ContextState::Disposed);
        assert_eq!(ctx.request().unwrap_err(), ContextError::Disposed);
        assert_eq!(ctx.initialize(data()), Err(ContextError::Disposed));
        ctx.dispose();
        assert_eq!(ctx.state(), ContextState::Disposed);
    }

    #[test]
    fn begin_operation_requires_initialization() {
        let ctx = Arc::new(context());
        assert_eq!(
            ctx.begin_operation("op").unwrap_err(),
            ContextError::NotInitialized
        );
        ctx.initialize(data()).unwrap();
        let op = ctx.begin_operation("op").unwrap();
        assert_eq!(op.name(), "op");
    }

    #[test]
    fn enrichment_tags_follow_state() {
        let ctx = context();
        let tags = ctx.enrichment_tags();
        assert_eq!(tags.get("grid.node_id").map(String::as_str), Some("node-a"));
        assert!(!tags.contains_key("grid.correlation_id"));

        ctx.initialize(data().with_causation(Some(CausationId::new("op-0").unwrap())))
            .unwrap();
        let tags = ctx.enrichment_tags();
        assert_eq!(tags.get("grid.correlation_id").map(String::as_str), Some("corr-1"));
        assert_eq!(tags.get("grid.causation_id").map(String::as_str), Some("op-0"));
        assert!(!tags.contains_key("grid.tenant_id"));
    }

    #[test]
    fn cancellation_is_observable() {
        let ctx = context();
        assert!(!ctx.is_cancelled());
        ctx.cancel();
        assert!(ctx.is_cancelled());
        assert!(ctx.cancellation().is_cancelled());
    }
}
