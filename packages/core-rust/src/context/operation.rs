//! A single unit of work within a [`GridContext`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::grid::{GridContext, RequestData};
use super::ContextError;
use crate::ids::{CausationId, OperationId};

/// Terminal outcome; all fields stay `None` until the operation terminates.
#[derive(Debug, Default)]
struct Outcome {
    completed_at: Option<DateTime<Utc>>,
    is_success: Option<bool>,
    error_message: Option<String>,
}

/// Per-unit-of-work context: identity, timing, and terminal outcome.
///
/// Terminates exactly once via [`OperationContext::complete`] or
/// [`OperationContext::fail`]; later calls are no-ops. Downstream work gets a
/// new child [`GridContext`] from [`OperationContext::derive_child`] rather
/// than mutating this one.
#[derive(Debug)]
pub struct OperationContext {
    operation_id: OperationId,
    grid: Arc<GridContext>,
    name: String,
    started_at: DateTime<Utc>,
    started: Instant,
    outcome: Mutex<Outcome>,
    metadata: Mutex<BTreeMap<String, String>>,
}

impl OperationContext {
    pub(crate) fn start(grid: Arc<GridContext>, name: String) -> Self {
        let operation_id = OperationId::generate();
        tracing::debug!(
            operation_id = %operation_id,
            operation = %name,
            "operation started"
        );
        Self {
            operation_id,
            grid,
            name,
            started_at: Utc::now(),
            started: Instant::now(),
            outcome: Mutex::new(Outcome::default()),
            metadata: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn operation_id(&self) -> &OperationId {
        &self.operation_id
    }

    #[must_use]
    pub fn grid(&self) -> &Arc<GridContext> {
        &self.grid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Marks the operation successful. Returns `false` if it had already terminated.
    pub fn complete(&self) -> bool {
        self.terminate(true, None)
    }

    /// Marks the operation failed. Returns `false` if it had already terminated.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.terminate(false, Some(message.into()))
    }

    fn terminate(&self, success: bool, error_message: Option<String>) -> bool {
        let mut outcome = self.outcome.lock();
        if outcome.is_success.is_some() {
            return false;
        }
        outcome.completed_at = Some(Utc::now());
        outcome.is_success = Some(success);
        outcome.error_message = error_message;

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = self.started.elapsed().as_millis() as u64;
        if success {
            tracing::debug!(
                operation_id = %self.operation_id,
                operation = %self.name,
                duration_ms,
                "operation completed"
            );
        } else {
            tracing::warn!(
                operation_id = %self.operation_id,
                operation = %self.name,
                duration_ms,
                error = outcome.error_message.as_deref().unwrap_or_default(),
                "operation failed"
            );
        }
        true
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.outcome.lock().is_success.is_some()
    }

    /// `None` while running, then `Some(true)` or `Some(false)`.
    #[must_use]
    pub fn is_success(&self) -> Option<bool> {
        self.outcome.lock().is_success
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.outcome.lock().completed_at
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.outcome.lock().error_message.clone()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.lock().insert(key.into(), value.into());
    }

    #[must_use]
    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata.lock().clone()
    }

    /// Derives the context for downstream work caused by this operation.
    ///
    /// The child keeps the parent's correlation id, tenancy, and baggage; its
    /// causation id is this operation's id. Its cancellation signal is a
    /// child of the parent's.
    ///
    /// # Errors
    ///
    /// Returns an error if the owning grid context is no longer initialized.
    pub fn derive_child(&self) -> Result<GridContext, ContextError> {
        let parent = self.grid.request()?;
        let child = GridContext::with_cancellation(
            self.grid.node_id().clone(),
            self.grid.studio_id().clone(),
            self.grid.environment().clone(),
            self.grid.cancellation().child_token(),
        );
        let data = RequestData::new(parent.correlation_id.clone())
            .with_causation(Some(CausationId::from(self.operation_id.clone())))
            .with_tenant(parent.tenant_id.clone())
            .with_project(parent.project_id.clone())
            .with_baggage(parent.baggage.clone());
        child.initialize(data)?;
        Ok(child)
    }

    /// Grid enrichment tags plus `operation.*` tags.
    #[must_use]
    pub fn enrichment_tags(&self) -> BTreeMap<&'static str, String> {
        let mut tags = self.grid.enrichment_tags();
        tags.insert("operation.id", self.operation_id.to_string());
        tags.insert("operation.name", self.name.clone());
        tags
    }
}
