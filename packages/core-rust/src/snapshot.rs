//! Serialized context payloads for lower-trust consumers.
//!
//! A [`ContextSnapshot`] is the JSON projection of a [`GridContext`] that
//! travels inside payloads (e.g. persisted job bodies). Baggage is filtered
//! on capture. Decoding never fails loudly: structurally invalid input or
//! missing identity yields `None`, meaning "no context available".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::baggage::Baggage;
use crate::context::{ContextError, GridContext, RequestData};
use crate::ids::{
    CausationId, CorrelationId, Environment, NodeId, ProjectId, StudioId, TenantId,
};

/// Serializable projection of a grid context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSnapshot {
    pub correlation_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<CausationId>,
    pub node_id: NodeId,
    pub studio_id: StudioId,
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
    #[serde(default)]
    pub baggage: Baggage,
    pub created_at: DateTime<Utc>,
}

impl ContextSnapshot {
    /// Captures an initialized context, filtering sensitive baggage.
    ///
    /// # Errors
    ///
    /// Returns an error unless the context is initialized.
    pub fn capture(context: &GridContext) -> Result<Self, ContextError> {
        let data = context.request()?;
        Ok(Self {
            correlation_id: data.correlation_id.clone(),
            causation_id: data.causation_id.clone(),
            node_id: context.node_id().clone(),
            studio_id: context.studio_id().clone(),
            environment: context.environment().clone(),
            tenant_id: data.tenant_id.clone(),
            project_id: data.project_id.clone(),
            baggage: data.baggage.filtered(),
            created_at: data.created_at,
        })
    }

    /// Encodes the snapshot as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes a snapshot, returning `None` for invalid or incomplete payloads.
    #[must_use]
    pub fn from_json(payload: &str) -> Option<Self> {
        match serde_json::from_str(payload) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                tracing::debug!(error = %err, "discarding invalid context snapshot");
                None
            }
        }
    }

    /// Rebuilds an initialized grid context carrying the snapshot's identity.
    #[must_use]
    pub fn into_context(self) -> GridContext {
        let context = GridContext::new(self.node_id, self.studio_id, self.environment);
        let mut data = RequestData::new(self.correlation_id)
            .with_causation(self.causation_id)
            .with_tenant(self.tenant_id)
            .with_project(self.project_id)
            .with_baggage(self.baggage);
        data.created_at = self.created_at;
        // A freshly constructed context is always uninitialized.
        let _ = context.initialize(data);
        context
    }
}
