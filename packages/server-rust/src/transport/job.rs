//! Background job transport: context travels in job metadata.
//!
//! Besides the metadata entries, the binder stores a filtered
//! [`ContextSnapshot`] on the job. Jobs persisted by producers that only
//! write the snapshot still map to their original correlation.

use std::collections::BTreeMap;

use bytes::Bytes;
use gridmesh_core::{ContextSnapshot, GridContext, NodeContext, RequestData};
use serde::{Deserialize, Serialize};

use super::fields::{InboundFields, OutboundFields};
use super::{mismatch, ContextBinder, ContextMapper, Envelope, TransportError, TransportKind};

/// A queued job with string metadata and an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    pub job_type: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub payload: Bytes,
    /// JSON-encoded [`ContextSnapshot`] written by the binder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_snapshot: Option<String>,
}

impl JobEnvelope {
    #[must_use]
    pub fn new(job_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            job_type: job_type.into(),
            metadata: BTreeMap::new(),
            payload: payload.into(),
            context_snapshot: None,
        }
    }

    /// Decoded snapshot, or `None` if absent or invalid.
    #[must_use]
    pub fn snapshot(&self) -> Option<ContextSnapshot> {
        self.context_snapshot
            .as_deref()
            .and_then(ContextSnapshot::from_json)
    }
}

/// Mapper and binder for job metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobTransport;

impl JobTransport {
    #[must_use]
    pub fn map_job(job: &JobEnvelope, node: &NodeContext) -> GridContext {
        let fields = InboundFields::collect(
            job.metadata
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        );
        if !fields.has_correlation() {
            if let Some(snapshot) = job.snapshot() {
                return restore(snapshot, node);
            }
        }
        fields.into_context(node, TransportKind::Job)
    }

    /// Writes `context` into the job metadata and snapshot, replacing earlier bindings.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MissingContext`] if the context is not initialized.
    pub fn bind_job(job: &mut JobEnvelope, context: &GridContext) -> Result<(), TransportError> {
        OutboundFields::from_context(context)?.write_properties(&mut job.metadata);

        let snapshot = ContextSnapshot::capture(context).map_err(TransportError::MissingContext)?;
        job.context_snapshot = match snapshot.to_json() {
            Ok(json) => Some(json),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    job_type = %job.job_type,
                    "failed to encode context snapshot"
                );
                None
            }
        };
        Ok(())
    }
}

/// Rebuilds a context for `node` from a snapshot's request data.
fn restore(snapshot: ContextSnapshot, node: &NodeContext) -> GridContext {
    tracing::debug!(
        transport = %TransportKind::Job,
        correlation_id = %snapshot.correlation_id,
        origin_node = %snapshot.node_id,
        "context restored from job snapshot"
    );
    metrics::counter!(
        "gridmesh_context_mapped_total",
        "transport" => TransportKind::Job.as_str(),
        "source" => "snapshot"
    )
    .increment(1);

    let data = RequestData::new(snapshot.correlation_id)
        .with_causation(snapshot.causation_id)
        .with_tenant(snapshot.tenant_id)
        .with_project(snapshot.project_id)
        .with_baggage(snapshot.baggage);
    let context = node.new_grid_context();
    context.initialize_once(data);
    context
}

impl ContextMapper for JobTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Job
    }

    fn map(&self, envelope: &Envelope, node: &NodeContext) -> Result<GridContext, TransportError> {
        match envelope {
            Envelope::Job(job) => Ok(Self::map_job(job, node)),
            other => Err(mismatch(TransportKind::Job, other)),
        }
    }
}

impl ContextBinder for JobTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Job
    }

    fn bind(&self, envelope: &mut Envelope, context: &GridContext) -> Result<(), TransportError> {
        match envelope {
            Envelope::Job(job) => Self::bind_job(job, context),
            other => Err(mismatch(TransportKind::Job, other)),
        }
    }
}
