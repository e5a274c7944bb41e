//! Context propagation across transport boundaries.
//!
//! Each transport kind provides a matched pair:
//! - a [`ContextMapper`] that reads an inbound [`Envelope`] and produces an
//!   initialized [`GridContext`]
//! - a [`ContextBinder`] that projects a context onto an outbound envelope
//!
//! Envelope shape checks live in `can_bind` and in each transport's
//! `expect_*` helpers, so callers never inspect envelope variants themselves.
//! [`BinderSet`] picks the binder for an envelope.

pub mod http;
pub mod job;
pub mod message;

mod fields;

use std::fmt;
use std::sync::Arc;

use gridmesh_core::{ContextError, GridContext, NodeContext};

pub use self::http::HttpTransport;
pub use self::job::{JobEnvelope, JobTransport};
pub use self::message::{MessageEnvelope, MessageTransport};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Transport kinds that carry grid context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Request/response (HTTP headers).
    Http,
    /// Asynchronous message (message properties).
    Message,
    /// Background job (job metadata).
    Job,
}

impl TransportKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Message => "message",
            Self::Job => "job",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound or outbound carrier of context metadata.
#[derive(Debug, Clone)]
pub enum Envelope {
    Http(::http::HeaderMap),
    Message(MessageEnvelope),
    Job(JobEnvelope),
}

impl Envelope {
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Http(_) => TransportKind::Http,
            Self::Message(_) => TransportKind::Message,
            Self::Job(_) => TransportKind::Job,
        }
    }
}

impl From<::http::HeaderMap> for Envelope {
    fn from(headers: ::http::HeaderMap) -> Self {
        Self::Http(headers)
    }
}

impl From<MessageEnvelope> for Envelope {
    fn from(message: MessageEnvelope) -> Self {
        Self::Message(message)
    }
}

impl From<JobEnvelope> for Envelope {
    fn from(job: JobEnvelope) -> Self {
        Self::Job(job)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from mapping or binding context on an envelope.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The envelope does not have the shape this transport expects.
    #[error("expected {expected} envelope, got {found} envelope")]
    EnvelopeMismatch {
        expected: TransportKind,
        found: TransportKind,
    },
    /// The context has no request data to project.
    #[error("no context to bind: {0}")]
    MissingContext(#[source] ContextError),
    /// No registered binder accepts the envelope.
    #[error("no binder registered for {0} envelopes")]
    NoBinder(TransportKind),
}

// ---------------------------------------------------------------------------
// Mapper / Binder traits
// ---------------------------------------------------------------------------

/// Extracts an initialized [`GridContext`] from an inbound envelope.
pub trait ContextMapper: Send + Sync {
    /// The transport this mapper reads.
    fn kind(&self) -> TransportKind;

    /// Maps `envelope` into a context carrying `node`'s identity.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EnvelopeMismatch`] if the envelope belongs
    /// to another transport.
    fn map(&self, envelope: &Envelope, node: &NodeContext) -> Result<GridContext, TransportError>;
}

/// Projects a [`GridContext`] onto an outbound envelope.
pub trait ContextBinder: Send + Sync {
    /// The transport this binder writes.
    fn kind(&self) -> TransportKind;

    /// Cheap shape check: whether `bind` accepts this envelope.
    fn can_bind(&self, envelope: &Envelope) -> bool {
        envelope.kind() == self.kind()
    }

    /// Writes the context into `envelope` in place, replacing earlier bindings.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::EnvelopeMismatch`] for a foreign envelope and
    /// [`TransportError::MissingContext`] if the context is not initialized.
    fn bind(&self, envelope: &mut Envelope, context: &GridContext) -> Result<(), TransportError>;
}

fn mismatch(expected: TransportKind, envelope: &Envelope) -> TransportError {
    TransportError::EnvelopeMismatch {
        expected,
        found: envelope.kind(),
    }
}

// ---------------------------------------------------------------------------
// BinderSet
// ---------------------------------------------------------------------------

/// Ordered set of binders; the first whose `can_bind` accepts an envelope wins.
#[derive(Clone)]
pub struct BinderSet {
    binders: Vec<Arc<dyn ContextBinder>>,
}

impl BinderSet {
    #[must_use]
    pub fn new() -> Self {
        Self {
            binders: Vec::new(),
        }
    }

    /// A set with the built-in HTTP, message, and job binders.
    #[must_use]
    pub fn standard() -> Self {
        let mut set = Self::new();
        set.register(Arc::new(HttpTransport));
        set.register(Arc::new(MessageTransport));
        set.register(Arc::new(JobTransport));
        set
    }

    pub fn register(&mut self, binder: Arc<dyn ContextBinder>) {
        self.binders.push(binder);
    }

    /// Binds `context` with the first binder that accepts `envelope`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NoBinder`] if no binder accepts the envelope,
    /// otherwise whatever the selected binder returns.
    pub fn bind(
        &self,
        envelope: &mut Envelope,
        context: &GridContext,
    ) -> Result<(), TransportError> {
        let binder = self
            .binders
            .iter()
            .find(|b| b.can_bind(envelope))
            .ok_or_else(|| TransportError::NoBinder(envelope.kind()))?;
        binder.bind(envelope, context)
    }
}

impl Default for BinderSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for BinderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.binders.iter().map(|b| b.kind()))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
