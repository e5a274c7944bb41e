//! Asynchronous message transport: context travels in message properties.

use std::collections::BTreeMap;

use bytes::Bytes;
use gridmesh_core::{GridContext, NodeContext};
use serde::{Deserialize, Serialize};

use super::fields::{InboundFields, OutboundFields};
use super::{mismatch, ContextBinder, ContextMapper, Envelope, TransportError, TransportKind};

/// A message with string properties and an opaque body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub subject: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    pub body: Bytes,
}

impl MessageEnvelope {
    #[must_use]
    pub fn new(subject: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            properties: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Looks up a property; exact match first, then case-insensitive.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .or_else(|| {
                self.properties
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(name.into(), value.into());
    }

    /// Encodes the envelope as `MsgPack` for the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Decodes an envelope from `MsgPack`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid envelope.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Mapper and binder for message properties.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageTransport;

impl MessageTransport {
    #[must_use]
    pub fn map_message(message: &MessageEnvelope, node: &NodeContext) -> GridContext {
        let pairs = message
            .properties
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()));
        InboundFields::collect(pairs).into_context(node, TransportKind::Message)
    }

    /// Writes `context` into the message properties, replacing earlier bindings.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MissingContext`] if the context is not initialized.
    pub fn bind_message(
        message: &mut MessageEnvelope,
        context: &GridContext,
    ) -> Result<(), TransportError> {
        OutboundFields::from_context(context)?.write_properties(&mut message.properties);
        Ok(())
    }
}

impl ContextMapper for MessageTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Message
    }

    fn map(&self, envelope: &Envelope, node: &NodeContext) -> Result<GridContext, TransportError> {
        match envelope {
            Envelope::Message(message) => Ok(Self::map_message(message, node)),
            other => Err(mismatch(TransportKind::Message, other)),
        }
    }
}

impl ContextBinder for MessageTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Message
    }

    fn bind(&self, envelope: &mut Envelope, context: &GridContext) -> Result<(), TransportError> {
        match envelope {
            Envelope::Message(message) => Self::bind_message(message, context),
            other => Err(mismatch(TransportKind::Message, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use gridmesh_core::headers;

    use super::*;
    use crate::transport::tests::{context, node};

    #[test]
    fn round_trip_preserves_case_sensitive_baggage() {
        let ctx = context("corr-1", Some("op-7"), &[("userId", "alice"), ("trace note", "a,b")]);
        let mut message = MessageEnvelope::new("orders.created", b"{}".to_vec());
        MessageTransport::bind_message(&mut message, &ctx).unwrap();

        assert_eq!(message.property("x-baggage-userId"), Some("alice"));

        let mapped = MessageTransport::map_message(&message, &node("node-b"));
        let data = mapped.request().unwrap();
        assert_eq!(data.correlation_id.as_str(), "corr-1");
        assert_eq!(data.causation_id.as_ref().unwrap().as_str(), "op-7");
        assert_eq!(data.baggage, ctx.request().unwrap().baggage);
    }

    #[test]
    fn rebinding_clears_stale_properties() {
        let mut message = MessageEnvelope::new("orders.created", Vec::new());
        message.set_property("content-type", "application/json");
        let first = context("corr-1", Some("op-1"), &[("a", "1")]);
        MessageTransport::bind_message(&mut message, &first).unwrap();
        MessageTransport::bind_message(&mut message, &context("corr-2", None, &[])).unwrap();

        assert_eq!(message.property(headers::CORRELATION_ID), Some("corr-2"));
        assert_eq!(message.property(headers::CAUSATION_ID), None);
        assert_eq!(message.property("X-Baggage-a"), None);
        assert_eq!(message.property("content-type"), Some("application/json"));
    }

    #[test]
    fn property_lookup_is_case_insensitive() {
        let mut message = MessageEnvelope::new("s", Vec::new());
        message.set_property("x-correlation-id", "lower");
        assert_eq!(message.property(headers::CORRELATION_ID), Some("lower"));

        let mapped = MessageTransport::map_message(&message, &node("node-b"));
        assert_eq!(mapped.correlation_id().unwrap().as_str(), "lower");
    }

    #[test]
    fn msgpack_keeps_bound_properties() {
        let mut message = MessageEnvelope::new("orders.created", b"payload".to_vec());
        MessageTransport::bind_message(&mut message, &context("corr-1", None, &[])).unwrap();

        let decoded = MessageEnvelope::from_msgpack(&message.to_msgpack().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn foreign_envelope_is_rejected() {
        let transport = MessageTransport;
        let envelope = Envelope::from(::http::HeaderMap::new());
        let err = transport.map(&envelope, &node("node-b")).unwrap_err();
        assert!(matches!(
            err,
            TransportError::EnvelopeMismatch {
                expected: TransportKind::Message,
                found: TransportKind::Http
            }
        ));
    }
}
