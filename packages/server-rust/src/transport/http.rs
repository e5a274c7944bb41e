//! Request/response transport: context travels in HTTP headers.
//!
//! Header names are case-insensitive on the wire, so baggage is split across
//! two encodings when bound:
//! - keys that are already valid lowercase header tokens go into individual
//!   `x-baggage-<key>` headers
//! - every other key goes into the W3C `baggage` header, which preserves case
//!   and percent-encodes reserved characters in keys and values

use ::http::header::{HeaderMap, HeaderName, HeaderValue};
use gridmesh_core::headers::BAGGAGE_PREFIX;
use gridmesh_core::{Baggage, GridContext, NodeContext};

use super::fields::{is_managed_name, InboundFields, OutboundFields};
use super::{mismatch, ContextBinder, ContextMapper, Envelope, TransportError, TransportKind};

/// Mapper and binder for HTTP header maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransport;

impl HttpTransport {
    /// Maps request headers into an initialized context for `node`.
    #[must_use]
    pub fn map_headers(headers: &HeaderMap, node: &NodeContext) -> GridContext {
        let pairs = headers.iter().filter_map(|(name, value)| {
            // Accept UTF-8 (obs-text) values, not only visible ASCII.
            std::str::from_utf8(value.as_bytes())
                .ok()
                .map(|value| (name.as_str(), value))
        });
        InboundFields::collect(pairs).into_context(node, TransportKind::Http)
    }

    /// Writes `context` into `headers`, replacing any earlier binding.
    ///
    /// Unrelated headers, including `traceparent`, are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::MissingContext`] if the context is not initialized.
    pub fn bind_headers(
        headers: &mut HeaderMap,
        context: &GridContext,
    ) -> Result<(), TransportError> {
        let fields = OutboundFields::from_context(context)?;

        let stale: Vec<HeaderName> = headers
            .keys()
            .filter(|name| is_managed_name(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            headers.remove(name);
        }

        for (name, value) in &fields.standard {
            insert(headers, name, value);
        }

        let mut residual = Baggage::new();
        for (key, value) in fields.baggage.iter() {
            match prefixed_header(key, value) {
                Some((name, value)) => {
                    headers.insert(name, value);
                }
                None => {
                    residual.insert(key, value);
                }
            }
        }
        if let Some(header) = residual.to_header() {
            insert(headers, gridmesh_core::headers::BAGGAGE, &header);
        }
        Ok(())
    }
}

/// Builds the `x-baggage-<key>` header for an entry, if the key survives
/// header-name lowercasing and the value is a legal header value.
fn prefixed_header(key: &str, value: &str) -> Option<(HeaderName, HeaderValue)> {
    if key.bytes().any(|b| b.is_ascii_uppercase()) {
        return None;
    }
    let name = format!("{}{key}", BAGGAGE_PREFIX.to_ascii_lowercase());
    let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
    let value = HeaderValue::from_bytes(value.as_bytes()).ok()?;
    Some((name, value))
}

fn insert(headers: &mut HeaderMap, name: &str, value: &str) {
    let name = match HeaderName::from_bytes(name.as_bytes()) {
        Ok(name) => name,
        Err(err) => {
            tracing::warn!(header = name, error = %err, "invalid context header name");
            return;
        }
    };
    match HeaderValue::from_bytes(value.as_bytes()) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(err) => {
            tracing::warn!(
                header = %name,
                error = %err,
                "context value not representable as a header; skipped"
            );
        }
    }
}

impl ContextMapper for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn map(&self, envelope: &Envelope, node: &NodeContext) -> Result<GridContext, TransportError> {
        match envelope {
            Envelope::Http(headers) => Ok(Self::map_headers(headers, node)),
            other => Err(mismatch(TransportKind::Http, other)),
        }
    }
}

impl ContextBinder for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn bind(&self, envelope: &mut Envelope, context: &GridContext) -> Result<(), TransportError> {
        match envelope {
            Envelope::Http(headers) => Self::bind_headers(headers, context),
            other => Err(mismatch(TransportKind::Http, other)),
        }
    }
}
