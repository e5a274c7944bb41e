//! Correlation and causation resolution for inbound and outbound work.
//!
//! Inbound correlation is resolved in a fixed order:
//! 1. the explicit `X-Correlation-Id` value, when present and non-blank
//! 2. the trace id segment of a `traceparent` header, when it parses
//! 3. a freshly generated time-sortable id
//!
//! Malformed trace headers never error; they fall through to generation.

use crate::ids::{CausationId, CorrelationId, OperationId};

/// Where a resolved correlation id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationSource {
    /// Taken from the explicit correlation header.
    Explicit,
    /// Taken from the trace id segment of a `traceparent` header.
    TraceParent,
    /// No usable inbound value; a new id was generated.
    Generated,
}

impl CorrelationSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::TraceParent => "traceparent",
            Self::Generated => "generated",
        }
    }
}

/// Extracts the trace id (second segment) from a `version-traceid-spanid-flags` header.
///
/// Requires at least two hyphen-delimited parts and a non-blank second segment.
#[must_use]
pub fn parse_trace_id(traceparent: &str) -> Option<&str> {
    let mut parts = traceparent.trim().split('-');
    let _version = parts.next()?;
    let trace_id = parts.next()?.trim();
    (!trace_id.is_empty()).then_some(trace_id)
}

/// Resolves the inbound correlation id and reports which source supplied it.
#[must_use]
pub fn resolve_correlation_id(
    explicit: Option<&str>,
    traceparent: Option<&str>,
) -> (CorrelationId, CorrelationSource) {
    if let Some(id) = CorrelationId::parse_optional(explicit) {
        return (id, CorrelationSource::Explicit);
    }

    if let Some(id) = traceparent
        .and_then(parse_trace_id)
        .and_then(|trace_id| CorrelationId::new(trace_id).ok())
    {
        return (id, CorrelationSource::TraceParent);
    }

    (CorrelationId::generate(), CorrelationSource::Generated)
}

/// Resolves an inbound causation id; the value is taken verbatim (after truncation).
#[must_use]
pub fn resolve_causation_id(value: Option<&str>) -> Option<CausationId> {
    CausationId::parse_optional(value)
}

/// Causation id for work spawned by `operation`.
#[must_use]
pub fn causation_for_child(operation: &OperationId) -> CausationId {
    CausationId::from(operation.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::MAX_IDENTITY_LEN;

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn explicit_header_wins() {
        let (id, source) = resolve_correlation_id(Some("corr-1"), Some(TRACEPARENT));
        assert_eq!(id.as_str(), "corr-1");
        assert_eq!(source, CorrelationSource::Explicit);
    }

    #[test]
    fn traceparent_used_without_explicit_header() {
        let (id, source) = resolve_correlation_id(None, Some(TRACEPARENT));
        assert_eq!(id.as_str(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(source, CorrelationSource::TraceParent);
    }

    #[test]
    fn blank_explicit_header_falls_through() {
        let (id, source) = resolve_correlation_id(Some("   "), Some(TRACEPARENT));
        assert_eq!(id.as_str(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(source, CorrelationSource::TraceParent);
    }

    #[test]
    fn malformed_traceparent_generates() {
        for bad in ["", "garbage", "00-", "-"] {
            let (id, source) = resolve_correlation_id(None, Some(bad));
            assert_eq!(source, CorrelationSource::Generated, "input {bad:?}");
            assert!(!id.as_str().is_empty());
        }
    }

    #[test]
    fn two_part_traceparent_is_accepted() {
        assert_eq!(parse_trace_id("00-abc"), Some("abc"));
    }

    #[test]
    fn nothing_inbound_generates() {
        let (_, source) = resolve_correlation_id(None, None);
        assert_eq!(source, CorrelationSource::Generated);
    }

    #[test]
    fn oversized_explicit_value_is_truncated() {
        let long = "c".repeat(MAX_IDENTITY_LEN * 2);
        let (id, _) = resolve_correlation_id(Some(&long), None);
        assert_eq!(id.as_str().len(), MAX_IDENTITY_LEN);
    }

    #[test]
    fn causation_taken_verbatim() {
        assert_eq!(resolve_causation_id(Some("op-9")).unwrap().as_str(), "op-9");
        assert!(resolve_causation_id(Some("")).is_none());
        assert!(resolve_causation_id(None).is_none());
    }

    #[test]
    fn child_causation_is_operation_id() {
        let op = OperationId::generate();
        assert_eq!(causation_for_child(&op).as_str(), op.as_str());
    }
}
