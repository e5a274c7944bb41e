//! Standard header and metadata key names shared by every transport.
//!
//! These keys are a stable cross-node contract: a node that binds a context
//! onto an envelope and a node that maps it back must agree on them exactly.
//! HTTP header lookups are case-insensitive; message and job property maps
//! are matched case-insensitively by the transport mappers as well.

/// Correlation identifier, constant across a causal chain.
pub const CORRELATION_ID: &str = "X-Correlation-Id";

/// Operation identifier of the unit of work that caused this one.
pub const CAUSATION_ID: &str = "X-Causation-Id";

/// Studio (tenant-group) scope of the sending node.
pub const STUDIO_ID: &str = "X-Studio-Id";

/// Identifier of the sending node.
pub const NODE_ID: &str = "X-Node-Id";

/// Deployment environment of the sending node.
pub const ENVIRONMENT: &str = "X-Environment";

/// Tenant scope of the request.
pub const TENANT_ID: &str = "X-Tenant-Id";

/// Project scope of the request.
pub const PROJECT_ID: &str = "X-Project-Id";

/// W3C trace-context header (`version-traceid-spanid-flags`).
pub const TRACEPARENT: &str = "traceparent";

/// W3C baggage header (comma-separated `key=value[;property]*`).
pub const BAGGAGE: &str = "baggage";

/// Prefix for individually carried baggage entries (`X-Baggage-<key>`).
pub const BAGGAGE_PREFIX: &str = "X-Baggage-";

/// Returns the baggage key carried by a prefixed header name, if any.
///
/// The prefix is matched case-insensitively; the suffix is returned verbatim.
/// An empty suffix yields `None`.
#[must_use]
pub fn strip_baggage_prefix(name: &str) -> Option<&str> {
    let prefix_len = BAGGAGE_PREFIX.len();
    if name.len() <= prefix_len || !name.is_char_boundary(prefix_len) {
        return None;
    }
    let (head, tail) = name.split_at(prefix_len);
    head.eq_ignore_ascii_case(BAGGAGE_PREFIX).then_some(tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_prefix_preserves_key_case() {
        assert_eq!(strip_baggage_prefix("X-Baggage-UserId"), Some("UserId"));
        assert_eq!(strip_baggage_prefix("x-baggage-userid"), Some("userid"));
    }

    #[test]
    fn strip_prefix_rejects_other_names() {
        assert_eq!(strip_baggage_prefix("X-Baggage-"), None);
        assert_eq!(strip_baggage_prefix("X-Correlation-Id"), None);
        assert_eq!(strip_baggage_prefix("baggage"), None);
    }
}
