//! Identity primitives carried by every execution context.
//!
//! Each identifier is a validated, immutable string newtype. Construction
//! trims surrounding whitespace, rejects empty input, and truncates to
//! [`MAX_IDENTITY_LEN`] characters so oversized inbound values can never
//! grow envelopes or log lines without bound.
//!
//! Generated identifiers are UUID v7 in simple (32 hex chars) form, so they
//! sort by creation time and are also valid W3C trace ids.

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length, in characters, of any resolved or propagated identity string.
pub const MAX_IDENTITY_LEN: usize = 256;

/// Truncates `value` to at most [`MAX_IDENTITY_LEN`] characters.
///
/// Idempotent, and borrows without allocating when the value already fits.
#[must_use]
pub fn truncate_identity(value: &str) -> Cow<'_, str> {
    match value.char_indices().nth(MAX_IDENTITY_LEN) {
        Some((cut, _)) => Cow::Owned(value[..cut].to_string()),
        None => Cow::Borrowed(value),
    }
}

/// Errors from constructing an identity value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("{kind} must not be empty")]
    Empty { kind: &'static str },
}

/// Generates a new time-sortable identifier string.
fn generate_sortable() -> String {
    Uuid::now_v7().simple().to_string()
}

macro_rules! identity_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validates and normalizes a raw value.
            ///
            /// # Errors
            ///
            /// Returns [`IdError::Empty`] if the value is empty after trimming.
            pub fn new(value: impl AsRef<str>) -> Result<Self, IdError> {
                let trimmed = value.as_ref().trim();
                if trimmed.is_empty() {
                    return Err(IdError::Empty { kind: $label });
                }
                Ok(Self(truncate_identity(trimmed).into_owned()))
            }

            /// Parses an optional raw value, treating absent or blank input as `None`.
            #[must_use]
            pub fn parse_optional(value: Option<&str>) -> Option<Self> {
                value.and_then(|v| Self::new(v).ok())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

identity_type!(
    /// Identifier shared by every operation in one causal chain, across nodes.
    CorrelationId,
    "correlation id"
);
identity_type!(
    /// Identifier of the operation that directly caused the current one.
    CausationId,
    "causation id"
);
identity_type!(
    /// Identifier of a single unit of work.
    OperationId,
    "operation id"
);
identity_type!(
    /// Identifier of a deployed node process.
    NodeId,
    "node id"
);
identity_type!(
    /// Studio (tenant-of-tenants) scope a node belongs to.
    StudioId,
    "studio id"
);
identity_type!(TenantId, "tenant id");
identity_type!(ProjectId, "project id");
identity_type!(
    /// Deployment environment name, e.g. `production` or `staging`.
    Environment,
    "environment"
);

impl CorrelationId {
    /// Generates a fresh time-sortable correlation id.
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_sortable())
    }
}

impl OperationId {
    /// Generates a fresh time-sortable operation id.
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_sortable())
    }
}

impl From<OperationId> for CausationId {
    /// The causation of downstream work is always the causing operation's id.
    fn from(id: OperationId) -> Self {
        Self(id.0)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn new_trims_whitespace() {
        let id = NodeId::new("  node-a \n").unwrap();
        assert_eq!(id.as_str(), "node-a");
    }

    #[test]
    fn new_rejects_blank() {
        assert_eq!(
            TenantId::new("   "),
            Err(IdError::Empty { kind: "tenant id" })
        );
    }

    #[test]
    fn new_truncates_to_cap() {
        let long = "x".repeat(MAX_IDENTITY_LEN + 40);
        let id = CorrelationId::new(&long).unwrap();
        assert_eq!(id.as_str().chars().count(), MAX_IDENTITY_LEN);
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        let long: String = "é".repeat(MAX_IDENTITY_LEN + 1);
        let cut = truncate_identity(&long);
        assert_eq!(cut.chars().count(), MAX_IDENTITY_LEN);
    }

    #[test]
    fn truncate_borrows_when_within_cap() {
        assert!(matches!(truncate_identity("short"), Cow::Borrowed("short")));
    }

    #[test]
    fn generated_ids_are_unique_and_sortable() {
        let a = CorrelationId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = CorrelationId::generate();
        assert_ne!(a, b);
        assert!(a < b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn parse_optional_drops_blank() {
        assert!(ProjectId::parse_optional(None).is_none());
        assert!(ProjectId::parse_optional(Some(" ")).is_none());
        assert_eq!(
            ProjectId::parse_optional(Some("p1")).unwrap().as_str(),
            "p1"
        );
    }

    #[test]
    fn causation_from_operation_keeps_value() {
        let op = OperationId::generate();
        let causation = CausationId::from(op.clone());
        assert_eq!(causation.as_str(), op.as_str());
    }

    #[test]
    fn serde_rejects_empty_identity() {
        let parsed: Result<NodeId, _> = serde_json::from_str("\"\"");
        assert!(parsed.is_err());
        let ok: NodeId = serde_json::from_str("\"node-1\"").unwrap();
        assert_eq!(ok.as_str(), "node-1");
    }

    proptest! {
        #[test]
        fn truncate_is_idempotent(s in ".{0,400}") {
            let once = truncate_identity(&s).into_owned();
            let twice = truncate_identity(&once).into_owned();
            prop_assert_eq!(&once, &twice);
        }

        #[test]
        fn truncate_is_identity_within_cap(s in ".{0,256}") {
            let truncated = truncate_identity(&s);
            prop_assert_eq!(truncated.as_ref(), s.as_str());
        }
    }
}
