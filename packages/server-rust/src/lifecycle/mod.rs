//! Node health, readiness, and lifecycle coordination.
//!
//! Contributors are registered with a [`LifecycleAggregator`] and evaluated
//! sequentially in ascending priority. Health and readiness follow different
//! policies (fail-fast vs. evaluate-all), so they are separate traits and
//! separate evaluation loops. [`LifecycleController`] drives the node's
//! lifecycle stage from process events and aggregated health.

pub mod aggregator;
pub mod controller;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub use aggregator::{
    AggregationError, HealthEntry, HealthReport, LifecycleAggregator, ReadinessEntry,
    ReadinessReport, RegistrationError,
};
pub use controller::{InFlightGuard, LifecycleController};

// ---------------------------------------------------------------------------
// Status types
// ---------------------------------------------------------------------------

/// Health on an ordinal scale; `Ord` follows severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub description: Option<String>,
}

impl HealthCheck {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            description: None,
        }
    }

    #[must_use]
    pub fn degraded(description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            description: Some(description.into()),
        }
    }

    #[must_use]
    pub fn unhealthy(description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            description: Some(description.into()),
        }
    }
}

/// Result of a single readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessCheck {
    pub ready: bool,
    pub description: Option<String>,
}

impl ReadinessCheck {
    #[must_use]
    pub fn ready() -> Self {
        Self {
            ready: true,
            description: None,
        }
    }

    #[must_use]
    pub fn not_ready(description: impl Into<String>) -> Self {
        Self {
            ready: false,
            description: Some(description.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Contributor traits
// ---------------------------------------------------------------------------

/// A check participating in aggregate node health.
#[async_trait]
pub trait HealthContributor: Send + Sync {
    /// Stable, unique name used in reports.
    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// An `Unhealthy` result from a critical contributor stops evaluation.
    fn is_critical(&self) -> bool {
        false
    }

    /// Runs the check. Implementations should honor `cancel`.
    async fn check(&self, cancel: &CancellationToken) -> anyhow::Result<HealthCheck>;
}

/// A check participating in aggregate node readiness.
#[async_trait]
pub trait ReadinessContributor: Send + Sync {
    /// Stable, unique name used in reports.
    fn name(&self) -> &str;

    /// Lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// Only required contributors affect the aggregate readiness.
    fn is_required(&self) -> bool {
        true
    }

    /// Runs the check. Implementations should honor `cancel`.
    async fn check(&self, cancel: &CancellationToken) -> anyhow::Result<ReadinessCheck>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_order_follows_severity() {
        assert!(HealthStatus::Healthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Unhealthy);
        assert_eq!(
            [HealthStatus::Degraded, HealthStatus::Unhealthy, HealthStatus::Healthy]
                .into_iter()
                .max(),
            Some(HealthStatus::Unhealthy)
        );
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }
}
