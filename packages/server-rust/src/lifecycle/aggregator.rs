//! Priority-ordered evaluation of health and readiness contributors.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{HealthCheck, HealthContributor, HealthStatus, ReadinessCheck, ReadinessContributor};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Aggregation did not produce a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    /// The governing cancellation token fired during evaluation.
    #[error("aggregation cancelled")]
    Cancelled,
}

/// A contributor could not be registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistrationError {
    #[error("{kind} contributor {name:?} is already registered")]
    DuplicateName { kind: &'static str, name: String },
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub critical: bool,
    pub duration_ms: u64,
}

/// Aggregate health with per-contributor entries in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Set when a critical contributor stopped evaluation early.
    pub short_circuited: bool,
    pub entries: Vec<HealthEntry>,
}

impl HealthReport {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&HealthEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessEntry {
    pub name: String,
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub required: bool,
    pub duration_ms: u64,
}

/// Aggregate readiness with per-contributor entries in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    pub entries: Vec<ReadinessEntry>,
}

impl ReadinessReport {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ReadinessEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

// ---------------------------------------------------------------------------
// LifecycleAggregator
// ---------------------------------------------------------------------------

/// Holds the registered contributors, each collection kept sorted by priority.
///
/// Sorting is stable, so contributors with equal priority run in
/// registration order. Registration may happen concurrently with
/// evaluation; an evaluation works on the set registered when it started.
#[derive(Default)]
pub struct LifecycleAggregator {
    health: RwLock<Vec<Arc<dyn HealthContributor>>>,
    readiness: RwLock<Vec<Arc<dyn ReadinessContributor>>>,
}

impl LifecycleAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateName`] if a health contributor
    /// with the same name exists.
    pub fn register_health(
        &self,
        contributor: Arc<dyn HealthContributor>,
    ) -> Result<(), RegistrationError> {
        let mut health = self.health.write();
        if health.iter().any(|c| c.name() == contributor.name()) {
            return Err(RegistrationError::DuplicateName {
                kind: "health",
                name: contributor.name().to_string(),
            });
        }
        health.push(contributor);
        health.sort_by_key(|c| c.priority());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateName`] if a readiness contributor
    /// with the same name exists.
    pub fn register_readiness(
        &self,
        contributor: Arc<dyn ReadinessContributor>,
    ) -> Result<(), RegistrationError> {
        let mut readiness = self.readiness.write();
        if readiness.iter().any(|c| c.name() == contributor.name()) {
            return Err(RegistrationError::DuplicateName {
                kind: "readiness",
                name: contributor.name().to_string(),
            });
        }
        readiness.push(contributor);
        readiness.sort_by_key(|c| c.priority());
        Ok(())
    }

    #[must_use]
    pub fn health_contributor_count(&self) -> usize {
        self.health.read().len()
    }

    #[must_use]
    pub fn readiness_contributor_count(&self) -> usize {
        self.readiness.read().len()
    }

    /// Evaluates health contributors in priority order, keeping the worst status.
    ///
    /// A failing check is recorded as `Unhealthy` with the error message.
    /// When a critical contributor reports `Unhealthy` (or fails), evaluation
    /// stops and the report holds only the entries gathered so far.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::Cancelled`] if `cancel` fires.
    pub async fn check_health(
        &self,
        cancel: &CancellationToken,
    ) -> Result<HealthReport, AggregationError> {
        let contributors = self.health.read().clone();
        let mut status = HealthStatus::Healthy;
        let mut entries = Vec::with_capacity(contributors.len());
        let mut short_circuited = false;

        for contributor in &contributors {
            let started = Instant::now();
            let check = match guarded(contributor.check(cancel), cancel).await? {
                Ok(check) => check,
                Err(message) => HealthCheck::unhealthy(message),
            };
            let critical = contributor.is_critical();
            record_health(contributor.name(), check.status);

            status = status.max(check.status);
            entries.push(HealthEntry {
                name: contributor.name().to_string(),
                status: check.status,
                description: check.description,
                critical,
                duration_ms: elapsed_ms(started),
            });

            if critical && check.status == HealthStatus::Unhealthy {
                warn!(
                    contributor = contributor.name(),
                    "critical health contributor unhealthy; skipping the rest"
                );
                short_circuited = true;
                break;
            }
        }

        debug!(status = %status, evaluated = entries.len(), "health aggregated");
        Ok(HealthReport {
            status,
            short_circuited,
            entries,
        })
    }

    /// Evaluates every readiness contributor in priority order.
    ///
    /// The aggregate is not ready if any required contributor is not ready
    /// or fails. Non-required contributors are reported but never affect it.
    ///
    /// # Errors
    ///
    /// Returns [`AggregationError::Cancelled`] if `cancel` fires.
    pub async fn check_readiness(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReadinessReport, AggregationError> {
        let contributors = self.readiness.read().clone();
        let mut ready = true;
        let mut entries = Vec::with_capacity(contributors.len());

        for contributor in &contributors {
            let started = Instant::now();
            let check = match guarded(contributor.check(cancel), cancel).await? {
                Ok(check) => check,
                Err(message) => ReadinessCheck::not_ready(message),
            };
            let required = contributor.is_required();
            metrics::counter!(
                "gridmesh_readiness_checks_total",
                "contributor" => contributor.name().to_string(),
                "ready" => if check.ready { "true" } else { "false" }
            )
            .increment(1);

            if required && !check.ready {
                ready = false;
            }
            entries.push(ReadinessEntry {
                name: contributor.name().to_string(),
                ready: check.ready,
                description: check.description,
                required,
                duration_ms: elapsed_ms(started),
            });
        }

        debug!(ready, evaluated = entries.len(), "readiness aggregated");
        Ok(ReadinessReport { ready, entries })
    }
}

impl std::fmt::Debug for LifecycleAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let health: Vec<String> = self.health.read().iter().map(|c| c.name().to_string()).collect();
        let readiness: Vec<String> =
            self.readiness.read().iter().map(|c| c.name().to_string()).collect();
        f.debug_struct("LifecycleAggregator")
            .field("health", &health)
            .field("readiness", &readiness)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Runs one check, converting errors and panics into a message.
///
/// Cancellation wins over the check's own outcome so it is never reported
/// as a contributor failure.
async fn guarded<T, F>(
    check: F,
    cancel: &CancellationToken,
) -> Result<Result<T, String>, AggregationError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(AggregationError::Cancelled);
    }
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(AggregationError::Cancelled),
        outcome = AssertUnwindSafe(check).catch_unwind() => outcome,
    };
    if cancel.is_cancelled() {
        return Err(AggregationError::Cancelled);
    }
    Ok(match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(panic) => Err(panic_message(panic.as_ref())),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("check panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("check panicked: {message}")
    } else {
        "check panicked".to_string()
    }
}

fn record_health(name: &str, status: HealthStatus) {
    metrics::counter!(
        "gridmesh_health_checks_total",
        "contributor" => name.to_string(),
        "status" => status.as_str()
    )
    .increment(1);
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
