//! Drives the node lifecycle stage from process events.
//!
//! Wraps the shared [`NodeContext`] stage with the shutdown signal and an
//! in-flight counter, so the network layer can:
//! 1. reject new work once `begin_shutdown()` has moved the node to `Stopping`
//! 2. wait for in-flight units of work with `wait_for_drain()`
//! 3. let aggregated health toggle `Running` and `Degraded`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gridmesh_core::{LifecycleStage, NodeContext};
use tokio::sync::watch;
use tracing::{error, info};

use super::{HealthReport, HealthStatus};

#[derive(Debug)]
pub struct LifecycleController {
    node: Arc<NodeContext>,
    shutdown_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
}

impl LifecycleController {
    #[must_use]
    pub fn new(node: Arc<NodeContext>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            node,
            shutdown_signal: tx,
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn node(&self) -> &Arc<NodeContext> {
        &self.node
    }

    #[must_use]
    pub fn stage(&self) -> LifecycleStage {
        self.node.stage()
    }

    /// Node is binding listeners and registering contributors.
    pub fn mark_started(&self) -> bool {
        self.node.transition_to(LifecycleStage::Starting)
    }

    /// Node accepts work.
    pub fn mark_running(&self) -> bool {
        self.node.transition_to(LifecycleStage::Running)
    }

    /// Moves to `Stopping` and signals every shutdown receiver.
    pub fn begin_shutdown(&self) -> bool {
        let changed = self.node.transition_to(LifecycleStage::Stopping);
        // Receivers may have been dropped.
        let _ = self.shutdown_signal.send(true);
        changed
    }

    pub fn mark_stopped(&self) -> bool {
        self.node.transition_to(LifecycleStage::Stopped)
    }

    pub fn mark_failed(&self, reason: &str) -> bool {
        error!(node_id = %self.node.node_id(), reason, "node failed");
        self.node.transition_to(LifecycleStage::Failed)
    }

    /// Moves `Running` to `Degraded` when health is not `Healthy`, and back
    /// when it recovers. Other stages are left alone.
    pub fn reconcile_health(&self, report: &HealthReport) -> LifecycleStage {
        let stage = self.node.stage();
        let next = match (stage, report.status) {
            (LifecycleStage::Running, HealthStatus::Degraded | HealthStatus::Unhealthy) => {
                LifecycleStage::Degraded
            }
            (LifecycleStage::Degraded, HealthStatus::Healthy) => LifecycleStage::Running,
            _ => return stage,
        };
        info!(from = %stage, to = %next, health = %report.status, "stage reconciled with health");
        self.node.transition_to(next);
        next
    }

    /// Whether new units of work should be admitted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        matches!(
            self.node.stage(),
            LifecycleStage::Running | LifecycleStage::Degraded
        )
    }

    /// Receiver notified when shutdown begins.
    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_signal.subscribe()
    }

    /// Tracks one in-flight unit of work until the guard is dropped.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for in-flight work to finish, up to `timeout`.
    ///
    /// Moves to `Stopped` and returns `true` on a clean drain; on timeout the
    /// stage is left unchanged and `false` is returned.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.mark_stopped();
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Decrements the in-flight counter when dropped, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
