//! Process-wide node identity and lifecycle stage.
//!
//! The stage lives in a single `watch` channel: reads borrow the current
//! value and transitions use `send_if_modified`, so observers are notified
//! only of effective changes. Every other field is fixed at construction.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::grid::GridContext;
use crate::ids::{Environment, NodeId, StudioId};

/// Lifecycle stage of a node process.
///
/// Transitions are permissive: any stage may follow any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleStage {
    Initializing,
    Starting,
    Running,
    Degraded,
    Stopping,
    Stopped,
    Failed,
}

impl LifecycleStage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Degraded => "degraded",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static node identity supplied by the bootstrap layer.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    pub studio_id: StudioId,
    pub environment: Environment,
    /// Deployed build version.
    pub version: String,
    pub host_name: String,
    /// Free-form deployment tags (region, zone, ...).
    pub tags: BTreeMap<String, String>,
}

/// Process-wide node context, shared read-mostly across all units of work.
#[derive(Debug)]
pub struct NodeContext {
    node_id: NodeId,
    studio_id: StudioId,
    environment: Environment,
    version: String,
    host_name: String,
    process_id: u32,
    started_at: DateTime<Utc>,
    tags: BTreeMap<String, String>,
    stage: watch::Sender<LifecycleStage>,
}

impl NodeContext {
    /// Creates the node context in the `Initializing` stage.
    #[must_use]
    pub fn new(descriptor: NodeDescriptor) -> Self {
        let (stage, _rx) = watch::channel(LifecycleStage::Initializing);
        Self {
            node_id: descriptor.node_id,
            studio_id: descriptor.studio_id,
            environment: descriptor.environment,
            version: descriptor.version,
            host_name: descriptor.host_name,
            process_id: std::process::id(),
            started_at: Utc::now(),
            tags: descriptor.tags,
            stage,
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    #[must_use]
    pub fn studio_id(&self) -> &StudioId {
        &self.studio_id
    }

    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    #[must_use]
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Returns the current lifecycle stage.
    #[must_use]
    pub fn stage(&self) -> LifecycleStage {
        *self.stage.borrow()
    }

    /// Moves to `next`. Returns `false` (and does nothing) if already there.
    ///
    /// No legality checks are applied: any stage may follow any other.
    pub fn transition_to(&self, next: LifecycleStage) -> bool {
        let mut previous = next;
        let changed = self.stage.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            previous = std::mem::replace(current, next);
            true
        });
        if !changed {
            return false;
        }
        tracing::info!(
            node_id = %self.node_id,
            from = %previous,
            to = %next,
            "node lifecycle transition"
        );
        true
    }

    /// Returns a receiver notified on every effective stage transition.
    #[must_use]
    pub fn subscribe_stage(&self) -> watch::Receiver<LifecycleStage> {
        self.stage.subscribe()
    }

    /// Creates an uninitialized grid context carrying this node's identity.
    #[must_use]
    pub fn new_grid_context(&self) -> GridContext {
        GridContext::new(
            self.node_id.clone(),
            self.studio_id.clone(),
            self.environment.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::ContextState;

    fn node() -> NodeContext {
        NodeContext::new(NodeDescriptor {
            node_id: NodeId::new("node-a").unwrap(),
            studio_id: StudioId::new("studio-1").unwrap(),
            environment: Environment::new("test").unwrap(),
            version: "1.2.3".to_string(),
            host_name: "host-1".to_string(),
            tags: BTreeMap::from([("region".to_string(), "eu".to_string())]),
        })
    }

    #[test]
    fn starts_initializing() {
        let node = node();
        assert_eq!(node.stage(), LifecycleStage::Initializing);
        assert_eq!(node.process_id(), std::process::id());
        assert_eq!(node.tags().get("region").map(String::as_str), Some("eu"));
    }

    #[test]
    fn transition_to_same_stage_is_noop() {
        let node = node();
        assert!(!node.transition_to(LifecycleStage::Initializing));
        assert!(node.transition_to(LifecycleStage::Starting));
        assert!(!node.transition_to(LifecycleStage::Starting));
    }

    #[test]
    fn transitions_are_permissive() {
        let node = node();
        assert!(node.transition_to(LifecycleStage::Stopped));
        assert!(node.transition_to(LifecycleStage::Running));
        assert_eq!(node.stage(), LifecycleStage::Running);
    }

    #[tokio::test]
    async fn subscribers_see_effective_transitions() {
        let node = node();
        let mut rx = node.subscribe_stage();
        node.transition_to(LifecycleStage::Running);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), LifecycleStage::Running);

        node.transition_to(LifecycleStage::Running);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn concurrent_transitions_leave_a_valid_stage() {
        let node = Arc::new(node());
        let stages = [
            LifecycleStage::Starting,
            LifecycleStage::Running,
            LifecycleStage::Degraded,
            LifecycleStage::Stopping,
        ];
        let handles: Vec<_> = stages
            .iter()
            .map(|&stage| {
                let node = Arc::clone(&node);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        node.transition_to(stage);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(stages.contains(&node.stage()));
        assert_eq!(*node.subscribe_stage().borrow(), node.stage());
    }

    #[test]
    fn new_grid_context_carries_identity() {
        let node = node();
        let grid = node.new_grid_context();
        assert_eq!(grid.state(), ContextState::Uninitialized);
        assert_eq!(grid.node_id().as_str(), "node-a");
        assert_eq!(grid.studio_id().as_str(), "studio-1");
        assert_eq!(grid.environment().as_str(), "test");
    }
}
