//! Node availability control
//!
//! Shrinks the active storage-node set to simulate reduced cluster capacity
//! and restores it afterwards. The controller only decides which nodes move
//! and when; the start/stop mechanism belongs to the `Hosting` collaborator.

use std::fmt;
use std::sync::Arc;

use futures_util::future::join_all;
use indexmap::IndexMap;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::inventory::{Hosting, NodeStatus, SharedInventory, StorageNode};

/// Direction of a node transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Stop,
    Start,
}

impl Transition {
    fn as_str(&self) -> &'static str {
        match self {
            Transition::Stop => "stop",
            Transition::Start => "start",
        }
    }
}

/// A single node that failed to transition
#[derive(Debug, Clone, Serialize)]
pub struct NodeFailure {
    pub node: String,
    pub transition: Transition,
    pub message: String,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.transition.as_str(), self.node, self.message)
    }
}

#[derive(Debug, Error)]
pub enum NodeTransitionError {
    #[error("Requested {requested} active nodes but only {available} exist")]
    TargetExceedsInventory { requested: usize, available: usize },

    #[error("{} node transition(s) failed: {}", .0.len(), summarize(.0))]
    Failed(Vec<NodeFailure>),
}

fn summarize(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Stops excess nodes and restarts them later
///
/// Every node this controller stops is kept in an owned, ordered set until a
/// `restore` brings it back, so restoration never depends on who else ran.
/// The set's mutex is held for the whole of a transition batch, which makes
/// the controller the single serialized writer of node status.
pub struct NodeAvailabilityController {
    hosting: Arc<dyn Hosting>,
    inventory: SharedInventory,
    stopped: Mutex<IndexMap<String, StorageNode>>,
}

impl NodeAvailabilityController {
    pub fn new(hosting: Arc<dyn Hosting>, inventory: SharedInventory) -> Self {
        Self {
            hosting,
            inventory,
            stopped: Mutex::new(IndexMap::new()),
        }
    }

    /// Stop `nodes.len() - target_count` nodes from the tail of `nodes`
    ///
    /// Returns the ids of the nodes stopped by this call. All stops are
    /// attempted even if some fail; failures are reported together once
    /// every node has been tried.
    pub async fn shrink(
        &self,
        nodes: &[StorageNode],
        target_count: usize,
    ) -> Result<Vec<String>, NodeTransitionError> {
        if target_count > nodes.len() {
            return Err(NodeTransitionError::TargetExceedsInventory {
                requested: target_count,
                available: nodes.len(),
            });
        }

        let mut stopped = self.stopped.lock().await;

        let victims: Vec<&StorageNode> = nodes[target_count..]
            .iter()
            .filter(|n| !stopped.contains_key(&n.id))
            .collect();
        if victims.is_empty() {
            return Ok(Vec::new());
        }

        info!(
            "Shrinking to {} active nodes, stopping {:?}",
            target_count,
            victims.iter().map(|n| n.id.as_str()).collect::<Vec<_>>()
        );

        let outcomes = join_all(victims.iter().map(|node| self.hosting.stop(node))).await;

        let mut done = Vec::new();
        let mut failures = Vec::new();
        {
            let mut inventory = self.inventory.write().await;
            for (node, outcome) in victims.into_iter().zip(outcomes) {
                counter!("clusterload_node_transitions_total", "op" => "stop").increment(1);
                // Tracked either way: a half-stopped node must still be restarted
                stopped.insert(node.id.clone(), node.clone());
                match outcome {
                    Ok(()) => {
                        inventory.set_status(&node.id, NodeStatus::Stopped);
                        done.push(node.id.clone());
                    }
                    Err(e) => {
                        warn!("Failed to stop node {}: {}", node.id, e);
                        counter!("clusterload_node_transition_failures_total", "op" => "stop")
                            .increment(1);
                        inventory.set_status(&node.id, NodeStatus::Unknown);
                        failures.push(NodeFailure {
                            node: node.id.clone(),
                            transition: Transition::Stop,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(done)
        } else {
            Err(NodeTransitionError::Failed(failures))
        }
    }

    /// Start every node previously stopped by this controller
    ///
    /// Idempotent: a no-op when nothing is stopped. Nodes that fail to start
    /// stay tracked so a later `restore` retries them.
    pub async fn restore(&self) -> Result<Vec<String>, NodeTransitionError> {
        let mut stopped = self.stopped.lock().await;
        if stopped.is_empty() {
            return Ok(Vec::new());
        }

        let pending: Vec<StorageNode> = stopped.values().cloned().collect();
        info!(
            "Restoring stopped nodes {:?}",
            pending.iter().map(|n| n.id.as_str()).collect::<Vec<_>>()
        );

        let outcomes = join_all(pending.iter().map(|node| self.hosting.start(node))).await;

        let mut done = Vec::new();
        let mut failures = Vec::new();
        {
            let mut inventory = self.inventory.write().await;
            for (node, outcome) in pending.into_iter().zip(outcomes) {
                counter!("clusterload_node_transitions_total", "op" => "start").increment(1);
                match outcome {
                    Ok(()) => {
                        inventory.set_status(&node.id, NodeStatus::Running);
                        stopped.shift_remove(&node.id);
                        done.push(node.id);
                    }
                    Err(e) => {
                        warn!("Failed to start node {}: {}", node.id, e);
                        counter!("clusterload_node_transition_failures_total", "op" => "start")
                            .increment(1);
                        inventory.set_status(&node.id, NodeStatus::Unknown);
                        failures.push(NodeFailure {
                            node: node.id,
                            transition: Transition::Start,
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(done)
        } else {
            Err(NodeTransitionError::Failed(failures))
        }
    }

    /// Ids currently held stopped, in stop order
    pub async fn stopped_nodes(&self) -> Vec<String> {
        self.stopped.lock().await.keys().cloned().collect()
    }

    /// How many of `nodes` are known to be running
    pub async fn running_count(&self, nodes: &[StorageNode]) -> usize {
        let inventory = self.inventory.read().await;
        nodes
            .iter()
            .filter(|n| inventory.status(&n.id) == Some(NodeStatus::Running))
            .count()
    }
}
