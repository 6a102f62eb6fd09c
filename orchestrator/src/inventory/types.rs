//! Cluster inventory types

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Running state of a storage node as last observed by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Running,
    Stopped,
    /// A transition was attempted and failed; the node may be in either state
    Unknown,
}

/// A cluster member exposing one or more protocol endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNode {
    /// Stable identity (unique within the inventory)
    pub id: String,
    /// Service name matched by endpoint selectors (e.g. `s01`, `http-gate01`)
    pub service_name: String,
    /// Host the service runs on
    pub host: String,
    /// Named endpoints, keyed by attribute (`rpc_endpoint`, `endpoint`, ...)
    pub endpoints: BTreeMap<String, String>,
    pub status: NodeStatus,
}

impl StorageNode {
    pub fn endpoint(&self, field: &str) -> Option<&str> {
        self.endpoints.get(field).map(String::as_str)
    }

    pub fn is_running(&self) -> bool {
        self.status == NodeStatus::Running
    }
}

/// Ordered set of storage nodes
#[derive(Debug, Clone, Default)]
pub struct ClusterInventory {
    nodes: Vec<StorageNode>,
}

/// Inventory shared between the node controller (sole writer) and readers
pub type SharedInventory = Arc<RwLock<ClusterInventory>>;

impl ClusterInventory {
    pub fn new(nodes: Vec<StorageNode>) -> Self {
        Self { nodes }
    }

    pub fn into_shared(self) -> SharedInventory {
        Arc::new(RwLock::new(self))
    }

    pub fn nodes(&self) -> &[StorageNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&StorageNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Nodes whose service name matches `pattern`, in inventory order
    pub fn matching<'a>(&'a self, pattern: &'a Regex) -> impl Iterator<Item = &'a StorageNode> {
        self.nodes
            .iter()
            .filter(move |n| pattern.is_match(&n.service_name))
    }

    /// Update a node's status. Returns false if the node is unknown.
    pub fn set_status(&mut self, id: &str, status: NodeStatus) -> bool {
        match self.nodes.iter_mut().find(|n| n.id == id) {
            Some(node) => {
                node.status = status;
                true
            }
            None => false,
        }
    }

    pub fn status(&self, id: &str) -> Option<NodeStatus> {
        self.node(id).map(|n| n.status)
    }
}
