//! Cluster hosting collaborator
//!
//! `Hosting` is the narrow capability the orchestrator needs from whatever
//! deployed the cluster: list services, read their endpoints, stop and start
//! them. `ShellHosting` implements it over a JSON service inventory, running
//! each service's control commands on its host through a `Connector`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use super::types::{ClusterInventory, NodeStatus, StorageNode};
use crate::load::LoadNode;
use crate::remote::{Connector, RemoteError};

/// Errors raised by the hosting collaborator
#[derive(Debug, Error)]
pub enum HostingError {
    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("'{command}' failed on {service} (exit {exit_status}): {detail}")]
    CommandFailed {
        service: String,
        command: String,
        exit_status: i32,
        detail: String,
    },

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Failed to read inventory {path:?}: {source}")]
    Inventory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid inventory: {0}")]
    InvalidInventory(#[from] serde_json::Error),
}

/// Capability interface onto the deployed cluster
#[async_trait]
pub trait Hosting: Send + Sync {
    /// All known services, in inventory order
    async fn list_nodes(&self) -> Result<Vec<StorageNode>, HostingError>;

    /// Read a named endpoint of a node
    fn get_endpoint(&self, node: &StorageNode, field: &str) -> Option<String> {
        node.endpoint(field).map(str::to_string)
    }

    async fn stop(&self, node: &StorageNode) -> Result<(), HostingError>;

    async fn start(&self, node: &StorageNode) -> Result<(), HostingError>;

    /// Remove the node's persisted data and caches
    async fn wipe_data(&self, _node: &StorageNode) -> Result<(), HostingError> {
        Ok(())
    }
}

/// Build a fresh inventory from the hosting collaborator
pub async fn discover(hosting: &dyn Hosting) -> Result<ClusterInventory, HostingError> {
    let nodes = hosting.list_nodes().await?;
    info!("Discovered {} cluster services", nodes.len());
    Ok(ClusterInventory::new(nodes))
}

/// One service entry of the inventory file
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub host: String,
    /// Endpoint attributes (`rpc_endpoint`, `endpoint`, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub stop_command: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
    #[serde(default)]
    pub wipe_command: Option<String>,
}

impl ServiceConfig {
    fn stop_command(&self) -> String {
        self.stop_command
            .clone()
            .unwrap_or_else(|| format!("sudo systemctl stop {}", self.name))
    }

    fn start_command(&self) -> String {
        self.start_command
            .clone()
            .unwrap_or_else(|| format!("sudo systemctl start {}", self.name))
    }
}

/// Credentials used to reach cluster hosts
#[derive(Debug, Clone, Deserialize)]
pub struct HostAccess {
    pub login: String,
    pub key_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct InventoryFile {
    access: HostAccess,
    services: Vec<ServiceConfig>,
}

/// Hosting backed by an inventory file and remote shell commands
pub struct ShellHosting {
    services: Vec<ServiceConfig>,
    access: HostAccess,
    connector: Arc<dyn Connector>,
}

impl ShellHosting {
    pub fn new(
        services: Vec<ServiceConfig>,
        access: HostAccess,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            services,
            access,
            connector,
        }
    }

    /// Load the inventory from a JSON file
    pub fn from_file(path: &Path, connector: Arc<dyn Connector>) -> Result<Self, HostingError> {
        let raw = std::fs::read_to_string(path).map_err(|source| HostingError::Inventory {
            path: path.to_path_buf(),
            source,
        })?;
        let file: InventoryFile = serde_json::from_str(&raw)?;
        info!(
            "Loaded inventory {:?}: {} services",
            path,
            file.services.len()
        );
        Ok(Self::new(file.services, file.access, connector))
    }

    fn service(&self, name: &str) -> Result<&ServiceConfig, HostingError> {
        self.services
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| HostingError::UnknownService(name.to_string()))
    }

    async fn run_on_host(&self, service: &ServiceConfig, command: &str) -> Result<(), HostingError> {
        let host = LoadNode::new(
            service.host.clone(),
            self.access.login.clone(),
            self.access.key_path.clone(),
        );
        let shell = self.connector.connect(&host).await?;
        let output = shell.execute(command).await?;

        if !output.success() {
            return Err(HostingError::CommandFailed {
                service: service.name.clone(),
                command: command.to_string(),
                exit_status: output.exit_status,
                detail: output.last_line().to_string(),
            });
        }

        debug!("[{}] '{}' ok", service.name, command);
        Ok(())
    }
}

#[async_trait]
impl Hosting for ShellHosting {
    async fn list_nodes(&self) -> Result<Vec<StorageNode>, HostingError> {
        Ok(self
            .services
            .iter()
            .map(|s| StorageNode {
                id: s.name.clone(),
                service_name: s.name.clone(),
                host: s.host.clone(),
                endpoints: s.attributes.clone(),
                status: NodeStatus::Running,
            })
            .collect())
    }

    async fn stop(&self, node: &StorageNode) -> Result<(), HostingError> {
        let service = self.service(&node.id)?;
        self.run_on_host(service, &service.stop_command()).await
    }

    async fn start(&self, node: &StorageNode) -> Result<(), HostingError> {
        let service = self.service(&node.id)?;
        self.run_on_host(service, &service.start_command()).await
    }

    async fn wipe_data(&self, node: &StorageNode) -> Result<(), HostingError> {
        let service = self.service(&node.id)?;
        let Some(wipe) = service.wipe_command.as_deref() else {
            debug!("No wipe command for {}, skipping", service.name);
            return Ok(());
        };

        self.run_on_host(service, &service.stop_command()).await?;
        let wiped = self.run_on_host(service, wipe).await;
        // Bring the service back even if the wipe failed
        let started = self.run_on_host(service, &service.start_command()).await;
        wiped.and(started)
    }
}
