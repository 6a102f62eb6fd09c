//! Load session provisioning
//!
//! Opens a channel to every load node, verifies the load tool, stages the
//! pre-generated objects and binds a unique artifact path. Nodes are
//! provisioned concurrently and independently: one node failing never blocks
//! the others.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures_util::future::join_all;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::params::{LoadNode, LoadParameters};
use super::session::{LoadSession, LoadTool};
use crate::remote::{Connector, RemoteError};

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("Load node {node} is unreachable: {source}")]
    Unreachable {
        node: String,
        #[source]
        source: RemoteError,
    },

    #[error("Load tool is not available on {node}: {detail}")]
    ToolMissing { node: String, detail: String },

    #[error("Object pre-generation failed on {node} (exit {exit_status}): {detail}")]
    PresetFailed {
        node: String,
        exit_status: i32,
        detail: String,
    },

    #[error("Remote command failed on {node}: {source}")]
    Remote {
        node: String,
        #[source]
        source: RemoteError,
    },

    #[error("No load session could be provisioned ({} node(s) failed)", .0.len())]
    NoSessions(Vec<ProvisioningFailure>),
}

/// A load node that could not be provisioned
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningFailure {
    pub node: String,
    pub reason: String,
}

/// Prepared sessions plus the nodes that failed
#[derive(Debug)]
pub struct ProvisionOutcome {
    pub sessions: Vec<LoadSession>,
    pub failures: Vec<ProvisioningFailure>,
}

impl ProvisionOutcome {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

pub struct LoadSessionProvisioner {
    connector: Arc<dyn Connector>,
    tool: LoadTool,
    /// Directory on the load nodes where artifacts are written
    remote_dir: String,
}

impl LoadSessionProvisioner {
    pub fn new(connector: Arc<dyn Connector>, tool: LoadTool, remote_dir: impl Into<String>) -> Self {
        Self {
            connector,
            tool,
            remote_dir: remote_dir.into(),
        }
    }

    /// Prepare one session per load node, all sharing `parameters`
    ///
    /// Returns the successful subset together with per-node failures. Fails
    /// only when no session at all could be prepared.
    pub async fn provision(
        &self,
        load_nodes: &[String],
        login: &str,
        key_path: &Path,
        parameters: Arc<LoadParameters>,
    ) -> Result<ProvisionOutcome, ProvisioningError> {
        let nodes: Vec<LoadNode> = load_nodes
            .iter()
            .map(|address| LoadNode::new(address.clone(), login, key_path))
            .collect();
        let identities = unique_identities(&nodes);

        let attempts = nodes
            .iter()
            .zip(&identities)
            .map(|(node, identity)| self.prepare(node, identity, parameters.clone()));
        let outcomes = join_all(attempts).await;

        let mut sessions = Vec::new();
        let mut failures = Vec::new();
        for (node, outcome) in nodes.iter().zip(outcomes) {
            match outcome {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    warn!("Provisioning failed for {}: {}", node.address, e);
                    counter!("clusterload_provisioning_failures_total").increment(1);
                    failures.push(ProvisioningFailure {
                        node: node.address.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if sessions.is_empty() {
            return Err(ProvisioningError::NoSessions(failures));
        }
        if !failures.is_empty() {
            warn!(
                "Partial provisioning: {}/{} load nodes ready",
                sessions.len(),
                nodes.len()
            );
        } else {
            info!("Provisioned {} load sessions", sessions.len());
        }

        Ok(ProvisionOutcome { sessions, failures })
    }

    async fn prepare(
        &self,
        node: &LoadNode,
        identity: &str,
        params: Arc<LoadParameters>,
    ) -> Result<LoadSession, ProvisioningError> {
        let shell = self
            .connector
            .connect(node)
            .await
            .map_err(|source| ProvisioningError::Unreachable {
                node: node.address.clone(),
                source,
            })?;
        let remote = |source| ProvisioningError::Remote {
            node: node.address.clone(),
            source,
        };

        let version = shell.execute(&self.tool.version_command()).await.map_err(remote)?;
        if !version.success() {
            return Err(ProvisioningError::ToolMissing {
                node: node.address.clone(),
                detail: version.last_line().to_string(),
            });
        }

        let artifact_path = format!("{}/{}", self.remote_dir, params.artifact_name(identity));
        let pregen_path = format!(
            "{}/{}_{}_pregen.json",
            self.remote_dir, params.load_type, identity
        );

        let preset = shell
            .execute(&self.tool.preset_command(&params, &pregen_path))
            .await
            .map_err(remote)?;
        if !preset.success() {
            return Err(ProvisioningError::PresetFailed {
                node: node.address.clone(),
                exit_status: preset.exit_status,
                detail: preset.last_line().to_string(),
            });
        }

        info!("Load session ready on {} -> {}", node.address, artifact_path);
        Ok(LoadSession::new(
            node.clone(),
            params,
            shell,
            self.tool.clone(),
            artifact_path,
            pregen_path,
        ))
    }
}

/// Per-node identities, suffixed where two nodes share an address
fn unique_identities(nodes: &[LoadNode]) -> Vec<String> {
    let mut seen = HashSet::new();
    nodes
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let base = node.identity();
            if seen.insert(base.clone()) {
                return base;
            }
            let mut suffix = index;
            loop {
                let candidate = format!("{}-{}", base, suffix);
                if seen.insert(candidate.clone()) {
                    return candidate;
                }
                suffix += 1;
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockConnector, MockResponse, load_parameters};
    use std::path::PathBuf;

    fn provisioner(connector: &MockConnector) -> LoadSessionProvisioner {
        LoadSessionProvisioner::new(
            Arc::new(connector.clone()),
            LoadTool::new("/opt/xk6"),
            "/var/load",
        )
    }

    fn addresses(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_provision_partial_failure() {
        let connector = MockConnector::new();
        connector.unreachable("10.0.0.3");
        let nodes = addresses(&["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]);

        let outcome = provisioner(&connector)
            .provision(&nodes, "service", &PathBuf::from("/keys/id"), load_parameters())
            .await
            .unwrap();

        assert_eq!(outcome.sessions.len(), 3);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].node, "10.0.0.3");
        assert!(outcome.is_partial());
        assert!(
            outcome.sessions.iter().all(|s| s.node().address != "10.0.0.3"),
            "Unreachable node must not get a session"
        );
    }

    #[tokio::test]
    async fn test_sessions_share_parameters_and_have_unique_artifacts() {
        let connector = MockConnector::new();
        let params = load_parameters();
        let nodes = addresses(&["10.0.0.1", "10.0.0.2", "10.0.0.1"]);

        let outcome = provisioner(&connector)
            .provision(&nodes, "service", &PathBuf::from("/keys/id"), params.clone())
            .await
            .unwrap();

        let artifacts: HashSet<&str> = outcome.sessions.iter().map(|s| s.artifact_path()).collect();
        assert_eq!(artifacts.len(), 3, "Artifact paths must be unique");
        assert!(artifacts.contains("/var/load/grpc_10_0_0_1_1mb_200.json"));
        assert!(artifacts.contains("/var/load/grpc_10_0_0_1-2_1mb_200.json"));
        assert!(outcome.sessions.iter().all(|s| Arc::ptr_eq(s.parameters(), &params)));
    }

    #[tokio::test]
    async fn test_suffixed_identity_never_collides_with_real_one() {
        let connector = MockConnector::new();
        let nodes = addresses(&["load-2", "load", "load"]);

        let outcome = provisioner(&connector)
            .provision(&nodes, "service", &PathBuf::from("/keys/id"), load_parameters())
            .await
            .unwrap();

        let artifacts: HashSet<&str> = outcome.sessions.iter().map(|s| s.artifact_path()).collect();
        assert_eq!(artifacts.len(), 3, "Artifact paths must be unique: {:?}", artifacts);
        assert!(artifacts.contains("/var/load/grpc_load-2_1mb_200.json"));
        assert!(artifacts.contains("/var/load/grpc_load_1mb_200.json"));
        assert!(artifacts.contains("/var/load/grpc_load-3_1mb_200.json"));
    }

    #[tokio::test]
    async fn test_provision_does_not_start_load() {
        let connector = MockConnector::new();
        let nodes = addresses(&["10.0.0.1"]);

        provisioner(&connector)
            .provision(&nodes, "service", &PathBuf::from("/keys/id"), load_parameters())
            .await
            .unwrap();

        let commands: Vec<String> = connector.commands().into_iter().map(|(_, c)| c).collect();
        assert_eq!(commands.len(), 2, "Only version check and preset: {:?}", commands);
        assert!(commands[0].ends_with("k6 version"));
        assert!(commands[1].contains("preset_grpc.py"));
    }

    #[tokio::test]
    async fn test_missing_tool_and_failed_preset() {
        let connector = MockConnector::new();
        connector.on("10.0.0.1", "k6 version", MockResponse::exit(127, "k6: not found"));
        connector.on("10.0.0.2", "preset_grpc.py", MockResponse::exit(1, "no space left"));
        let nodes = addresses(&["10.0.0.1", "10.0.0.2"]);

        let result = provisioner(&connector)
            .provision(&nodes, "service", &PathBuf::from("/keys/id"), load_parameters())
            .await;

        let failures = match result {
            Err(ProvisioningError::NoSessions(failures)) => failures,
            other => panic!("Expected NoSessions, got {:?}", other),
        };
        assert_eq!(failures.len(), 2);
        assert!(failures[0].reason.contains("k6: not found"));
        assert!(failures[1].reason.contains("no space left"));
    }
}
