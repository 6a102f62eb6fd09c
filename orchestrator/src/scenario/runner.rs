//! Scenario execution
//!
//! One scenario runs as: reset (pre) → shrink → resolve → parameters →
//! bootstrap → provision → concurrent run → restore (post). The restore
//! step runs on every exit path of the body, panics included.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::hooks::EnvironmentResetHook;
use super::matrix::{ScenarioMatrix, ScenarioSpec};
use crate::config::Config;
use crate::inventory::{
    Hosting, HostingError, ProtocolFamily, ResolveError, ServiceSelector, SharedInventory, StorageNode,
    discover, resolve,
};
use crate::load::{
    BootstrapError, CoordinatorConfig, IssuerSettings, LoadNode, LoadParameters, LoadRunCoordinator,
    LoadSessionProvisioner, LoadTool, ParameterError, ProtocolBootstrapper, ProvisioningError, ScenarioResult,
    SuiteEntry, SuiteReport,
};
use crate::nodes::{NodeAvailabilityController, NodeFailure, NodeTransitionError};
use crate::remote::Connector;

/// Errors that abort a scenario before or instead of a load run
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Endpoint resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Node transition failed: {0}")]
    Nodes(#[from] NodeTransitionError),

    #[error("Client bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("Provisioning failed: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("Invalid load parameters: {0}")]
    Parameters(#[from] ParameterError),

    #[error("Hosting error: {0}")]
    Hosting(#[from] HostingError),

    #[error("Only {running} storage nodes running, {required} required")]
    InsufficientNodes { required: usize, running: usize },

    #[error("No load nodes configured")]
    NoLoadNodes,

    /// The scenario failed and the cluster could not be fully restored
    #[error("{source}; restore also failed: {}", describe_failures(.restore_failures))]
    RestoreFailed {
        source: Box<ScenarioError>,
        restore_failures: Vec<NodeFailure>,
    },
}

fn describe_failures(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Runs scenarios against one cluster, one at a time
pub struct ScenarioRunner {
    config: Config,
    inventory: SharedInventory,
    controller: Arc<NodeAvailabilityController>,
    hook: EnvironmentResetHook,
    bootstrapper: ProtocolBootstrapper,
    provisioner: LoadSessionProvisioner,
    coordinator: LoadRunCoordinator,
}

impl ScenarioRunner {
    /// Discover the cluster and wire every component to it
    pub async fn new(
        config: Config,
        hosting: Arc<dyn Hosting>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ScenarioError> {
        let inventory = discover(hosting.as_ref()).await?.into_shared();
        let controller = Arc::new(NodeAvailabilityController::new(hosting.clone(), inventory.clone()));
        let hook = EnvironmentResetHook::new(
            hosting,
            inventory.clone(),
            controller.clone(),
            config.artifacts_dir.join("state"),
        );
        let bootstrapper = ProtocolBootstrapper::new(connector.clone(), config.load.tool_dir.clone());
        let provisioner = LoadSessionProvisioner::new(
            connector,
            LoadTool::new(config.load.tool_dir.clone()),
            config.load.remote_dir.clone(),
        );
        let coordinator = LoadRunCoordinator::new(CoordinatorConfig {
            grace_period: config.load.session_grace,
            scenario_timeout: config.load.scenario_timeout,
        });

        Ok(Self {
            config,
            inventory,
            controller,
            hook,
            bootstrapper,
            provisioner,
            coordinator,
        })
    }

    /// Run every scenario of `matrix` sequentially
    pub async fn run_suite(&self, matrix: &ScenarioMatrix) -> SuiteReport {
        let mut report = SuiteReport::new(Uuid::new_v4().to_string());
        let specs = matrix.expand();
        info!("Suite {}: {} scenarios", report.run_id, specs.len());

        for (index, spec) in specs.into_iter().enumerate() {
            info!("[{}] {}", index + 1, spec.title());
            match self.run(&spec).await {
                Ok(result) => {
                    if result.success {
                        info!("[{}] passed", index + 1);
                    } else {
                        warn!(
                            "[{}] failed: {} of {} sessions did not succeed",
                            index + 1,
                            result.failed_runs().count(),
                            result.results.len()
                        );
                    }
                    report.push(SuiteEntry::Completed { spec, result });
                }
                Err(e) => {
                    error!("[{}] aborted: {}", index + 1, e);
                    report.push(SuiteEntry::Aborted {
                        spec,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.finish();
        info!(
            "Suite {} finished: {}/{} scenarios passed",
            report.run_id,
            report.passed(),
            report.scenarios.len()
        );
        report
    }

    /// Run one scenario between the reset hook's `pre` and `post`
    pub async fn run(&self, spec: &ScenarioSpec) -> Result<ScenarioResult, ScenarioError> {
        self.hook.pre().await;

        let outcome = AssertUnwindSafe(self.execute(spec)).catch_unwind().await;
        let restored = self.hook.post().await;

        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                if let Err(e) = restored {
                    error!("Restore after panic failed: {}", e);
                }
                std::panic::resume_unwind(panic);
            }
        };

        let restore_failures = match restored {
            Ok(()) => return result,
            Err(NodeTransitionError::Failed(failures)) => failures,
            Err(e) => {
                error!("Failed to restore stopped nodes: {}", e);
                return result;
            }
        };
        error!(
            "Failed to restore stopped nodes: {}",
            describe_failures(&restore_failures)
        );
        match result {
            Ok(mut result) => {
                result.node_failures.extend(restore_failures);
                Ok(result)
            }
            Err(source) => Err(ScenarioError::RestoreFailed {
                source: Box::new(source),
                restore_failures,
            }),
        }
    }

    async fn execute(&self, spec: &ScenarioSpec) -> Result<ScenarioResult, ScenarioError> {
        let storage = ServiceSelector::for_protocol(ProtocolFamily::Grpc, &self.config.patterns)?;
        let storage_nodes: Vec<StorageNode> = self
            .inventory
            .read()
            .await
            .matching(storage.pattern())
            .cloned()
            .collect();

        let mut node_failures = Vec::new();
        match self.controller.shrink(&storage_nodes, spec.node_count).await {
            Ok(_) => {}
            Err(NodeTransitionError::Failed(failures)) => {
                warn!("{} storage node(s) failed to stop", failures.len());
                node_failures = failures;
            }
            Err(e) => return Err(e.into()),
        }
        let running = self.controller.running_count(&storage_nodes).await;
        if running < spec.node_count {
            return Err(ScenarioError::InsufficientNodes {
                required: spec.node_count,
                running,
            });
        }

        let selector = ServiceSelector::for_protocol(spec.load_type, &self.config.patterns)?;
        let endpoints: Vec<String> = {
            let inventory = self.inventory.read().await;
            resolve(&inventory, &selector)?
                .into_iter()
                .take(spec.node_count)
                .collect()
        };
        let parameters = Arc::new(LoadParameters::new(&endpoints, spec.workload())?);

        let ssh = &self.config.ssh;
        if ssh.load_nodes.is_empty() {
            return Err(ScenarioError::NoLoadNodes);
        }
        if spec.load_nodes_count > ssh.load_nodes.len() {
            warn!(
                "{} load nodes requested, only {} configured",
                spec.load_nodes_count,
                ssh.load_nodes.len()
            );
        }
        let load_nodes: Vec<String> = ssh
            .load_nodes
            .iter()
            .take(spec.load_nodes_count)
            .cloned()
            .collect();

        if spec.load_type.requires_bootstrap() {
            let issuer = self.issuer_settings(&storage).await?;
            let nodes: Vec<LoadNode> = load_nodes
                .iter()
                .map(|address| LoadNode::new(address.clone(), ssh.user.clone(), ssh.private_key_path.clone()))
                .collect();
            self.bootstrapper
                .ensure_client(
                    spec.load_type,
                    &nodes,
                    &issuer,
                    &self.config.load.container_placement_policy,
                )
                .await?;
        }

        let provisioned = self
            .provisioner
            .provision(&load_nodes, &ssh.user, &ssh.private_key_path, parameters)
            .await?;

        let mut result = self.coordinator.run(provisioned.sessions).await;
        result.title = spec.title();
        result.provisioning_failures = provisioned.failures;
        result.node_failures = node_failures;
        Ok(result)
    }

    /// Credential issue goes through the first running storage node
    async fn issuer_settings(&self, storage: &ServiceSelector) -> Result<IssuerSettings, ScenarioError> {
        let peer = {
            let inventory = self.inventory.read().await;
            resolve(&inventory, storage)?
                .into_iter()
                .next()
                .ok_or_else(|| ResolveError::NoMatchingService(storage.pattern().as_str().to_string()))?
        };
        let load = &self.config.load;
        Ok(IssuerSettings {
            authmate_path: load.authmate_path.clone(),
            wallet_path: load.wallet_path.clone(),
            gate_public_key: load.s3_gate_public_key.clone(),
            peer,
        })
    }
}
