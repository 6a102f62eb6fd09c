//! Test Utilities Module
//!
//! Fixtures and in-memory fakes for the hosting and remote execution
//! collaborators. This module is only compiled when running tests.

#![cfg(test)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::inventory::{Hosting, HostingError, NodeStatus, ProtocolFamily, StorageNode};
use crate::load::{LoadNode, LoadParameters, LoadSession, LoadSessionProvisioner, LoadTool, Workload};
use crate::remote::{CommandOutput, Connector, RemoteError, RemoteShell};

// ============================================================================
// Fixtures
// ============================================================================

/// A running node whose endpoints are derived from its id
pub fn storage_node(id: &str) -> StorageNode {
    let rpc = format!("{}.rpc:8080", id);
    let endpoint = format!("{}.endpoint:80", id);
    storage_node_with(id, &[("rpc_endpoint", rpc.as_str()), ("endpoint", endpoint.as_str())])
}

/// A running node with exactly the given endpoints
pub fn storage_node_with(id: &str, endpoints: &[(&str, &str)]) -> StorageNode {
    StorageNode {
        id: id.to_string(),
        service_name: id.to_string(),
        host: format!("{}.host", id),
        endpoints: endpoints
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        status: NodeStatus::Running,
    }
}

/// The default single-scenario workload
pub fn workload() -> Workload {
    Workload {
        obj_size: 1000,
        containers_count: 1,
        obj_count: 4,
        writers: 200,
        readers: 0,
        deleters: 0,
        load_time: Duration::from_secs(200),
        out_file: "1mb_200.json".to_string(),
        load_type: ProtocolFamily::Grpc,
    }
}

pub fn load_parameters() -> Arc<LoadParameters> {
    Arc::new(LoadParameters::new(&["10.0.1.1:8080".to_string()], workload()).expect("valid parameters"))
}

/// Provision sessions on `addresses` through a mock connector
pub async fn provision_sessions(
    connector: &MockConnector,
    addresses: &[&str],
    params: Arc<LoadParameters>,
) -> Vec<LoadSession> {
    let provisioner = LoadSessionProvisioner::new(
        Arc::new(connector.clone()),
        LoadTool::new("/opt/xk6"),
        "/var/load",
    );
    let addresses: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
    provisioner
        .provision(&addresses, "service", &PathBuf::from("/keys/id"), params)
        .await
        .expect("Failed to provision test sessions")
        .sessions
}

// ============================================================================
// Mock Hosting
// ============================================================================

#[derive(Default)]
struct HostingState {
    running: HashMap<String, bool>,
    failing: HashSet<(&'static str, String)>,
    calls: Vec<(&'static str, String)>,
}

/// In-memory hosting that records every transition
pub struct MockHosting {
    nodes: Vec<StorageNode>,
    state: Mutex<HostingState>,
}

impl MockHosting {
    pub fn new(nodes: Vec<StorageNode>) -> Self {
        let running = nodes.iter().map(|n| (n.id.clone(), true)).collect();
        Self {
            nodes,
            state: Mutex::new(HostingState {
                running,
                ..HostingState::default()
            }),
        }
    }

    pub fn fail_stop(&self, id: &str) {
        self.fail("stop", id);
    }

    pub fn fail_start(&self, id: &str) {
        self.fail("start", id);
    }

    pub fn fail_wipe(&self, id: &str) {
        self.fail("wipe", id);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.state.lock().unwrap().running.get(id).copied().unwrap_or(false)
    }

    /// Node ids passed to `op`, in call order
    pub fn calls(&self, op: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, id)| id.clone())
            .collect()
    }

    fn fail(&self, op: &'static str, id: &str) {
        self.state.lock().unwrap().failing.insert((op, id.to_string()));
    }

    fn transition(&self, op: &'static str, node: &StorageNode, running: bool) -> Result<(), HostingError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push((op, node.id.clone()));
        if state.failing.contains(&(op, node.id.clone())) {
            return Err(HostingError::CommandFailed {
                service: node.id.clone(),
                command: op.to_string(),
                exit_status: 1,
                detail: "injected failure".to_string(),
            });
        }
        if op != "wipe" {
            state.running.insert(node.id.clone(), running);
        }
        Ok(())
    }
}

#[async_trait]
impl Hosting for MockHosting {
    async fn list_nodes(&self) -> Result<Vec<StorageNode>, HostingError> {
        Ok(self.nodes.clone())
    }

    async fn stop(&self, node: &StorageNode) -> Result<(), HostingError> {
        self.transition("stop", node, false)
    }

    async fn start(&self, node: &StorageNode) -> Result<(), HostingError> {
        self.transition("start", node, true)
    }

    async fn wipe_data(&self, node: &StorageNode) -> Result<(), HostingError> {
        self.transition("wipe", node, true)
    }
}

// ============================================================================
// Mock Remote Execution
// ============================================================================

/// Scripted outcome of a remote command
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    output: CommandOutput,
    delay: Option<Duration>,
}

impl MockResponse {
    pub fn ok(stdout: &str) -> Self {
        Self {
            output: CommandOutput {
                exit_status: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
            delay: None,
        }
    }

    pub fn exit(exit_status: i32, stderr: &str) -> Self {
        Self {
            output: CommandOutput {
                exit_status,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
            delay: None,
        }
    }

    /// Respond only after `delay` has elapsed
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

struct Rule {
    host: String,
    pattern: String,
    response: MockResponse,
}

#[derive(Default)]
struct ConnectorState {
    rules: Vec<Rule>,
    unreachable: HashSet<String>,
    commands: Vec<(String, String)>,
}

/// Connector whose shells answer from a script
///
/// Commands without a matching rule succeed with empty output. Rules for a
/// specific host win over `"*"` rules; later rules win over earlier ones.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands on `host` (or any host for `"*"`) containing `pattern`
    pub fn on(&self, host: &str, pattern: &str, response: MockResponse) {
        self.state.lock().unwrap().rules.push(Rule {
            host: host.to_string(),
            pattern: pattern.to_string(),
            response,
        });
    }

    pub fn unreachable(&self, host: &str) {
        self.state.lock().unwrap().unreachable.insert(host.to_string());
    }

    /// Every command run so far as `(host, command)`
    pub fn commands(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().commands.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, node: &LoadNode) -> Result<Arc<dyn RemoteShell>, RemoteError> {
        if self.state.lock().unwrap().unreachable.contains(&node.address) {
            return Err(RemoteError::Connect {
                host: node.address.clone(),
                message: "connection timed out".to_string(),
            });
        }
        Ok(Arc::new(MockShell {
            host: node.address.clone(),
            state: self.state.clone(),
        }))
    }
}

struct MockShell {
    host: String,
    state: Arc<Mutex<ConnectorState>>,
}

#[async_trait]
impl RemoteShell for MockShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let response = {
            let mut state = self.state.lock().unwrap();
            state.commands.push((self.host.clone(), command.to_string()));
            let matches = |rule: &&Rule, host: &str| rule.host == host && command.contains(&rule.pattern);
            state
                .rules
                .iter()
                .rev()
                .find(|r| matches(r, &self.host))
                .or_else(|| state.rules.iter().rev().find(|r| matches(r, "*")))
                .map(|r| r.response.clone())
                .unwrap_or_else(|| MockResponse::ok(""))
        };

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(response.output)
    }
}
