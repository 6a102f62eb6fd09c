//! Common Test Utilities for Integration Tests
//!
//! A scripted connector standing in for `ssh`, plus inventory and
//! configuration fixtures.

use async_trait::async_trait;
use clusterload::config::{Config, SshConfig};
use clusterload::load::LoadNode;
use clusterload::remote::{CommandOutput, Connector, RemoteError, RemoteShell};
use clusterload::ShellHosting;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// Inventory with four storage nodes and one HTTP gate
pub const INVENTORY: &str = r#"{
    "access": { "login": "service", "key_path": "/keys/cluster" },
    "services": [
        { "name": "s01", "host": "10.0.1.1", "attributes": { "rpc_endpoint": "10.0.1.1:8080" },
          "wipe_command": "sudo rm -rf /srv/data/s01" },
        { "name": "s02", "host": "10.0.1.2", "attributes": { "rpc_endpoint": "10.0.1.2:8080" } },
        { "name": "s03", "host": "10.0.1.3", "attributes": { "rpc_endpoint": "10.0.1.3:8080" } },
        { "name": "s04", "host": "10.0.1.4", "attributes": { "rpc_endpoint": "10.0.1.4:8080" } },
        { "name": "http-gate01", "host": "10.0.1.9", "attributes": { "endpoint": "10.0.1.9:80" } }
    ]
}"#;

#[derive(Default)]
struct FakeState {
    unreachable: HashSet<String>,
    failing: Vec<String>,
    commands: Vec<(String, String)>,
}

/// Connector where every command succeeds unless scripted otherwise
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable(&self, host: &str) {
        self.state.lock().unwrap().unreachable.insert(host.to_string());
    }

    /// Commands containing `pattern` exit with status 1
    pub fn fail(&self, pattern: &str) {
        self.state.lock().unwrap().failing.push(pattern.to_string());
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn ran(&self, host: &str, command: &str) -> bool {
        self.commands().iter().any(|(h, c)| h == host && c == command)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, node: &LoadNode) -> Result<Arc<dyn RemoteShell>, RemoteError> {
        if self.state.lock().unwrap().unreachable.contains(&node.address) {
            return Err(RemoteError::Connect {
                host: node.address.clone(),
                message: "no route to host".to_string(),
            });
        }
        Ok(Arc::new(FakeShell {
            host: node.address.clone(),
            state: self.state.clone(),
        }))
    }
}

struct FakeShell {
    host: String,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl RemoteShell for FakeShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push((self.host.clone(), command.to_string()));
        let failed = state.failing.iter().any(|p| command.contains(p.as_str()));
        Ok(CommandOutput {
            exit_status: if failed { 1 } else { 0 },
            stdout: String::new(),
            stderr: if failed { "scripted failure".to_string() } else { String::new() },
        })
    }
}

/// Write the inventory to a temp file and load it
pub fn shell_hosting(connector: &FakeConnector) -> (NamedTempFile, Arc<ShellHosting>) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(INVENTORY.as_bytes()).unwrap();
    let hosting = ShellHosting::from_file(file.path(), Arc::new(connector.clone())).unwrap();
    (file, Arc::new(hosting))
}

pub fn test_config(artifacts_dir: &Path, load_nodes: &[&str]) -> Config {
    Config {
        artifacts_dir: artifacts_dir.to_path_buf(),
        ssh: SshConfig {
            load_nodes: load_nodes.iter().map(|s| s.to_string()).collect(),
            ..SshConfig::default()
        },
        ..Config::default()
    }
}
