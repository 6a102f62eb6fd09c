//! SSH-backed remote execution

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{CommandOutput, Connector, RemoteError, RemoteShell};
use crate::load::LoadNode;

/// Exit status the OpenSSH client reserves for its own failures
const SSH_CLIENT_FAILURE: i32 = 255;

/// Connector that runs commands through the system `ssh` client
///
/// Authentication is key-only (`BatchMode=yes`) so an unreachable or
/// misconfigured host fails fast instead of waiting on a password prompt.
pub struct SshConnector {
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, node: &LoadNode) -> Result<Arc<dyn RemoteShell>, RemoteError> {
        let shell = SshShell {
            host: node.address.clone(),
            login: node.login.clone(),
            key_path: node.key_path.clone(),
            connect_timeout: self.connect_timeout,
        };

        // Check the channel once so connection problems surface here
        let check = shell.execute("true").await.map_err(|e| RemoteError::Connect {
            host: node.address.clone(),
            message: e.to_string(),
        })?;
        if !check.success() {
            return Err(RemoteError::Connect {
                host: node.address.clone(),
                message: format!("connection check exited with {}: {}", check.exit_status, check.last_line()),
            });
        }

        debug!("Opened ssh channel to {}@{}", node.login, node.address);
        Ok(Arc::new(shell))
    }
}

struct SshShell {
    host: String,
    login: String,
    key_path: PathBuf,
    connect_timeout: Duration,
}

impl SshShell {
    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(&self.key_path)
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg("-l")
            .arg(&self.login)
            .arg(&self.host)
            .arg(remote_command)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        debug!("[{}] $ {}", self.host, command);

        let output = self.command(command).output().await?;
        let exit_status = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if exit_status == SSH_CLIENT_FAILURE {
            return Err(RemoteError::Exec {
                host: self.host.clone(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(CommandOutput {
            exit_status,
            stdout,
            stderr,
        })
    }
}
