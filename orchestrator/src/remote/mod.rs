//! Remote execution channels to load nodes and cluster hosts
//!
//! This module provides:
//! - `RemoteShell` trait for running a command on a remote host
//! - `Connector` trait for opening an authenticated channel to a host
//! - `SshConnector`, the production connector shelling out to `ssh`

mod ssh;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::load::LoadNode;

pub use ssh::SshConnector;

/// Errors raised by a remote execution channel
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Failed to connect to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("Command could not be run on {host}: {message}")]
    Exec { host: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a command that ran to completion on a remote host
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// Last non-empty line of stderr, falling back to stdout
    pub fn last_line(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .chain(self.stdout.lines().rev())
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }
}

/// An open execution channel to a single host
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Host this channel is bound to
    fn host(&self) -> &str;

    /// Run a command and wait for it to exit
    ///
    /// Dropping the returned future abandons the local side of the channel;
    /// the remote process may keep running and must be terminated separately.
    async fn execute(&self, command: &str) -> Result<CommandOutput, RemoteError>;
}

/// Opens authenticated channels to hosts
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, node: &LoadNode) -> Result<Arc<dyn RemoteShell>, RemoteError>;
}

/// Quote a value for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:,=@%+".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain_values_untouched() {
        assert_eq!(shell_quote("10.0.0.1:8080,10.0.0.2:8080"), "10.0.0.1:8080,10.0.0.2:8080");
        assert_eq!(shell_quote("/opt/k6/scenarios/grpc.js"), "/opt/k6/scenarios/grpc.js");
    }

    #[test]
    fn test_shell_quote_escapes_spaces_and_quotes() {
        assert_eq!(
            shell_quote("REP 1 IN X CBF 1 SELECT 1 FROM * AS X"),
            "'REP 1 IN X CBF 1 SELECT 1 FROM * AS X'"
        );
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_last_line_prefers_stderr() {
        let output = CommandOutput {
            exit_status: 1,
            stdout: "progress\n".to_string(),
            stderr: "warning\nfatal: no such file\n\n".to_string(),
        };
        assert_eq!(output.last_line(), "fatal: no such file");

        let output = CommandOutput {
            exit_status: 0,
            stdout: "k6 v0.45.0\n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(output.last_line(), "k6 v0.45.0");
    }
}
