//! Protocol client bootstrap
//!
//! Some load types need a credential before any session can run. For the S3
//! gateway that is an access key pair issued by the authmate tool, bound to a
//! container with the configured placement policy. The key pair is issued
//! once per suite and pushed to every load node that has not received it yet.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use super::params::LoadNode;
use crate::inventory::ProtocolFamily;
use crate::remote::{Connector, RemoteError, RemoteShell, shell_quote};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("No load nodes to bootstrap")]
    NoLoadNodes,

    #[error("Remote error on {node}: {source}")]
    Remote {
        node: String,
        #[source]
        source: RemoteError,
    },

    #[error("Credential issue failed (exit {exit_status}): {detail}")]
    IssueFailed { exit_status: i32, detail: String },

    #[error("Unparseable credential issue output: {0}")]
    InvalidIssueOutput(String),

    #[error("Failed to configure credentials on {node}: {detail}")]
    DistributionFailed { node: String, detail: String },
}

/// S3 access key pair
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Inputs for issuing a credential
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    /// Authmate executable on the load nodes
    pub authmate_path: String,
    /// Wallet used to sign the issue request
    pub wallet_path: String,
    /// Public key of the S3 gateway the credential is issued for
    pub gate_public_key: String,
    /// Storage node RPC endpoint the request is sent to
    pub peer: String,
}

pub struct ProtocolBootstrapper {
    connector: Arc<dyn Connector>,
    tool_dir: String,
    credentials: OnceCell<S3Credentials>,
    configured: Mutex<HashSet<String>>,
}

impl ProtocolBootstrapper {
    pub fn new(connector: Arc<dyn Connector>, tool_dir: impl Into<String>) -> Self {
        Self {
            connector,
            tool_dir: tool_dir.into(),
            credentials: OnceCell::new(),
            configured: Mutex::new(HashSet::new()),
        }
    }

    /// Make sure every node in `load_nodes` can run `protocol` sessions
    ///
    /// Returns the credential in use, or `None` for protocols that need no
    /// bootstrap step.
    pub async fn ensure_client(
        &self,
        protocol: ProtocolFamily,
        load_nodes: &[LoadNode],
        issuer: &IssuerSettings,
        placement_policy: &str,
    ) -> Result<Option<S3Credentials>, BootstrapError> {
        if !protocol.requires_bootstrap() {
            return Ok(None);
        }
        let first = load_nodes.first().ok_or(BootstrapError::NoLoadNodes)?;

        let credentials = self
            .credentials
            .get_or_try_init(|| self.issue(first, issuer, placement_policy))
            .await?
            .clone();

        let mut configured = self.configured.lock().await;
        for node in load_nodes {
            if configured.contains(&node.address) {
                continue;
            }
            let shell = self.open(node).await?;
            configure_aws(shell.as_ref(), &credentials).await?;
            configured.insert(node.address.clone());
            debug!("S3 credentials configured on {}", node.address);
        }

        Ok(Some(credentials))
    }

    async fn open(&self, node: &LoadNode) -> Result<Arc<dyn RemoteShell>, BootstrapError> {
        self.connector
            .connect(node)
            .await
            .map_err(|source| BootstrapError::Remote {
                node: node.address.clone(),
                source,
            })
    }

    async fn issue(
        &self,
        node: &LoadNode,
        issuer: &IssuerSettings,
        placement_policy: &str,
    ) -> Result<S3Credentials, BootstrapError> {
        let shell = self.open(node).await?;
        let files = format!("{}/scenarios/files", self.tool_dir);
        let command = format!(
            "{} secret issue --wallet {} --peer {} --bearer-rules {} --gate-public-key {} \
             --container-placement-policy {} --container-policy {}",
            shell_quote(&issuer.authmate_path),
            shell_quote(&issuer.wallet_path),
            shell_quote(&issuer.peer),
            shell_quote(&format!("{}/rules.json", files)),
            shell_quote(&issuer.gate_public_key),
            shell_quote(placement_policy),
            shell_quote(&format!("{}/policy.json", files)),
        );

        let output = shell
            .execute(&command)
            .await
            .map_err(|source| BootstrapError::Remote {
                node: node.address.clone(),
                source,
            })?;
        if !output.success() {
            return Err(BootstrapError::IssueFailed {
                exit_status: output.exit_status,
                detail: output.last_line().to_string(),
            });
        }

        let credentials = parse_issue_output(&output.stdout)?;
        info!(
            "Issued S3 credentials {} via {}",
            credentials.access_key_id, node.address
        );
        Ok(credentials)
    }
}

async fn configure_aws(shell: &dyn RemoteShell, credentials: &S3Credentials) -> Result<(), BootstrapError> {
    let command = format!(
        "aws configure set aws_access_key_id {} && aws configure set aws_secret_access_key {}",
        shell_quote(&credentials.access_key_id),
        shell_quote(&credentials.secret_access_key),
    );
    let output = shell
        .execute(&command)
        .await
        .map_err(|source| BootstrapError::Remote {
            node: shell.host().to_string(),
            source,
        })?;
    if !output.success() {
        return Err(BootstrapError::DistributionFailed {
            node: shell.host().to_string(),
            detail: output.last_line().to_string(),
        });
    }
    Ok(())
}

/// Extract the key pair from the JSON object authmate prints
fn parse_issue_output(stdout: &str) -> Result<S3Credentials, BootstrapError> {
    let start = stdout.find('{');
    let end = stdout.rfind('}');
    let (Some(start), Some(end)) = (start, end) else {
        return Err(BootstrapError::InvalidIssueOutput(
            "no JSON object in output".to_string(),
        ));
    };
    if end < start {
        return Err(BootstrapError::InvalidIssueOutput(
            "malformed JSON object".to_string(),
        ));
    }

    serde_json::from_str(&stdout[start..=end])
        .map_err(|e| BootstrapError::InvalidIssueOutput(e.to_string()))
}
