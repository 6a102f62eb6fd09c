//! Load sessions and load-tool command lines
//!
//! The load-generation tool is opaque: the orchestrator only builds its
//! command lines, watches the exit status and checks that the output
//! artifact was written.

use std::sync::Arc;

use crate::inventory::ProtocolFamily;
use crate::remote::{CommandOutput, RemoteError, RemoteShell, shell_quote};

use super::params::{LoadNode, LoadParameters};

/// Layout of the load tool on a load node
#[derive(Debug, Clone)]
pub struct LoadTool {
    /// Directory holding the `k6` binary and its `scenarios/` tree
    pub dir: String,
}

impl LoadTool {
    pub fn new(dir: impl Into<String>) -> Self {
        Self { dir: dir.into() }
    }

    fn binary(&self) -> String {
        format!("{}/k6", self.dir)
    }

    /// Command that succeeds only if the tool is installed and runnable
    pub fn version_command(&self) -> String {
        format!("{} version", shell_quote(&self.binary()))
    }

    /// Pre-generates containers and objects, recording them in `pregen_path`
    pub fn preset_command(&self, params: &LoadParameters, pregen_path: &str) -> String {
        let (script, containers_flag) = match params.load_type {
            ProtocolFamily::S3 => ("preset_s3.py", "--buckets"),
            ProtocolFamily::Grpc | ProtocolFamily::Http => ("preset_grpc.py", "--containers"),
        };
        format!(
            "{} --size {} {} {} --out {} --endpoint {} --preload_obj {}",
            shell_quote(&format!("{}/scenarios/preset/{}", self.dir, script)),
            params.obj_size,
            containers_flag,
            params.containers_count,
            shell_quote(pregen_path),
            shell_quote(params.endpoint()),
            params.obj_count,
        )
    }

    /// The load run itself; the summary is exported to `artifact_path`
    pub fn run_command(
        &self,
        params: &LoadParameters,
        pregen_path: &str,
        artifact_path: &str,
    ) -> String {
        let endpoints_var = format!("{}_ENDPOINTS", params.load_type.as_str().to_uppercase());
        let env = [
            ("DURATION", params.load_time.as_secs().to_string()),
            ("WRITE_OBJ_SIZE", params.obj_size.to_string()),
            ("WRITERS", params.writers.to_string()),
            ("READERS", params.readers.to_string()),
            ("DELETERS", params.deleters.to_string()),
            (endpoints_var.as_str(), params.endpoint().to_string()),
            ("PREGEN_JSON", pregen_path.to_string()),
        ];

        let mut command = format!("{} run", shell_quote(&self.binary()));
        for (key, value) in env {
            command.push_str(&format!(" -e {}={}", key, shell_quote(&value)));
        }
        command.push_str(&format!(
            " --summary-export {} {}",
            shell_quote(artifact_path),
            shell_quote(&format!("{}/scenarios/{}.js", self.dir, params.load_type)),
        ));
        command
    }

    /// Kills the run writing `artifact_path`
    pub fn terminate_command(&self, artifact_path: &str) -> String {
        format!("pkill -TERM -f {}", shell_quote(&format!("summary-export {}", artifact_path)))
    }

    /// Succeeds iff the artifact exists and is non-empty
    pub fn artifact_check_command(&self, artifact_path: &str) -> String {
        format!("test -s {}", shell_quote(artifact_path))
    }
}

/// One prepared (not yet running) instance of the load tool on one load node
pub struct LoadSession {
    node: LoadNode,
    params: Arc<LoadParameters>,
    shell: Arc<dyn RemoteShell>,
    tool: LoadTool,
    artifact_path: String,
    pregen_path: String,
}

impl LoadSession {
    pub(crate) fn new(
        node: LoadNode,
        params: Arc<LoadParameters>,
        shell: Arc<dyn RemoteShell>,
        tool: LoadTool,
        artifact_path: String,
        pregen_path: String,
    ) -> Self {
        Self {
            node,
            params,
            shell,
            tool,
            artifact_path,
            pregen_path,
        }
    }

    pub fn node(&self) -> &LoadNode {
        &self.node
    }

    pub fn parameters(&self) -> &Arc<LoadParameters> {
        &self.params
    }

    pub fn artifact_path(&self) -> &str {
        &self.artifact_path
    }

    pub fn command(&self) -> String {
        self.tool
            .run_command(&self.params, &self.pregen_path, &self.artifact_path)
    }

    /// Run the load to completion
    pub(crate) async fn execute(&self) -> Result<CommandOutput, RemoteError> {
        self.shell.execute(&self.command()).await
    }

    pub(crate) async fn terminate(&self) -> Result<(), RemoteError> {
        let output = self
            .shell
            .execute(&self.tool.terminate_command(&self.artifact_path))
            .await?;
        // pkill exits 1 when nothing matched: the run is already gone
        if output.exit_status > 1 {
            return Err(RemoteError::Exec {
                host: self.shell.host().to_string(),
                message: format!("pkill exited with {}: {}", output.exit_status, output.last_line()),
            });
        }
        Ok(())
    }

    pub(crate) async fn artifact_present(&self) -> Result<bool, RemoteError> {
        let output = self
            .shell
            .execute(&self.tool.artifact_check_command(&self.artifact_path))
            .await?;
        Ok(output.success())
    }
}

impl std::fmt::Debug for LoadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadSession")
            .field("node", &self.node.address)
            .field("artifact_path", &self.artifact_path)
            .finish()
    }
}
