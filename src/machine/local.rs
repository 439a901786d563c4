// Local command execution for localhost nodes

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandOutput, Machine};
use crate::report::DeployError;

/// Machine handle that runs commands on the orchestrator host itself.
/// Used when a node resolves to localhost, and handy in tests.
pub struct LocalMachine {
    node_name: String,
}

impl LocalMachine {
    pub fn new(node_name: impl Into<String>) -> Self {
        LocalMachine {
            node_name: node_name.into(),
        }
    }
}

#[async_trait]
impl Machine for LocalMachine {
    fn name(&self) -> &str {
        &self.node_name
    }

    async fn run(&self, executable: &str, args: &[String]) -> Result<CommandOutput, DeployError> {
        let output = Command::new(executable)
            .args(args)
            .output()
            .await
            .map_err(|e| DeployError::Command {
                node: self.node_name.clone(),
                command: executable.to_string(),
                exit_code: None,
                stderr: format!("failed to spawn: {}", e),
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn put_file(&self, content: &[u8], remote_path: &str) -> Result<(), DeployError> {
        if let Some(parent) = std::path::Path::new(remote_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeployError::FileTransfer {
                node: self.node_name.clone(),
                remote_path: remote_path.to_string(),
                message: format!("failed to create directories: {}", e),
            })?;
        }

        std::fs::write(remote_path, content).map_err(|e| DeployError::FileTransfer {
            node: self.node_name.clone(),
            remote_path: remote_path.to_string(),
            message: format!("failed to write file: {}", e),
        })
    }

    fn close(&self) {}
}
