// Operations: idempotent sequences of remote commands with hooks

pub mod check;
pub mod init;
pub mod master;

use std::sync::Arc;

use async_trait::async_trait;

use crate::assets;
use crate::command::ShellCommand;
use crate::machine::Machine;
use crate::report::DeployError;

/// Directory on the node where scripts are staged.
pub const REMOTE_SCRIPT_DIR: &str = "/tmp";

/// Unit of retriable remote work. `run` is mandatory and returns the
/// combined stdout and stderr of the commands it executed. `pre_do`
/// composes the command list right before execution so arguments can be
/// computed at runtime; `post_do` holds side effects that must happen
/// exactly once even when `run` short-circuits on an idempotency guard.
#[async_trait]
pub trait Operation: Send {
    async fn pre_do(&mut self) -> Result<(), DeployError> {
        Ok(())
    }

    async fn run(&mut self) -> Result<(String, String), DeployError>;

    async fn post_do(&mut self) -> Result<(), DeployError> {
        Ok(())
    }
}

/// Ordered command list shared by all operations.
#[derive(Default)]
pub struct BaseOperation {
    commands: Vec<ShellCommand>,
}

impl BaseOperation {
    pub fn new() -> Self {
        BaseOperation::default()
    }

    pub fn add_command(&mut self, command: ShellCommand) {
        self.commands.push(command);
    }

    pub fn add_commands(&mut self, commands: impl IntoIterator<Item = ShellCommand>) {
        self.commands.extend(commands);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Execute the queued commands in order, concatenating their output.
    /// The first command that cannot be invoked or exits non-zero fails
    /// the whole operation with its stderr attached.
    pub async fn run_all(&mut self) -> Result<(String, String), DeployError> {
        let mut stdout = String::new();
        let mut stderr = String::new();

        for command in &self.commands {
            let output = command.execute().await?;
            stdout.push_str(&output.stdout);
            stderr.push_str(&output.stderr);

            if !output.success() {
                return Err(DeployError::Command {
                    node: command.node_name().to_string(),
                    command: command.describe(),
                    exit_code: Some(output.exit_code),
                    stderr: output.stderr,
                });
            }
        }

        Ok((stdout, stderr))
    }
}

/// Upload an embedded script to the node's staging directory and return
/// the remote path it was written to.
pub(crate) async fn upload_script(
    machine: &Arc<dyn Machine>,
    logical_path: &str,
) -> Result<String, DeployError> {
    let content = assets::open(logical_path)?;
    let remote_path = format!("{}/{}", REMOTE_SCRIPT_DIR, logical_path);
    machine.put_file(&content, &remote_path).await?;
    Ok(remote_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::fake::FakeMachine;

    #[tokio::test]
    async fn test_run_all_concatenates_output() {
        let machine = Arc::new(FakeMachine::new("node-1"));
        machine.push_output("one\n", "", 0);
        machine.push_output("two\n", "warn\n", 0);

        let mut op = BaseOperation::new();
        op.add_commands([
            ShellCommand::new(machine.clone(), "echo").arg("one"),
            ShellCommand::new(machine.clone(), "echo").arg("two"),
        ]);

        let (stdout, stderr) = op.run_all().await.unwrap();
        assert_eq!(stdout, "one\ntwo\n");
        assert_eq!(stderr, "warn\n");
    }

    #[tokio::test]
    async fn test_run_all_stops_on_first_failure() {
        let machine = Arc::new(FakeMachine::new("node-1"));
        machine.push_output("", "boom\n", 1);

        let mut op = BaseOperation::new();
        op.add_commands([
            ShellCommand::new(machine.clone(), "false"),
            ShellCommand::new(machine.clone(), "echo").arg("never"),
        ]);

        let err = op.run_all().await.unwrap_err();
        match err {
            DeployError::Command {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(1));
                assert_eq!(stderr, "boom\n");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        // the second command never ran
        assert_eq!(machine.command_log().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_script_stages_under_tmp() {
        let machine: Arc<dyn Machine> = Arc::new(FakeMachine::new("node-1"));
        let remote = upload_script(&machine, "scripts/check_port_occupied.sh")
            .await
            .unwrap();

        assert_eq!(remote, "/tmp/scripts/check_port_occupied.sh");
    }
}
