// A single remote shell invocation bound to one machine

use std::sync::Arc;

use crate::machine::{CommandOutput, Machine};
use crate::report::DeployError;

/// One executable with its arguments, targeting one machine. Immutable
/// once constructed; execution is delegated to the machine.
pub struct ShellCommand {
    machine: Arc<dyn Machine>,
    executable: String,
    args: Vec<String>,
}

impl ShellCommand {
    pub fn new(machine: Arc<dyn Machine>, executable: impl Into<String>) -> Self {
        ShellCommand {
            machine,
            executable: executable.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Name of the node this command targets.
    pub fn node_name(&self) -> &str {
        self.machine.name()
    }

    /// The command line as it will appear in logs and errors.
    pub fn describe(&self) -> String {
        let mut rendered = self.executable.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(arg);
        }
        rendered
    }

    /// Run the command, returning the raw output. Exit-code policy is
    /// the caller's concern.
    pub async fn execute(&self) -> Result<CommandOutput, DeployError> {
        self.machine.run(&self.executable, &self.args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::fake::FakeMachine;

    #[tokio::test]
    async fn test_execute_delegates_to_machine() {
        let machine = Arc::new(FakeMachine::new("node-1"));
        machine.push_output("ok", "", 0);

        let cmd = ShellCommand::new(machine.clone(), "systemctl")
            .arg("start")
            .arg("kubelet");

        let out = cmd.execute().await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "ok");
        assert_eq!(machine.command_log(), vec!["systemctl start kubelet"]);
    }

    #[test]
    fn test_describe_renders_full_line() {
        let machine = Arc::new(FakeMachine::new("node-1"));
        let cmd = ShellCommand::new(machine, "kubeadm")
            .args(["join", "192.168.0.200:6443"]);

        assert_eq!(cmd.describe(), "kubeadm join 192.168.0.200:6443");
    }
}
