// System preference check

use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::Node;
use crate::command::ShellCommand;
use crate::machine::{self, Machine};
use crate::operation::{upload_script, BaseOperation, Operation};
use crate::report::DeployError;

const SYS_PREF_SCRIPT: &str = "scripts/check_system_preference.sh";

/// Runs the opaque preference-validation script; the script's own exit
/// code is the verdict, there is no local post-parsing.
pub struct CheckSysPrefOperation {
    base: BaseOperation,
    machine: Arc<dyn Machine>,
}

impl CheckSysPrefOperation {
    pub async fn prepare(node: &Node) -> Result<Self, DeployError> {
        let machine = machine::connect(node).await?;

        let remote_path = match upload_script(&machine, SYS_PREF_SCRIPT).await {
            Ok(path) => path,
            Err(e) => {
                machine.close();
                return Err(e);
            }
        };

        let mut base = BaseOperation::new();
        base.add_command(ShellCommand::new(machine.clone(), "bash").arg(remote_path));

        Ok(CheckSysPrefOperation { base, machine })
    }
}

#[async_trait]
impl Operation for CheckSysPrefOperation {
    async fn run(&mut self) -> Result<(String, String), DeployError> {
        let result = self.base.run_all().await;
        self.machine.close();
        result
    }
}
