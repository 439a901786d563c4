// Port occupancy check

use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::{MachineRole, Node};
use crate::command::ShellCommand;
use crate::machine::{self, Machine};
use crate::operation::{upload_script, BaseOperation, Operation};
use crate::report::{DeployError, ReportError};

const PORT_OCCUPIED_SCRIPT: &str = "scripts/check_port_occupied.sh";

/// Runs the port occupancy script with the node's roles; the script
/// prints any occupied ports, comma separated. An empty stdout means
/// every required port is free.
pub struct CheckPortOccupiedOperation {
    base: BaseOperation,
    machine: Arc<dyn Machine>,
}

impl CheckPortOccupiedOperation {
    pub async fn prepare(node: &Node, roles: &[MachineRole]) -> Result<Self, DeployError> {
        let roles = join_roles(roles)?;

        let machine = machine::connect(node).await?;

        let remote_path = match upload_script(&machine, PORT_OCCUPIED_SCRIPT).await {
            Ok(path) => path,
            Err(e) => {
                machine.close();
                return Err(e);
            }
        };

        let mut base = BaseOperation::new();
        base.add_command(
            ShellCommand::new(machine.clone(), "bash")
                .arg(remote_path)
                .arg(roles),
        );

        Ok(CheckPortOccupiedOperation { base, machine })
    }
}

#[async_trait]
impl Operation for CheckPortOccupiedOperation {
    async fn run(&mut self) -> Result<(String, String), DeployError> {
        let result = self.base.run_all().await;
        self.machine.close();
        result
    }
}

/// Join role names into the comma-separated form the script expects.
/// An empty role set cannot be checked and is a configuration error.
pub fn join_roles(roles: &[MachineRole]) -> Result<String, DeployError> {
    if roles.is_empty() {
        return Err(DeployError::Config {
            message: "roles can not be empty".to_string(),
            suggestion: Some("assign at least one role to the node".to_string()),
        });
    }

    Ok(roles
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(","))
}

/// Judge the script output: a non-empty port set means the check ran
/// fine but the node is not usable as-is.
pub fn check_port_occupied(port_set: &str) -> Result<(), ReportError> {
    let port_set = port_set.trim();
    if !port_set.is_empty() {
        return Err(ReportError::new("port(s) occupied")
            .with_detail(format!("occupied port(s): {}", port_set))
            .with_fix("stop the processes listening on these ports or pick another node"));
    }

    Ok(())
}
