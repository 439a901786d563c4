// Memory capacity check

use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::Node;
use crate::command::ShellCommand;
use crate::machine::{self, Machine};
use crate::operation::{upload_script, BaseOperation, Operation};
use crate::report::{DeployError, ReportError};

const MEMORY_SCRIPT: &str = "scripts/check_memory_capacity.sh";

/// Runs the memory capacity script on the node; stdout is the total
/// memory in bytes.
pub struct CheckMemoryOperation {
    base: BaseOperation,
    machine: Arc<dyn Machine>,
}

impl CheckMemoryOperation {
    /// Connect to the node and stage the check script. The connection is
    /// closed on every exit path, including a failed upload.
    pub async fn prepare(node: &Node) -> Result<Self, DeployError> {
        let machine = machine::connect(node).await?;

        let remote_path = match upload_script(&machine, MEMORY_SCRIPT).await {
            Ok(path) => path,
            Err(e) => {
                machine.close();
                return Err(e);
            }
        };

        let mut base = BaseOperation::new();
        base.add_command(ShellCommand::new(machine.clone(), "bash").arg(remote_path));

        Ok(CheckMemoryOperation { base, machine })
    }
}

#[async_trait]
impl Operation for CheckMemoryOperation {
    async fn run(&mut self) -> Result<(String, String), DeployError> {
        let result = self.base.run_all().await;
        self.machine.close();
        result
    }
}

/// Compare the byte count a node reported against the desired minimum.
/// This is a numeric comparison; a reported value that does not parse is
/// itself a check failure.
pub fn check_memory_capacity(reported: &str, desired_bytes: u64) -> Result<(), ReportError> {
    let digits = regex::Regex::new(r"\d+").expect("static pattern");

    let current: u64 = digits
        .find(reported)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| {
            ReportError::new("unable to read memory capacity")
                .with_detail(format!("unexpected node output: {:?}", reported.trim()))
                .with_fix("check that /proc/meminfo is readable on the node")
        })?;

    if current < desired_bytes {
        return Err(ReportError::new("memory capacity not enough")
            .with_detail(format!(
                "current {} bytes, desired {} bytes",
                current, desired_bytes
            ))
            .with_fix(format!(
                "add memory to the node, at least {} bytes are required",
                desired_bytes
            )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOUR_GIB: u64 = 4_294_967_296;

    #[test]
    fn test_memory_above_threshold_passes() {
        assert!(check_memory_capacity("8589934592", FOUR_GIB).is_ok());
    }

    #[test]
    fn test_memory_below_threshold_fails() {
        let err = check_memory_capacity("2147483648", FOUR_GIB).unwrap_err();
        assert_eq!(err.reason, "memory capacity not enough");
        assert!(err.detail.contains("2147483648"));
        assert!(err.detail.contains("4294967296"));
    }

    #[test]
    fn test_memory_exact_threshold_passes() {
        assert!(check_memory_capacity("4294967296", FOUR_GIB).is_ok());
    }

    #[test]
    fn test_memory_tolerates_trailing_newline() {
        assert!(check_memory_capacity("8589934592\n", FOUR_GIB).is_ok());
    }

    #[test]
    fn test_memory_garbage_output_fails() {
        let err = check_memory_capacity("cat: /proc/meminfo: No such file", FOUR_GIB).unwrap_err();
        assert_eq!(err.reason, "unable to read memory capacity");
    }
}
