// Node pre-flight check executor: concurrent fan-out over check items

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::registry::type_mismatch;
use super::{drain_reports, ActionExecutor, ActionItem, ActionPayload, ActionRef, ItemStatus};
use crate::cluster::{MachineRole, Node};
use crate::operation::check::{
    check_memory_capacity, check_port_occupied, CheckMemoryOperation, CheckPortOccupiedOperation,
    CheckSysPrefOperation,
};
use crate::operation::Operation;
use crate::report::{DeployError, ReportError};

/// 4 GiB, the least memory a node is accepted with.
pub const DEFAULT_DESIRED_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckItemKind {
    Memory,
    PortOccupied,
    SysPref,
}

impl CheckItemKind {
    fn description(&self) -> &'static str {
        match self {
            CheckItemKind::Memory => "verify memory capacity",
            CheckItemKind::PortOccupied => "verify required ports are free",
            CheckItemKind::SysPref => "verify system preferences",
        }
    }
}

impl fmt::Display for CheckItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckItemKind::Memory => "memory",
            CheckItemKind::PortOccupied => "port",
            CheckItemKind::SysPref => "sys-pref",
        };
        write!(f, "{}", s)
    }
}

const CHECK_ITEMS: [CheckItemKind; 3] = [
    CheckItemKind::Memory,
    CheckItemKind::PortOccupied,
    CheckItemKind::SysPref,
];

pub struct NodeCheckExecutor;

#[async_trait]
impl ActionExecutor for NodeCheckExecutor {
    async fn execute(&self, action: &ActionRef) -> Result<(), ReportError> {
        let (name, node, roles, desired_memory) = {
            let action = action.lock();
            match &action.payload {
                ActionPayload::NodeCheck(payload) => (
                    action.name.clone(),
                    action.node.clone(),
                    payload.roles.clone(),
                    payload.desired_memory_bytes,
                ),
                _ => return Err(type_mismatch("node-check", &action.name)),
            }
        };

        debug!(action = %name, "start to execute node check action");

        let (tx, rx) = mpsc::channel(CHECK_ITEMS.len());

        for kind in CHECK_ITEMS {
            tokio::spawn(run_check_item(
                kind,
                node.clone(),
                roles.clone(),
                desired_memory,
                tx.clone(),
            ));
        }
        drop(tx);

        let reports = drain_reports(rx, CHECK_ITEMS.len()).await;
        let complete = reports.len() == CHECK_ITEMS.len();

        let failed: Vec<String> = reports
            .iter()
            .filter(|r| r.status != ItemStatus::Done)
            .map(|r| r.name.clone())
            .collect();

        {
            let mut action = action.lock();
            for report in &reports {
                let line = match &report.err {
                    Some(err) => format!("{}: {} ({})", report.name, report.status, err),
                    None => format!("{}: {}", report.name, report.status),
                };
                action.log_line(&line);
            }
            if let ActionPayload::NodeCheck(payload) = &mut action.payload {
                payload.check_items = reports;
            }
        }

        if !complete {
            return Err(ReportError::new("check group did not finish")
                .with_detail("some check workers died without reporting"));
        }

        if !failed.is_empty() {
            return Err(
                ReportError::new(format!("{} check item(s) failed", failed.len())).with_detail(
                    format!("failed check item list: {}", failed.join(", ")),
                ),
            );
        }

        debug!(action = %name, "finish to execute node check action");
        Ok(())
    }
}

/// One worker: run a single check against the node and report on the
/// shared channel. Execution errors and unmet conditions both mark the
/// item failed, with different structured errors.
async fn run_check_item(
    kind: CheckItemKind,
    node: Node,
    roles: Vec<MachineRole>,
    desired_memory: u64,
    tx: mpsc::Sender<ActionItem>,
) {
    debug!(node = %node.name, check_item = %kind, "start to execute check item");

    let mut report = ActionItem::doing(format!("check {}", kind), kind.description());

    match execute_check_item(kind, &node, &roles, desired_memory).await {
        Ok(()) => {
            report.status = ItemStatus::Done;
            info!(node = %node.name, check_item = %kind, "check passed");
        }
        Err(err) => {
            error!(node = %node.name, check_item = %kind, error = %err, "check failed");
            report.status = ItemStatus::Failed;
            report.err = Some(err);
        }
    }

    tx.send(report).await.ok();
}

async fn execute_check_item(
    kind: CheckItemKind,
    node: &Node,
    roles: &[MachineRole],
    desired_memory: u64,
) -> Result<(), ReportError> {
    match kind {
        CheckItemKind::Memory => {
            let mut op = CheckMemoryOperation::prepare(node)
                .await
                .map_err(|e| e.to_report())?;
            let (stdout, _stderr) = op.run().await.map_err(|e| e.to_report())?;
            check_memory_capacity(stdout.trim(), desired_memory)
        }

        CheckItemKind::PortOccupied => {
            let mut op = CheckPortOccupiedOperation::prepare(node, roles)
                .await
                .map_err(|e| e.to_report())?;
            let (stdout, _stderr) = op.run().await.map_err(|e| e.to_report())?;
            check_port_occupied(&stdout)
        }

        CheckItemKind::SysPref => {
            let mut op = CheckSysPrefOperation::prepare(node)
                .await
                .map_err(|e| e.to_report())?;

            // the script's own verdict is the outcome: a non-zero exit
            // is a failed preference check, not an execution error
            match op.run().await {
                Ok(_) => Ok(()),
                Err(DeployError::Command {
                    exit_code: Some(_),
                    stderr,
                    ..
                }) => Err(ReportError::new("system preference check failed")
                    .with_detail(stderr.trim_end().to_string())
                    .with_fix("adjust the reported kernel or sysctl settings")),
                Err(other) => Err(other.to_report()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_items_cover_all_kinds() {
        assert_eq!(CHECK_ITEMS.len(), 3);
        assert_eq!(CHECK_ITEMS[0], CheckItemKind::Memory);
    }

    #[test]
    fn test_default_memory_threshold_is_4_gib() {
        assert_eq!(DEFAULT_DESIRED_MEMORY_BYTES, 4_294_967_296);
    }
}
