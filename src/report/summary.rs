// Final deployment report: per node, per action, per item

use colored::*;
use serde::Serialize;

use super::ReportError;
use crate::action::{ActionItem, ActionStatus};
use crate::task::{all_actions, TaskRef, TaskStatus};

/// Flattened view of one action for the report sink.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    pub node: String,
    pub action: String,
    pub action_type: String,
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<ReportError>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub log_file_path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ActionItem>,
}

/// Everything the report sink needs about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub task: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<ReportError>,
    pub actions: Vec<ActionReport>,
}

/// Assemble the flattened report across the whole task tree, node
/// ordered the way `all_actions` walks it.
pub fn collect_reports(root: &TaskRef) -> RunReport {
    let actions = all_actions(root)
        .iter()
        .map(|action| {
            let action = action.lock();
            ActionReport {
                node: action.node.name.clone(),
                action: action.name.clone(),
                action_type: action.action_type.to_string(),
                status: action.status,
                err: action.err.clone(),
                log_file_path: action.log_file_path.clone(),
                items: action.payload.items().to_vec(),
            }
        })
        .collect();

    let root = root.lock();
    RunReport {
        task: root.name.clone(),
        status: root.status,
        err: root.err.clone(),
        actions,
    }
}

/// Human-readable summary on stdout. Nothing is silently dropped: even
/// ignored failures show up under their own node.
pub fn print_summary(root: &TaskRef) {
    let report = collect_reports(root);

    println!();
    println!(
        "{} {} ({} actions)",
        "DEPLOY".bold(),
        report.task.cyan(),
        report.actions.len()
    );
    println!("{}", "─".repeat(60).dimmed());

    for action in &report.actions {
        let status = status_label(action.status);
        println!(
            "{} {} {} {}",
            status,
            action.node.bold(),
            action.action_type,
            action.action.dimmed()
        );

        for item in &action.items {
            let glyph = match item.status {
                crate::action::ItemStatus::Done => "ok".green(),
                crate::action::ItemStatus::Failed => "failed".red(),
                _ => "pending".yellow(),
            };
            print!("    {:<10} {}", glyph, item.name);
            if let Some(ref err) = item.err {
                print!("  {}", err.to_string().red());
            }
            println!();
        }

        if let Some(ref err) = action.err {
            println!("    {} {}", "error:".red(), err);
        }
        if !action.log_file_path.is_empty() {
            println!("    {} {}", "log:".dimmed(), action.log_file_path);
        }
    }

    println!("{}", "─".repeat(60).dimmed());
    match report.status {
        TaskStatus::Successful => println!("{}", "deployment successful".green().bold()),
        TaskStatus::Failed => {
            print!("{}", "deployment failed".red().bold());
            if let Some(ref err) = report.err {
                print!(": {}", err);
            }
            println!();
        }
        other => println!("deployment ended in state {:?}", other),
    }
}

/// Machine-readable report on stdout.
pub fn print_json(root: &TaskRef) -> Result<(), super::DeployError> {
    let report = collect_reports(root);
    let json = serde_json::to_string_pretty(&report).map_err(|e| super::DeployError::Io {
        message: format!("failed to serialize report: {}", e),
        path: None,
    })?;
    println!("{}", json);
    Ok(())
}

fn status_label(status: ActionStatus) -> ColoredString {
    match status {
        ActionStatus::Done => "DONE  ".green().bold(),
        ActionStatus::Failed => "FAILED".red().bold(),
        ActionStatus::Doing => "DOING ".yellow(),
        ActionStatus::Pending => "PEND  ".dimmed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionPayload, ActionType, NodeCheckAction};
    use crate::cluster::{MachineRole, Node};
    use crate::task::{Task, TaskType};

    #[test]
    fn test_collect_reports_flattens_tree() {
        let mut root = Task::new("deploy", TaskType::Deploy);
        let mut sub = Task::new("node-check", TaskType::NodeCheck);

        let action = Action::new(
            ActionType::NodeCheck,
            Node::new("node-1"),
            ActionPayload::NodeCheck(NodeCheckAction {
                roles: vec![MachineRole::Worker],
                desired_memory_bytes: 1,
                check_items: Vec::new(),
            }),
        );
        sub.add_action(action.into_ref());
        root.add_sub_task(sub);

        let report = collect_reports(&root.into_ref());
        assert_eq!(report.actions.len(), 1);
        assert_eq!(report.actions[0].node, "node-1");
        assert_eq!(report.actions[0].action_type, "node-check");
    }

    #[test]
    fn test_report_serializes_to_json() {
        let root = Task::new("deploy", TaskType::Deploy).into_ref();
        let report = collect_reports(&root);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"task\":\"deploy\""));
        assert!(json.contains("\"status\":\"pending\""));
    }
}
