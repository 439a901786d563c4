// Tasks: prioritized, recursive groupings of actions

pub mod plan;
pub mod runner;

pub use plan::TaskPlanner;
pub use runner::TaskRunner;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::action::ActionRef;
use crate::report::ReportError;

/// Kind of work a task groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Deploy,
    NodeCheck,
    NodeInit,
    JoinMasters,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Deploy => "deploy",
            TaskType::NodeCheck => "node-check",
            TaskType::NodeInit => "node-init",
            TaskType::JoinMasters => "join-masters",
        };
        write!(f, "{}", s)
    }
}

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Initializing,
    Splitting,
    Doing,
    Successful,
    Failed,
}

/// A named, prioritized grouping of actions and/or nested sub-tasks.
/// Sub-tasks are tasks too; the tree is strict (the parent name is
/// informational, not a back-edge).
pub struct Task {
    pub name: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub err: Option<ReportError>,
    pub log_file_dir: String,
    pub creation_timestamp: DateTime<Utc>,
    pub actions: Vec<ActionRef>,
    pub sub_tasks: Vec<TaskRef>,
    /// Smaller value means higher priority. A task waits until all
    /// higher-priority siblings are done.
    pub priority: i32,
    /// Empty if this is not a sub-task.
    pub parent: String,
    /// If set, this task's failure does not fail its parent or block
    /// sibling scheduling.
    pub failure_can_be_ignored: bool,
}

pub type TaskRef = Arc<Mutex<Task>>;

impl Task {
    pub fn new(name: impl Into<String>, task_type: TaskType) -> Self {
        Task {
            name: name.into(),
            task_type,
            status: TaskStatus::Pending,
            err: None,
            log_file_dir: String::new(),
            creation_timestamp: Utc::now(),
            actions: Vec::new(),
            sub_tasks: Vec::new(),
            priority: 0,
            parent: String::new(),
            failure_can_be_ignored: false,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = parent.into();
        self
    }

    pub fn with_log_file_dir(mut self, dir: impl Into<String>) -> Self {
        self.log_file_dir = dir.into();
        self
    }

    pub fn with_failure_ignored(mut self, ignored: bool) -> Self {
        self.failure_can_be_ignored = ignored;
        self
    }

    pub fn add_action(&mut self, action: ActionRef) {
        self.actions.push(action);
    }

    pub fn add_sub_task(&mut self, task: Task) {
        self.sub_tasks.push(task.into_ref());
    }

    pub fn into_ref(self) -> TaskRef {
        Arc::new(Mutex::new(self))
    }
}

/// Log file directory for one task under a base path. Any empty part
/// yields an empty path.
pub fn gen_task_log_file_dir(base_path: &str, task_name: &str) -> String {
    if base_path.is_empty() || task_name.is_empty() {
        return String::new();
    }

    Path::new(base_path)
        .join(task_name)
        .to_string_lossy()
        .to_string()
}

/// All actions of a task: sub-task actions collected depth-first before
/// the task's own direct actions. Used for the flattened log/report
/// view across an arbitrarily deep tree.
pub fn all_actions(task: &TaskRef) -> Vec<ActionRef> {
    let task = task.lock();
    let mut actions = Vec::new();

    for sub_task in &task.sub_tasks {
        actions.extend(all_actions(sub_task));
    }

    actions.extend(task.actions.iter().cloned());
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionPayload, ActionType, NodeCheckAction};
    use crate::cluster::{MachineRole, Node};

    fn dummy_action(node: &str) -> ActionRef {
        Action::new(
            ActionType::NodeCheck,
            Node::new(node),
            ActionPayload::NodeCheck(NodeCheckAction {
                roles: vec![MachineRole::Worker],
                desired_memory_bytes: 1,
                check_items: Vec::new(),
            }),
        )
        .into_ref()
    }

    #[test]
    fn test_gen_task_log_file_dir() {
        assert_eq!(
            gen_task_log_file_dir("/var/log/kforge", "deploy"),
            "/var/log/kforge/deploy"
        );
        assert_eq!(gen_task_log_file_dir("", "deploy"), "");
        assert_eq!(gen_task_log_file_dir("/var/log/kforge", ""), "");
    }

    #[test]
    fn test_all_actions_collects_sub_tasks_first() {
        let mut root = Task::new("deploy", TaskType::Deploy);
        let direct = dummy_action("root-node");
        let direct_name = direct.lock().name.clone();
        root.add_action(direct);

        let mut sub = Task::new("node-check", TaskType::NodeCheck);
        let nested = dummy_action("sub-node");
        let nested_name = nested.lock().name.clone();
        sub.add_action(nested);
        root.add_sub_task(sub);

        let actions = all_actions(&root.into_ref());
        assert_eq!(actions.len(), 2);
        // depth-first: the sub-task's action comes before the direct one
        assert_eq!(actions[0].lock().name, nested_name);
        assert_eq!(actions[1].lock().name, direct_name);
    }

    #[test]
    fn test_all_actions_recurses_deeply() {
        let mut root = Task::new("deploy", TaskType::Deploy);
        let mut level1 = Task::new("level1", TaskType::NodeInit);
        let mut level2 = Task::new("level2", TaskType::NodeInit);

        level2.add_action(dummy_action("deep-node"));
        level1.add_sub_task(level2);
        root.add_sub_task(level1);

        let actions = all_actions(&root.into_ref());
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].lock().node.name, "deep-node");
    }
}
