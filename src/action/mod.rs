// Actions: the atomic schedulable units of remote work

mod join_master;
mod node_check;
mod node_init;
mod registry;

pub use join_master::JoinMasterExecutor;
pub use node_check::{NodeCheckExecutor, DEFAULT_DESIRED_MEMORY_BYTES};
pub use node_init::{construct_init_group, NodeInitExecutor};
pub use registry::{ActionExecutor, ExecutorRegistry};

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::cluster::{ClusterConfig, MachineRole, Node, NodeSpec};
use crate::report::{DeployError, ReportError};

/// Kind of work an action performs; selects the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    NodeCheck,
    NodeInit,
    JoinMaster,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionType::NodeCheck => "node-check",
            ActionType::NodeInit => "node-init",
            ActionType::JoinMaster => "join-master",
        };
        write!(f, "{}", s)
    }
}

/// Status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Doing,
    Done,
    Failed,
}

/// Status of one check/init item inside an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Doing,
    Done,
    Failed,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Doing => "doing",
            ItemStatus::Done => "done",
            ItemStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Report for one verifiable condition or initialization step on a node.
#[derive(Debug, Clone, Serialize)]
pub struct ActionItem {
    pub name: String,
    pub description: String,
    pub status: ItemStatus,
    pub err: Option<ReportError>,
}

impl ActionItem {
    pub fn doing(name: impl Into<String>, description: impl Into<String>) -> Self {
        ActionItem {
            name: name.into(),
            description: description.into(),
            status: ItemStatus::Doing,
            err: None,
        }
    }
}

/// Per-type configuration and results of an action.
pub enum ActionPayload {
    NodeCheck(NodeCheckAction),
    NodeInit(NodeInitAction),
    JoinMaster(JoinMasterAction),
}

impl ActionPayload {
    /// Items produced by a fan-out executor; empty for single-operation
    /// actions.
    pub fn items(&self) -> &[ActionItem] {
        match self {
            ActionPayload::NodeCheck(p) => &p.check_items,
            ActionPayload::NodeInit(p) => &p.init_items,
            ActionPayload::JoinMaster(_) => &[],
        }
    }
}

/// Pre-flight checks for one node.
pub struct NodeCheckAction {
    pub roles: Vec<MachineRole>,
    pub desired_memory_bytes: u64,
    pub check_items: Vec<ActionItem>,
}

/// Initialization of one node.
pub struct NodeInitAction {
    pub roles: Vec<MachineRole>,
    pub nodes: Vec<NodeSpec>,
    pub cluster: ClusterConfig,
    pub init_items: Vec<ActionItem>,
}

/// Joining one node to the control plane.
pub struct JoinMasterAction {
    pub cert_key: String,
    pub need_untaint: bool,
    pub master_nodes: Vec<Node>,
    pub cluster: ClusterConfig,
}

/// The atomic schedulable unit: one executor bound to one target node,
/// with status, error and captured log state. Never reused.
pub struct Action {
    pub name: String,
    pub action_type: ActionType,
    pub status: ActionStatus,
    pub err: Option<ReportError>,
    pub log_file_path: String,
    pub creation_timestamp: DateTime<Utc>,
    pub node: Node,
    pub log_buffer: String,
    pub payload: ActionPayload,
}

pub type ActionRef = Arc<Mutex<Action>>;

impl Action {
    pub fn new(action_type: ActionType, node: Node, payload: ActionPayload) -> Self {
        Action {
            name: gen_action_name(action_type),
            action_type,
            status: ActionStatus::Pending,
            err: None,
            log_file_path: String::new(),
            creation_timestamp: Utc::now(),
            node,
            log_buffer: String::new(),
            payload,
        }
    }

    pub fn into_ref(self) -> ActionRef {
        Arc::new(Mutex::new(self))
    }

    /// Append one line to the captured log buffer.
    pub fn log_line(&mut self, line: &str) {
        self.log_buffer.push_str(line);
        self.log_buffer.push('\n');
    }

    /// Flush the captured log buffer to the action's log file. A missing
    /// log path means log capture was not requested for this action.
    pub fn flush_log(&self) -> Result<(), DeployError> {
        if self.log_file_path.is_empty() || self.log_buffer.is_empty() {
            return Ok(());
        }

        let path = Path::new(&self.log_file_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DeployError::Io {
                message: format!("failed to create log dir: {}", e),
                path: Some(parent.to_path_buf()),
            })?;
        }

        std::fs::write(path, self.log_buffer.as_bytes()).map_err(|e| DeployError::Io {
            message: format!("failed to write action log: {}", e),
            path: Some(path.to_path_buf()),
        })
    }
}

/// Generate a unique action name with the action type as prefix.
pub fn gen_action_name(action_type: ActionType) -> String {
    let id: u32 = rand::thread_rng().gen();
    format!("{}-{:08x}", action_type, id)
}

/// Log file path for one action on one node: `<base>/<node>-<action>.log`.
/// Any empty part yields an empty path.
pub fn gen_action_log_file_path(base_path: &str, action_name: &str, node_name: &str) -> String {
    if base_path.is_empty() || action_name.is_empty() || node_name.is_empty() {
        return String::new();
    }

    Path::new(base_path)
        .join(format!("{}-{}.log", node_name, action_name))
        .to_string_lossy()
        .to_string()
}

/// Drain a fan-out group's completion channel until one report per
/// group member arrived. Completion order is unspecified; the bound is
/// the group's cardinality, so this terminates once every worker has
/// reported. A closed channel before the count is reached means a
/// worker died without reporting; the partial list is returned and the
/// caller judges it.
pub(crate) async fn drain_reports(
    mut rx: mpsc::Receiver<ActionItem>,
    expected: usize,
) -> Vec<ActionItem> {
    let mut reports = Vec::with_capacity(expected);

    while reports.len() < expected {
        match rx.recv().await {
            Some(report) => reports.push(report),
            None => break,
        }
    }

    reports
}
