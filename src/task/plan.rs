// Builds the deploy task tree from a deploy spec

use super::{gen_task_log_file_dir, Task, TaskRef, TaskType};
use crate::action::{
    Action, ActionPayload, ActionType, JoinMasterAction, NodeCheckAction, NodeInitAction,
    DEFAULT_DESIRED_MEMORY_BYTES,
};
use crate::cluster::{DeploySpec, MachineRole};

/// Pre-flight checks run first, then node initialization, then
/// control-plane joins.
pub const PRIORITY_NODE_CHECK: i32 = 10;
pub const PRIORITY_NODE_INIT: i32 = 20;
pub const PRIORITY_JOIN_MASTERS: i32 = 30;

const ROOT_TASK_NAME: &str = "deploy";

/// Expands a deploy spec into the task tree the runner executes.
pub struct TaskPlanner {
    log_base_dir: String,
}

impl TaskPlanner {
    pub fn new(log_base_dir: impl Into<String>) -> Self {
        TaskPlanner {
            log_base_dir: log_base_dir.into(),
        }
    }

    /// Full bring-up: check, init, join.
    pub fn plan_deploy(&self, spec: &DeploySpec) -> TaskRef {
        let mut root = self.root_task();
        root.add_sub_task(self.node_check_task(spec));
        root.add_sub_task(self.node_init_task(spec));
        root.add_sub_task(self.join_masters_task(spec));
        root.into_ref()
    }

    /// Pre-flight only.
    pub fn plan_check(&self, spec: &DeploySpec) -> TaskRef {
        let mut root = self.root_task();
        root.add_sub_task(self.node_check_task(spec));
        root.into_ref()
    }

    fn root_task(&self) -> Task {
        Task::new(ROOT_TASK_NAME, TaskType::Deploy)
            .with_log_file_dir(gen_task_log_file_dir(&self.log_base_dir, ROOT_TASK_NAME))
    }

    fn sub_task(&self, name: &str, task_type: TaskType, priority: i32) -> Task {
        Task::new(name, task_type)
            .with_priority(priority)
            .with_parent(ROOT_TASK_NAME)
            .with_log_file_dir(gen_task_log_file_dir(&self.log_base_dir, name))
    }

    fn node_check_task(&self, spec: &DeploySpec) -> Task {
        let mut task = self.sub_task("node-check", TaskType::NodeCheck, PRIORITY_NODE_CHECK);

        for node_spec in &spec.nodes {
            task.add_action(
                Action::new(
                    ActionType::NodeCheck,
                    node_spec.node.clone(),
                    ActionPayload::NodeCheck(NodeCheckAction {
                        roles: node_spec.roles.clone(),
                        desired_memory_bytes: DEFAULT_DESIRED_MEMORY_BYTES,
                        check_items: Vec::new(),
                    }),
                )
                .into_ref(),
            );
        }

        task
    }

    fn node_init_task(&self, spec: &DeploySpec) -> Task {
        let mut task = self.sub_task("node-init", TaskType::NodeInit, PRIORITY_NODE_INIT);

        for node_spec in &spec.nodes {
            task.add_action(
                Action::new(
                    ActionType::NodeInit,
                    node_spec.node.clone(),
                    ActionPayload::NodeInit(NodeInitAction {
                        roles: node_spec.roles.clone(),
                        nodes: spec.nodes.clone(),
                        cluster: spec.cluster.clone(),
                        init_items: Vec::new(),
                    }),
                )
                .into_ref(),
            );
        }

        task
    }

    /// One join action per additional master; the first master is the
    /// one the cluster was bootstrapped on. Masters that also carry the
    /// worker role get untainted so they accept regular workloads.
    fn join_masters_task(&self, spec: &DeploySpec) -> Task {
        let mut task = self.sub_task("join-masters", TaskType::JoinMasters, PRIORITY_JOIN_MASTERS);

        let masters = spec.masters();

        for node_spec in spec
            .nodes
            .iter()
            .filter(|s| s.has_role(MachineRole::Master))
            .skip(1)
        {
            task.add_action(
                Action::new(
                    ActionType::JoinMaster,
                    node_spec.node.clone(),
                    ActionPayload::JoinMaster(JoinMasterAction {
                        cert_key: spec.cluster.cert_key.clone(),
                        need_untaint: node_spec.has_role(MachineRole::Worker),
                        master_nodes: masters.clone(),
                        cluster: spec.cluster.clone(),
                    }),
                )
                .into_ref(),
            );
        }

        task
    }
}
