// Task runner: walks a task tree, respecting priority tiers

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{debug, info};

use super::{TaskRef, TaskStatus};
use crate::action::{gen_action_log_file_path, ActionStatus, ExecutorRegistry};
use crate::report::ReportError;

/// Drives a task tree to a terminal state. Within one task its direct
/// actions and its sub-tasks run concurrently; sibling sub-tasks are
/// bucketed by priority, and no task of a lower-priority tier starts
/// before every task of the higher tiers is terminal.
pub struct TaskRunner {
    registry: Arc<ExecutorRegistry>,
}

impl TaskRunner {
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        TaskRunner { registry }
    }

    pub async fn run(&self, task: &TaskRef) {
        self.run_task(task.clone()).await;
    }

    fn run_task(&self, task: TaskRef) -> BoxFuture<'_, ()> {
        async move {
            let name = {
                let task = task.lock();
                task.name.clone()
            };
            debug!(task = %name, "start to execute task");

            // initializing: resolve the action set's log capture paths
            {
                let mut task = task.lock();
                task.status = TaskStatus::Initializing;

                let log_dir = task.log_file_dir.clone();
                for action in &task.actions {
                    let mut action = action.lock();
                    if action.log_file_path.is_empty() {
                        action.log_file_path =
                            gen_action_log_file_path(&log_dir, &action.name, &action.node.name);
                    }
                }
            }

            // splitting: bucket sub-tasks into priority tiers
            let (actions, tiers) = {
                let mut task = task.lock();
                task.status = TaskStatus::Splitting;

                let actions = task.actions.clone();
                let mut tiers: BTreeMap<i32, Vec<TaskRef>> = BTreeMap::new();
                for sub_task in &task.sub_tasks {
                    let priority = sub_task.lock().priority;
                    tiers.entry(priority).or_default().push(sub_task.clone());
                }

                task.status = TaskStatus::Doing;
                (actions, tiers)
            };

            // doing: direct actions fan out alongside the tier chain
            let actions_done = async {
                join_all(actions.iter().map(|action| self.registry.execute(action))).await;
            };

            let sub_tasks_done = async {
                for (_priority, tier) in tiers {
                    join_all(tier.into_iter().map(|sub_task| self.run_task(sub_task))).await;
                }
            };

            tokio::join!(actions_done, sub_tasks_done);

            self.judge(&task);

            let task = task.lock();
            info!(task = %name, status = ?task.status, "finish to execute task");
        }
        .boxed()
    }

    /// Terminal status: failed iff a direct action failed or a sub-task
    /// failed whose failure cannot be ignored. Ignored failures stay
    /// visible on the child itself.
    fn judge(&self, task: &TaskRef) {
        let mut failed_children: Vec<String> = Vec::new();

        {
            let task = task.lock();

            for action in &task.actions {
                let action = action.lock();
                if action.status == ActionStatus::Failed {
                    failed_children.push(action.name.clone());
                }
            }

            for sub_task in &task.sub_tasks {
                let sub_task = sub_task.lock();
                if sub_task.status == TaskStatus::Failed && !sub_task.failure_can_be_ignored {
                    failed_children.push(sub_task.name.clone());
                }
            }
        }

        let mut task = task.lock();
        if failed_children.is_empty() {
            task.status = TaskStatus::Successful;
        } else {
            task.status = TaskStatus::Failed;
            task.err = Some(
                ReportError::new(format!("{} child(ren) failed", failed_children.len()))
                    .with_detail(format!("failed: {}", failed_children.join(", "))),
            );
        }
    }
}
