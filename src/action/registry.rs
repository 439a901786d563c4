// Executor registry: maps action types to the code that realizes them

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ActionRef, ActionStatus, ActionType};
use crate::report::{DeployError, ReportError};

/// Realizes one action type as remote operations. Executors are
/// stateless; all mutable state lives on the action itself.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &ActionRef) -> Result<(), ReportError>;
}

/// Explicit registry constructed once at orchestrator start-up and
/// passed into the task runner; one registration per action type.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<ActionType, Arc<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        ExecutorRegistry::default()
    }

    /// Registry with all built-in executors.
    pub fn with_defaults() -> Self {
        let mut registry = ExecutorRegistry::new();
        // registering a fixed set of distinct types cannot collide
        let _ = registry.register(ActionType::NodeCheck, Arc::new(super::NodeCheckExecutor));
        let _ = registry.register(ActionType::NodeInit, Arc::new(super::NodeInitExecutor));
        let _ = registry.register(ActionType::JoinMaster, Arc::new(super::JoinMasterExecutor));
        registry
    }

    /// Bind an action type to an executor. Double registration is a
    /// programming error and is rejected.
    pub fn register(
        &mut self,
        action_type: ActionType,
        executor: Arc<dyn ActionExecutor>,
    ) -> Result<(), DeployError> {
        if self.executors.contains_key(&action_type) {
            return Err(DeployError::Executor {
                message: format!("executor for {} already registered", action_type),
            });
        }

        self.executors.insert(action_type, executor);
        Ok(())
    }

    /// Drive one action through its lifecycle:
    /// pending -> doing -> {done | failed}, flushing the captured log at
    /// the end. Failures are attached to the action, not returned; the
    /// caller reads the action's status.
    pub async fn execute(&self, action: &ActionRef) {
        let (action_type, name) = {
            let mut action = action.lock();
            action.status = ActionStatus::Doing;
            (action.action_type, action.name.clone())
        };

        debug!(action = %name, "start to execute action");

        let result = match self.executors.get(&action_type) {
            Some(executor) => executor.execute(action).await,
            None => Err(ReportError::new("no executor registered")
                .with_detail(format!("action type {} has no executor", action_type))),
        };

        let mut action = action.lock();
        match result {
            Ok(()) => {
                action.status = ActionStatus::Done;
            }
            Err(err) => {
                action.log_line(&format!("action failed: {}", err));
                action.status = ActionStatus::Failed;
                action.err = Some(err);
            }
        }

        if let Err(e) = action.flush_log() {
            warn!(action = %name, error = %e, "failed to flush action log");
        }

        debug!(action = %name, status = ?action.status, "finish to execute action");
    }
}

/// Error an executor raises when handed an action whose payload is not
/// the type it was registered for.
pub(crate) fn type_mismatch(expected: &str, action_name: &str) -> ReportError {
    ReportError::new("action type mismatched").with_detail(format!(
        "executor for {} received incompatible action {}",
        expected, action_name
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionPayload, NodeCheckAction};
    use crate::cluster::{MachineRole, Node};

    struct OkExecutor;

    #[async_trait]
    impl ActionExecutor for OkExecutor {
        async fn execute(&self, _action: &ActionRef) -> Result<(), ReportError> {
            Ok(())
        }
    }

    struct FailExecutor;

    #[async_trait]
    impl ActionExecutor for FailExecutor {
        async fn execute(&self, _action: &ActionRef) -> Result<(), ReportError> {
            Err(ReportError::new("boom"))
        }
    }

    fn check_action() -> ActionRef {
        Action::new(
            ActionType::NodeCheck,
            Node::new("node-1"),
            ActionPayload::NodeCheck(NodeCheckAction {
                roles: vec![MachineRole::Worker],
                desired_memory_bytes: 1,
                check_items: Vec::new(),
            }),
        )
        .into_ref()
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ExecutorRegistry::new();
        registry
            .register(ActionType::NodeCheck, Arc::new(OkExecutor))
            .unwrap();

        assert!(registry
            .register(ActionType::NodeCheck, Arc::new(OkExecutor))
            .is_err());
    }

    #[tokio::test]
    async fn test_execute_marks_done() {
        let mut registry = ExecutorRegistry::new();
        registry
            .register(ActionType::NodeCheck, Arc::new(OkExecutor))
            .unwrap();

        let action = check_action();
        registry.execute(&action).await;

        assert_eq!(action.lock().status, ActionStatus::Done);
        assert!(action.lock().err.is_none());
    }

    #[tokio::test]
    async fn test_execute_marks_failed_and_keeps_error() {
        let mut registry = ExecutorRegistry::new();
        registry
            .register(ActionType::NodeCheck, Arc::new(FailExecutor))
            .unwrap();

        let action = check_action();
        registry.execute(&action).await;

        let action = action.lock();
        assert_eq!(action.status, ActionStatus::Failed);
        assert_eq!(action.err.as_ref().unwrap().reason, "boom");
    }

    #[tokio::test]
    async fn test_missing_executor_is_a_construction_failure() {
        let registry = ExecutorRegistry::new();

        let action = check_action();
        registry.execute(&action).await;

        let action = action.lock();
        assert_eq!(action.status, ActionStatus::Failed);
        assert_eq!(action.err.as_ref().unwrap().reason, "no executor registered");
    }
}
