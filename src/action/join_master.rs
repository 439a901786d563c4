// Control-plane join executor

use async_trait::async_trait;
use tracing::debug;

use super::registry::type_mismatch;
use super::{ActionExecutor, ActionPayload, ActionRef};
use crate::operation::master::{JoinMasterConfig, JoinMasterOperation};
use crate::operation::Operation;
use crate::report::ReportError;

pub struct JoinMasterExecutor;

#[async_trait]
impl ActionExecutor for JoinMasterExecutor {
    async fn execute(&self, action: &ActionRef) -> Result<(), ReportError> {
        let (name, config) = {
            let action = action.lock();
            match &action.payload {
                ActionPayload::JoinMaster(payload) => (
                    action.name.clone(),
                    JoinMasterConfig {
                        node: action.node.clone(),
                        cert_key: payload.cert_key.clone(),
                        need_untaint: payload.need_untaint,
                        master_nodes: payload.master_nodes.clone(),
                        cluster: payload.cluster.clone(),
                    },
                ),
                _ => return Err(type_mismatch("join-master", &action.name)),
            }
        };

        debug!(action = %name, "start to execute join master action");

        let mut op = JoinMasterOperation::prepare(config)
            .await
            .map_err(|e| e.to_report())?;

        let (stdout, stderr) = op.run().await.map_err(|e| e.to_report())?;

        {
            let mut action = action.lock();
            if !stdout.is_empty() {
                action.log_line(stdout.trim_end());
            }
            if !stderr.is_empty() {
                action.log_line(stderr.trim_end());
            }
        }

        debug!(action = %name, "finish to execute join master action");
        Ok(())
    }
}
