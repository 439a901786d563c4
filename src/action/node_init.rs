// Node initialization executor: concurrent fan-out over init items

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::registry::type_mismatch;
use super::{drain_reports, ActionExecutor, ActionItem, ActionPayload, ActionRef, ItemStatus};
use crate::cluster::{ClusterConfig, MachineRole, Node, NodeSpec};
use crate::operation::init::{InitItem, InitOperation};
use crate::operation::Operation;
use crate::report::{DeployError, ReportError};

pub struct NodeInitExecutor;

#[async_trait]
impl ActionExecutor for NodeInitExecutor {
    async fn execute(&self, action: &ActionRef) -> Result<(), ReportError> {
        // snapshot the config so no lock is held across remote work
        let (name, node, roles, nodes, cluster) = {
            let action = action.lock();
            match &action.payload {
                ActionPayload::NodeInit(payload) => (
                    action.name.clone(),
                    action.node.clone(),
                    payload.roles.clone(),
                    payload.nodes.clone(),
                    payload.cluster.clone(),
                ),
                _ => return Err(type_mismatch("node-init", &action.name)),
            }
        };

        debug!(action = %name, "start to execute node init action");

        let group = construct_init_group(&roles, &cluster);
        if group.is_empty() {
            warn!(action = %name, "initialization item group is empty");
            return Ok(());
        }

        // completion channel sized to the group so no worker blocks
        let (tx, rx) = mpsc::channel(group.len());

        for item in &group {
            tokio::spawn(run_init_item(
                *item,
                node.clone(),
                cluster.clone(),
                nodes.clone(),
                tx.clone(),
            ));
        }
        drop(tx);

        let reports = drain_reports(rx, group.len()).await;
        let complete = reports.len() == group.len();

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
            if let ActionPayload::NodeInit(payload) = &mut action.payload {
                payload.init_items = reports;
            }
        }

        if !complete {
            return Err(ReportError::new("init group did not finish")
                .with_detail("some init workers died without reporting")
                .with_fix("re-run the deployment; init items are idempotent"));
        }

        if !failed.is_empty() {
            return Err(
                ReportError::new(format!("{} init item(s) failed", failed.len())).with_detail(
                    format!("failed init item list: {}", failed.join(", ")),
                ),
            );
        }

        debug!(action = %name, "finish to execute node init action");
        Ok(())
    }
}

/// Compute the set of init items a node needs: the fixed base group
/// united with role-conditional extras. Set semantics collapse items
/// requested by several roles into one scheduled item.
pub fn construct_init_group(roles: &[MachineRole], cluster: &ClusterConfig) -> BTreeSet<InitItem> {
    let mut group: BTreeSet<InitItem> = [
        InitItem::Hostname,
        InitItem::Swap,
        InitItem::Route,
        InitItem::Network,
        InitItem::Firewall,
        InitItem::TimeZone,
        InitItem::HostAlias,
        InitItem::KubeTool,
    ]
    .into_iter()
    .collect();

    // role-gated extension sets
    let etcd_items: &[InitItem] = &[];
    let worker_items: &[InitItem] = &[];
    let ingress_items: &[InitItem] = &[];
    let master_items: &[InitItem] = if cluster.api_server.is_keepalived() {
        &[InitItem::Haproxy, InitItem::Keepalived]
    } else {
        &[]
    };

    if roles.contains(&MachineRole::Etcd) {
        group.extend(etcd_items);
    }
    if roles.contains(&MachineRole::Master) {
        group.extend(master_items);
    }
    if roles.contains(&MachineRole::Worker) {
        group.extend(worker_items);
    }
    if roles.contains(&MachineRole::Ingress) {
        group.extend(ingress_items);
    }

    group
}

/// One worker: build and run a single init item against the node, then
/// report on the shared channel. A failure here never stops sibling
/// items.
async fn run_init_item(
    item: InitItem,
    node: Node,
    cluster: ClusterConfig,
    nodes: Vec<NodeSpec>,
    tx: mpsc::Sender<ActionItem>,
) {
    debug!(node = %node.name, init_item = %item, "start to execute init item");

    let mut report = ActionItem::doing(format!("init {}", item), item.description());

    match execute_init_item(item, &node, &cluster, &nodes).await {
        Ok(_stdout) => {
            report.status = ItemStatus::Done;
            info!(node = %node.name, init_item = %item, "init passed");
        }
        Err(e) => {
            error!(node = %node.name, init_item = %item, error = %e, "init failed");
            report.status = ItemStatus::Failed;
            report.err = Some(classify_init_error(item, e));
        }
    }

    // capacity equals group size, the send cannot block
    tx.send(report).await.ok();
}

async fn execute_init_item(
    item: InitItem,
    node: &Node,
    cluster: &ClusterConfig,
    nodes: &[NodeSpec],
) -> Result<String, DeployError> {
    let mut op = InitOperation::prepare(item, node, cluster, nodes).await?;
    let (stdout, _stderr) = op.run().await?;
    Ok(stdout.trim_end_matches('\n').to_string())
}

fn classify_init_error(item: InitItem, err: DeployError) -> ReportError {
    match err {
        DeployError::Config { .. } | DeployError::Asset { .. } => {
            ReportError::new("can not construct init operation")
                .with_detail(format!("init {}: {}", item, err))
                .with_fix("check the deploy spec and the kforge build")
        }
        other => other.to_report(),
    }
}
