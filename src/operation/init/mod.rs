// Node initialization operations, one per init item

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::{
    ApiServerConnect, ClusterConfig, MachineRole, Node, NodeSpec, DEFAULT_APISERVER_PORT,
};
use crate::command::ShellCommand;
use crate::machine::{self, Machine};
use crate::operation::{upload_script, BaseOperation, Operation};
use crate::report::DeployError;

/// One initialization step applied to a node. Ordered so item groups are
/// deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InitItem {
    Hostname,
    Swap,
    Route,
    Network,
    Firewall,
    TimeZone,
    HostAlias,
    KubeTool,
    Haproxy,
    Keepalived,
}

impl InitItem {
    /// Logical path of the embedded script implementing this item.
    pub fn script(&self) -> &'static str {
        match self {
            InitItem::Hostname => "scripts/init_hostname.sh",
            InitItem::Swap => "scripts/init_swap.sh",
            InitItem::Route => "scripts/init_route.sh",
            InitItem::Network => "scripts/init_network.sh",
            InitItem::Firewall => "scripts/init_firewall.sh",
            InitItem::TimeZone => "scripts/init_timezone.sh",
            InitItem::HostAlias => "scripts/init_hostalias.sh",
            InitItem::KubeTool => "scripts/init_kubetool.sh",
            InitItem::Haproxy => "scripts/init_haproxy.sh",
            InitItem::Keepalived => "scripts/init_keepalived.sh",
        }
    }

    pub fn description(&self) -> String {
        format!("initialize {} environment", self)
    }
}

impl fmt::Display for InitItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InitItem::Hostname => "hostname",
            InitItem::Swap => "swap",
            InitItem::Route => "route",
            InitItem::Network => "network",
            InitItem::Firewall => "firewall",
            InitItem::TimeZone => "timezone",
            InitItem::HostAlias => "hostalias",
            InitItem::KubeTool => "kubetool",
            InitItem::Haproxy => "haproxy",
            InitItem::Keepalived => "keepalived",
        };
        write!(f, "{}", s)
    }
}

/// Stages and runs one init item's script against one node.
pub struct InitOperation {
    base: BaseOperation,
    machine: Arc<dyn Machine>,
}

impl InitOperation {
    /// Connect, stage the item's script and queue it with its
    /// runtime-computed arguments. The connection is closed on every
    /// exit path.
    pub async fn prepare(
        item: InitItem,
        node: &Node,
        cluster: &ClusterConfig,
        nodes: &[NodeSpec],
    ) -> Result<Self, DeployError> {
        let args = script_args(item, node, cluster, nodes)?;

        let machine = machine::connect(node).await?;

        let remote_path = match upload_script(&machine, item.script()).await {
            Ok(path) => path,
            Err(e) => {
                machine.close();
                return Err(e);
            }
        };

        let mut base = BaseOperation::new();
        base.add_command(
            ShellCommand::new(machine.clone(), "bash")
                .arg(remote_path)
                .args(args),
        );

        Ok(InitOperation { base, machine })
    }
}

#[async_trait]
impl Operation for InitOperation {
    async fn run(&mut self) -> Result<(String, String), DeployError> {
        let result = self.base.run_all().await;
        self.machine.close();
        result
    }
}

/// Arguments each item's script takes, computed from the cluster
/// context.
fn script_args(
    item: InitItem,
    node: &Node,
    cluster: &ClusterConfig,
    nodes: &[NodeSpec],
) -> Result<Vec<String>, DeployError> {
    let args = match item {
        InitItem::Hostname => vec![node.name.clone()],

        InitItem::TimeZone => vec![cluster.timezone.clone()],

        InitItem::KubeTool => vec![cluster.kubernetes_version.clone()],

        // name=address pairs for every node in the cluster
        InitItem::HostAlias => vec![nodes
            .iter()
            .map(|s| format!("{}={}", s.node.name, s.node.address))
            .collect::<Vec<_>>()
            .join(",")],

        // apiserver backends haproxy balances across
        InitItem::Haproxy => vec![nodes
            .iter()
            .filter(|s| s.has_role(MachineRole::Master))
            .map(|s| format!("{}:{}", s.node.address, DEFAULT_APISERVER_PORT))
            .collect::<Vec<_>>()
            .join(",")],

        InitItem::Keepalived => match &cluster.api_server {
            ApiServerConnect::Keepalived { vip, .. } => vec![vip.clone()],
            _ => {
                return Err(DeployError::Config {
                    message: "keepalived init item requires keepalived apiserver mode".to_string(),
                    suggestion: None,
                })
            }
        },

        InitItem::Swap | InitItem::Route | InitItem::Network | InitItem::Firewall => Vec::new(),
    };

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ApiServerConnect;

    fn sample_nodes() -> Vec<NodeSpec> {
        vec![
            NodeSpec {
                node: Node::new("m1").with_address("192.168.0.10"),
                roles: vec![MachineRole::Master, MachineRole::Etcd],
            },
            NodeSpec {
                node: Node::new("w1").with_address("192.168.0.20"),
                roles: vec![MachineRole::Worker],
            },
        ]
    }

    fn keepalived_cluster() -> ClusterConfig {
        ClusterConfig {
            name: "demo".to_string(),
            kubernetes_version: "1.16.3".to_string(),
            timezone: "UTC".to_string(),
            join_token: "abc.def".to_string(),
            cert_key: String::new(),
            api_server: ApiServerConnect::Keepalived {
                vip: "192.168.0.200".to_string(),
                port: 6443,
            },
        }
    }

    #[test]
    fn test_hostname_args() {
        let nodes = sample_nodes();
        let args = script_args(
            InitItem::Hostname,
            &nodes[0].node,
            &keepalived_cluster(),
            &nodes,
        )
        .unwrap();
        assert_eq!(args, vec!["m1"]);
    }

    #[test]
    fn test_hostalias_args_cover_all_nodes() {
        let nodes = sample_nodes();
        let args = script_args(
            InitItem::HostAlias,
            &nodes[0].node,
            &keepalived_cluster(),
            &nodes,
        )
        .unwrap();
        assert_eq!(args, vec!["m1=192.168.0.10,w1=192.168.0.20"]);
    }

    #[test]
    fn test_haproxy_args_only_masters() {
        let nodes = sample_nodes();
        let args = script_args(
            InitItem::Haproxy,
            &nodes[1].node,
            &keepalived_cluster(),
            &nodes,
        )
        .unwrap();
        assert_eq!(args, vec!["192.168.0.10:6443"]);
    }

    #[test]
    fn test_keepalived_args_require_keepalived_mode() {
        let nodes = sample_nodes();
        let mut cluster = keepalived_cluster();
        cluster.api_server = ApiServerConnect::FirstMasterIp;

        assert!(script_args(InitItem::Keepalived, &nodes[0].node, &cluster, &nodes).is_err());

        let args = script_args(
            InitItem::Keepalived,
            &nodes[0].node,
            &keepalived_cluster(),
            &nodes,
        )
        .unwrap();
        assert_eq!(args, vec!["192.168.0.200"]);
    }

    #[test]
    fn test_plain_items_take_no_args() {
        let nodes = sample_nodes();
        for item in [
            InitItem::Swap,
            InitItem::Route,
            InitItem::Network,
            InitItem::Firewall,
        ] {
            let args =
                script_args(item, &nodes[0].node, &keepalived_cluster(), &nodes).unwrap();
            assert!(args.is_empty());
        }
    }
}
