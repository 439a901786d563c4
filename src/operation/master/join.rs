// Join a node to the control plane

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::cluster::{control_plane_endpoint, ClusterConfig, Node};
use crate::command::ShellCommand;
use crate::machine::{self, Machine};
use crate::operation::{BaseOperation, Operation};
use crate::report::DeployError;

pub const MASTER_TAINT_KEY: &str = "node-role.kubernetes.io/master";
pub const MASTER_TAINT_EFFECT: &str = "NoSchedule";

pub struct JoinMasterConfig {
    pub node: Node,
    pub cert_key: String,
    pub need_untaint: bool,
    pub master_nodes: Vec<Node>,
    pub cluster: ClusterConfig,
}

/// Joins one node to the control plane with kubeadm. Before doing
/// anything destructive the operation asks the first master whether the
/// node is already a cluster member; if so the join commands are skipped
/// entirely and only `post_do` runs, so re-running a partially failed
/// deployment converges instead of re-invoking `kubeadm join`.
pub struct JoinMasterOperation {
    base: BaseOperation,
    machine: Arc<dyn Machine>,
    master: Arc<dyn Machine>,
    node_name: String,
    cert_key: String,
    need_untaint: bool,
    master_nodes: Vec<Node>,
    cluster: ClusterConfig,
}

impl JoinMasterOperation {
    pub async fn prepare(config: JoinMasterConfig) -> Result<Self, DeployError> {
        let first_master = config
            .master_nodes
            .first()
            .cloned()
            .ok_or_else(|| DeployError::Config {
                message: "join operation needs at least one existing master".to_string(),
                suggestion: None,
            })?;

        let machine = machine::connect(&config.node).await?;

        let master = match machine::connect(&first_master).await {
            Ok(m) => m,
            Err(e) => {
                machine.close();
                return Err(e);
            }
        };

        Ok(Self::with_machines(config, machine, master))
    }

    /// Assemble the operation around already-open machine handles.
    /// `prepare` is the production path; this seam keeps cluster-state
    /// access injectable.
    pub fn with_machines(
        config: JoinMasterConfig,
        machine: Arc<dyn Machine>,
        master: Arc<dyn Machine>,
    ) -> Self {
        JoinMasterOperation {
            base: BaseOperation::new(),
            machine,
            master,
            node_name: config.node.name.clone(),
            cert_key: config.cert_key,
            need_untaint: config.need_untaint,
            master_nodes: config.master_nodes,
            cluster: config.cluster,
        }
    }

    async fn run_inner(&mut self) -> Result<(String, String), DeployError> {
        let joined = already_joined(&self.node_name, self.master.as_ref()).await?;

        if joined {
            info!(node = %self.node_name, "already joined to cluster, skipping");
            self.post_do().await?;
            return Ok((String::new(), String::new()));
        }

        self.pre_do().await?;

        debug!(node = %self.node_name, "start to join master");
        let (stdout, stderr) = self.base.run_all().await?;
        debug!(node = %self.node_name, "join done");

        self.post_do().await?;

        Ok((stdout, stderr))
    }
}

#[async_trait]
impl Operation for JoinMasterOperation {
    /// Compose the kubelet-start and kubeadm-join command pair with the
    /// resolved control-plane endpoint.
    async fn pre_do(&mut self) -> Result<(), DeployError> {
        let endpoint = control_plane_endpoint(&self.cluster, &self.master_nodes)?;
        debug!(node = %self.node_name, endpoint = %endpoint, "control plane endpoint");

        self.base.add_commands([
            ShellCommand::new(self.machine.clone(), "systemctl").args(["start", "kubelet"]),
            ShellCommand::new(self.machine.clone(), "kubeadm")
                .arg("join")
                .arg(endpoint)
                .arg("--token")
                .arg(self.cluster.join_token.clone())
                .arg("--control-plane")
                .arg("--certificate-key")
                .arg(self.cert_key.clone())
                .arg("--discovery-token-unsafe-skip-ca-verification"),
        ]);

        Ok(())
    }

    /// Connections are released on every exit path.
    async fn run(&mut self) -> Result<(String, String), DeployError> {
        let result = self.run_inner().await;
        self.machine.close();
        self.master.close();
        result
    }

    async fn post_do(&mut self) -> Result<(), DeployError> {
        if !self.need_untaint {
            return Ok(());
        }

        untaint(
            &self.node_name,
            MASTER_TAINT_KEY,
            MASTER_TAINT_EFFECT,
            self.master.as_ref(),
        )
        .await
    }
}

/// Ask a master whether the node is already a cluster member.
pub async fn already_joined(node_name: &str, master: &dyn Machine) -> Result<bool, DeployError> {
    let args: Vec<String> = ["get", "nodes", "-o", "name"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let output = master.run("kubectl", &args).await?;

    if !output.success() {
        return Err(DeployError::Command {
            node: master.name().to_string(),
            command: "kubectl get nodes -o name".to_string(),
            exit_code: Some(output.exit_code),
            stderr: output.stderr,
        });
    }

    let wanted = format!("node/{}", node_name);
    Ok(output.stdout.lines().any(|line| line.trim() == wanted))
}

/// Remove a scheduling taint from the node via a master. A taint that is
/// already absent is not an error.
pub async fn untaint(
    node_name: &str,
    key: &str,
    effect: &str,
    master: &dyn Machine,
) -> Result<(), DeployError> {
    let taint = format!("{}:{}-", key, effect);
    let args: Vec<String> = vec![
        "taint".to_string(),
        "nodes".to_string(),
        node_name.to_string(),
        taint.clone(),
    ];

    let output = master.run("kubectl", &args).await?;

    if !output.success() && !output.stderr.contains("not found") {
        return Err(DeployError::Command {
            node: master.name().to_string(),
            command: format!("kubectl taint nodes {} {}", node_name, taint),
            exit_code: Some(output.exit_code),
            stderr: output.stderr,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ApiServerConnect;
    use crate::machine::fake::FakeMachine;

    fn config(need_untaint: bool) -> JoinMasterConfig {
        JoinMasterConfig {
            node: Node::new("m2").with_address("192.168.0.11"),
            cert_key: "certkey123".to_string(),
            need_untaint,
            master_nodes: vec![Node::new("m1").with_address("192.168.0.10")],
            cluster: ClusterConfig {
                name: "demo".to_string(),
                kubernetes_version: "1.16.3".to_string(),
                timezone: "UTC".to_string(),
                join_token: "9vr73a.a8uxyaju799qwdjv".to_string(),
                cert_key: String::new(),
                api_server: ApiServerConnect::FirstMasterIp,
            },
        }
    }

    #[tokio::test]
    async fn test_join_runs_kubelet_and_kubeadm() {
        let machine = Arc::new(FakeMachine::new("m2"));
        let master = Arc::new(FakeMachine::new("m1"));
        // not joined yet
        master.push_output("node/m1\n", "", 0);

        let mut op = JoinMasterOperation::with_machines(config(false), machine.clone(), master);
        op.run().await.unwrap();

        let log = machine.command_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0], "systemctl start kubelet");
        assert!(log[1].starts_with("kubeadm join 192.168.0.10:6443"));
        assert!(log[1].contains("--token 9vr73a.a8uxyaju799qwdjv"));
        assert!(log[1].contains("--certificate-key certkey123"));
        assert!(log[1].contains("--control-plane"));
    }

    #[tokio::test]
    async fn test_join_skips_when_already_joined() {
        let machine = Arc::new(FakeMachine::new("m2"));
        let master = Arc::new(FakeMachine::new("m1"));
        master.push_output("node/m1\nnode/m2\n", "", 0);

        let mut op =
            JoinMasterOperation::with_machines(config(false), machine.clone(), master.clone());
        op.run().await.unwrap();

        // no kubelet start, no kubeadm join
        assert!(machine.command_log().is_empty());
        // only the membership query hit the master
        assert_eq!(master.command_log().len(), 1);
    }

    #[tokio::test]
    async fn test_untaint_applies_exactly_once_when_already_joined() {
        let machine = Arc::new(FakeMachine::new("m2"));
        let master = Arc::new(FakeMachine::new("m1"));
        master.push_output("node/m2\n", "", 0);

        let mut op =
            JoinMasterOperation::with_machines(config(true), machine.clone(), master.clone());
        op.run().await.unwrap();

        assert!(machine.command_log().is_empty());

        let master_log = master.command_log();
        assert_eq!(master_log.len(), 2);
        assert_eq!(
            master_log[1],
            "kubectl taint nodes m2 node-role.kubernetes.io/master:NoSchedule-"
        );
    }

    #[tokio::test]
    async fn test_no_untaint_when_not_requested() {
        let machine = Arc::new(FakeMachine::new("m2"));
        let master = Arc::new(FakeMachine::new("m1"));
        master.push_output("node/m2\n", "", 0);

        let mut op =
            JoinMasterOperation::with_machines(config(false), machine.clone(), master.clone());
        op.run().await.unwrap();

        assert_eq!(master.command_log().len(), 1);
    }

    #[tokio::test]
    async fn test_join_failure_carries_stderr() {
        let machine = Arc::new(FakeMachine::new("m2"));
        let master = Arc::new(FakeMachine::new("m1"));
        master.push_output("", "", 0); // no members yet
        machine.push_output("", "", 0); // systemctl ok
        machine.push_output("", "error execution phase preflight", 1);

        let mut op =
            JoinMasterOperation::with_machines(config(false), machine.clone(), master.clone());
        let err = op.run().await.unwrap_err();

        match err {
            DeployError::Command { stderr, .. } => {
                assert!(stderr.contains("preflight"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_machines_closed_on_every_path() {
        let machine = Arc::new(FakeMachine::new("m2"));
        let master = Arc::new(FakeMachine::new("m1"));
        master.push_output("", "", 1); // membership query fails hard

        let mut op =
            JoinMasterOperation::with_machines(config(false), machine.clone(), master.clone());
        assert!(op.run().await.is_err());

        use std::sync::atomic::Ordering;
        assert_eq!(machine.close_count.load(Ordering::SeqCst), 1);
        assert_eq!(master.close_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_untaint_tolerates_absent_taint() {
        let master = FakeMachine::new("m1");
        master.push_output("", "taint \"node-role.kubernetes.io/master\" not found", 1);

        untaint("m2", MASTER_TAINT_KEY, MASTER_TAINT_EFFECT, &master)
            .await
            .unwrap();
    }
}
