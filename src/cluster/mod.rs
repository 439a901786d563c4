// Node and cluster descriptors plus the deploy spec file

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::report::DeployError;

/// Default port the kube-apiserver listens on.
pub const DEFAULT_APISERVER_PORT: u16 = 6443;

/// A machine that takes part in the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_user() -> String {
    "root".to_string()
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Node {
            address: name.clone(),
            name,
            port: 22,
            user: "root".to_string(),
            password: None,
            private_key: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Check if this node should be driven without SSH.
    pub fn is_local(&self) -> bool {
        self.name == "localhost"
            || self.name == "127.0.0.1"
            || self.name == "::1"
            || self.address == "localhost"
            || self.address == "127.0.0.1"
            || self.address == "::1"
    }
}

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineRole {
    Etcd,
    Master,
    Worker,
    Ingress,
}

impl fmt::Display for MachineRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MachineRole::Etcd => "etcd",
            MachineRole::Master => "master",
            MachineRole::Worker => "worker",
            MachineRole::Ingress => "ingress",
        };
        write!(f, "{}", s)
    }
}

/// How nodes reach the kube-apiserver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ApiServerConnect {
    /// Talk straight to the first master's address
    FirstMasterIp,
    /// A keepalived-managed virtual IP in front of the masters
    Keepalived {
        vip: String,
        #[serde(default = "default_apiserver_port")]
        port: u16,
    },
    /// An external load balancer
    LoadBalancer {
        address: String,
        #[serde(default = "default_apiserver_port")]
        port: u16,
    },
}

fn default_apiserver_port() -> u16 {
    DEFAULT_APISERVER_PORT
}

impl ApiServerConnect {
    pub fn is_keepalived(&self) -> bool {
        matches!(self, ApiServerConnect::Keepalived { .. })
    }
}

/// Cluster-wide deployment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    pub kubernetes_version: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub join_token: String,
    #[serde(default)]
    pub cert_key: String,
    pub api_server: ApiServerConnect,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Compute the control-plane endpoint nodes join through.
pub fn control_plane_endpoint(
    cluster: &ClusterConfig,
    masters: &[Node],
) -> Result<String, DeployError> {
    match &cluster.api_server {
        ApiServerConnect::FirstMasterIp => {
            let first = masters.first().ok_or_else(|| DeployError::Config {
                message: "cluster has no master node".to_string(),
                suggestion: Some("assign the master role to at least one node".to_string()),
            })?;
            Ok(format!("{}:{}", first.address, DEFAULT_APISERVER_PORT))
        }
        ApiServerConnect::Keepalived { vip, port } => Ok(format!("{}:{}", vip, port)),
        ApiServerConnect::LoadBalancer { address, port } => Ok(format!("{}:{}", address, port)),
    }
}

/// One node entry in the deploy spec: connection details plus roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(flatten)]
    pub node: Node,
    pub roles: Vec<MachineRole>,
}

impl NodeSpec {
    pub fn has_role(&self, role: MachineRole) -> bool {
        self.roles.contains(&role)
    }
}

/// The whole deployment described in one YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySpec {
    pub cluster: ClusterConfig,
    pub nodes: Vec<NodeSpec>,
}

impl DeploySpec {
    pub fn from_file(path: &Path) -> Result<Self, DeployError> {
        let content = std::fs::read_to_string(path).map_err(|e| DeployError::Io {
            message: format!("failed to read deploy spec: {}", e),
            path: Some(path.to_path_buf()),
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, DeployError> {
        let spec: DeploySpec = serde_yaml::from_str(content).map_err(|e| DeployError::Config {
            message: format!("invalid deploy spec: {}", e),
            suggestion: Some("see demos/cluster.yaml for the expected layout".to_string()),
        })?;
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), DeployError> {
        if self.nodes.is_empty() {
            return Err(DeployError::Config {
                message: "deploy spec has no nodes".to_string(),
                suggestion: None,
            });
        }

        let mut seen: HashMap<&str, ()> = HashMap::new();
        for spec in &self.nodes {
            if spec.roles.is_empty() {
                return Err(DeployError::Config {
                    message: format!("node {} has no roles", spec.node.name),
                    suggestion: Some("every node needs at least one role".to_string()),
                });
            }
            if seen.insert(&spec.node.name, ()).is_some() {
                return Err(DeployError::Config {
                    message: format!("duplicate node name {}", spec.node.name),
                    suggestion: None,
                });
            }
        }

        if self.masters().is_empty() {
            return Err(DeployError::Config {
                message: "deploy spec has no master node".to_string(),
                suggestion: Some("assign the master role to at least one node".to_string()),
            });
        }

        Ok(())
    }

    /// Nodes carrying the master role, in spec order.
    pub fn masters(&self) -> Vec<Node> {
        self.nodes
            .iter()
            .filter(|s| s.has_role(MachineRole::Master))
            .map(|s| s.node.clone())
            .collect()
    }
}
