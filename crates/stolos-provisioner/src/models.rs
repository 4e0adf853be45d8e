// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Domain types shared by the store, the workflows and the jobs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Architecture recorded before a node has been inspected.
pub const UNKNOWN_ARCH: &str = "Unknown";

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $name {
            /// Database and wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(Error::InvalidRequest(format!(
                        "invalid {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

/// Node lifecycle. Flows forward only: pending → provisioning → active,
/// with failed reachable from provisioning and active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Discovered, waiting for an operator to assign a role
    Pending,
    /// Configuration applied, not yet reporting ready
    Provisioning,
    /// Running and ready
    Active,
    /// Unreachable or not ready
    Failed,
}

string_enum!(NodeStatus {
    Pending => "pending",
    Provisioning => "provisioning",
    Active => "active",
    Failed => "failed",
});

/// Kubernetes role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Runs workloads
    #[serde(rename = "worker")]
    Worker,
    /// Runs the control plane
    #[serde(rename = "control-plane")]
    ControlPlane,
}

string_enum!(NodeRole {
    Worker => "worker",
    ControlPlane => "control-plane",
});

/// Where a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Bare metal or private virtualisation
    Onprem,
    /// Google Cloud
    Gcp,
}

string_enum!(ProviderKind {
    Onprem => "onprem",
    Gcp => "gcp",
});

/// Provision request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStatus {
    /// Rendering and planning
    Planning,
    /// Plan shown, waiting for a decision
    AwaitingApproval,
    /// Approved, engine applying
    Applying,
    /// Nodes recorded
    Completed,
    /// Aborted; see the error
    Failed,
}

string_enum!(ProvisionStatus {
    Planning => "planning",
    AwaitingApproval => "awaiting_approval",
    Applying => "applying",
    Completed => "completed",
    Failed => "failed",
});

impl ProvisionStatus {
    /// Whether the request can still change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A physical or virtual machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier
    pub id: Uuid,
    /// Display name, unique across nodes
    pub name: String,
    /// Lifecycle status
    pub status: NodeStatus,
    /// Assigned role, if any
    pub role: Option<NodeRole>,
    /// `key=value` labels
    pub labels: Vec<String>,
    /// CPU architecture (`amd64`, `arm64`, ... or `Unknown`)
    pub architecture: String,
    /// Where the node runs
    pub provider: ProviderKind,
    /// Routable address
    pub ip_address: Option<String>,
    /// Hardware address of the external interface
    pub mac_address: Option<String>,
    /// Cloud instance id
    pub instance_id: Option<String>,
    /// Owning cluster
    pub cluster_id: Option<Uuid>,
    /// When the node was recorded
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

/// Fields for a node that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    /// Display name
    pub name: String,
    /// Initial status
    pub status: NodeStatus,
    /// Assigned role
    pub role: Option<NodeRole>,
    /// `key=value` labels
    pub labels: Vec<String>,
    /// CPU architecture
    pub architecture: String,
    /// Where the node runs
    pub provider: ProviderKind,
    /// Routable address
    pub ip_address: Option<String>,
    /// Hardware address
    pub mac_address: Option<String>,
    /// Cloud instance id
    pub instance_id: Option<String>,
    /// Owning cluster
    pub cluster_id: Option<Uuid>,
}

/// Observed facts about a cluster member, merged into its row by name.
///
/// `None` keeps whatever is stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInfoUpdate {
    /// Hostname the member reports
    pub name: String,
    /// Routable address
    pub ip_address: Option<String>,
    /// Hardware address
    pub mac_address: Option<String>,
    /// CPU architecture
    pub architecture: Option<String>,
}

/// Grouping of nodes; one per deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Unique identifier
    pub id: Uuid,
    /// Cluster name
    pub name: String,
    /// Base machine configuration for control-plane nodes
    pub controlplane_config: Option<String>,
    /// Base machine configuration for worker nodes
    pub worker_config: Option<String>,
    /// When the cluster was recorded
    pub created_at: DateTime<Utc>,
}

impl Cluster {
    /// Base machine configuration for `role`.
    pub fn machine_config(&self, role: NodeRole) -> Option<&str> {
        match role {
            NodeRole::Worker => self.worker_config.as_deref(),
            NodeRole::ControlPlane => self.controlplane_config.as_deref(),
        }
    }
}

/// One invocation of the provisioning workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Unique identifier
    pub id: Uuid,
    /// Lifecycle status
    pub status: ProvisionStatus,
    /// Target provider
    pub provider: ProviderKind,
    /// Submitted parameters
    pub request: serde_json::Value,
    /// Human-readable plan
    pub plan_output: Option<String>,
    /// Nodes recorded on completion
    pub node_ids: Vec<Uuid>,
    /// Failure reason
    pub error: Option<String>,
    /// When the request was created
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

/// Persisted repository coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct GitOpsSettings {
    /// Repository owner
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Target branch
    pub branch: String,
    /// Directory for infrastructure files
    pub working_dir: String,
    /// Commit author name
    pub username: String,
    /// Commit author email
    pub email: String,
    /// Whether the row is complete
    pub is_configured: bool,
}

impl From<GitOpsSettings> for stolos_gitops::GitOpsConfig {
    fn from(s: GitOpsSettings) -> Self {
        Self {
            owner: s.owner,
            repo: s.repo,
            branch: s.branch,
            working_dir: s.working_dir,
            username: s.username,
            email: s.email,
        }
    }
}

fn default_disk_size_gb() -> u32 {
    50
}

fn default_disk_type() -> String {
    "pd-standard".to_string()
}

/// Parameters for creating cloud nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcpNodeProvisionRequest {
    /// Name prefix; nodes are named `{prefix}-{n}`
    pub name_prefix: String,
    /// How many nodes to create
    pub number: u32,
    /// Compute zone
    pub zone: String,
    /// Machine type
    pub machine_type: String,
    /// `worker` or `control-plane`
    pub role: String,
    /// Extra `key=value` labels
    #[serde(default)]
    pub labels: Vec<String>,
    /// Boot disk size
    #[serde(default = "default_disk_size_gb")]
    pub disk_size_gb: u32,
    /// Boot disk type
    #[serde(default = "default_disk_type")]
    pub disk_type: String,
}

/// Most nodes one request may create.
pub const MAX_NODES_PER_REQUEST: u32 = 20;

impl GcpNodeProvisionRequest {
    /// Check required fields and bounds; returns the parsed role.
    pub fn validate(&self) -> Result<NodeRole> {
        if self.name_prefix.trim().is_empty() {
            return Err(Error::InvalidRequest("name prefix is required".to_string()));
        }
        if self.zone.trim().is_empty() {
            return Err(Error::InvalidRequest("zone is required".to_string()));
        }
        if self.machine_type.trim().is_empty() {
            return Err(Error::InvalidRequest("machine type is required".to_string()));
        }
        if self.number == 0 || self.number > MAX_NODES_PER_REQUEST {
            return Err(Error::InvalidRequest(format!(
                "number of nodes must be between 1 and {}",
                MAX_NODES_PER_REQUEST
            )));
        }
        parse_role(&self.role)
    }
}

/// Parse a role, rejecting anything but `worker` and `control-plane`.
pub fn parse_role(role: &str) -> Result<NodeRole> {
    role.parse().map_err(|_| {
        Error::InvalidRequest(format!(
            "invalid role '{}': must be 'worker' or 'control-plane'",
            role
        ))
    })
}

/// Operator input for provisioning one discovered on-prem node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnPremNodeProvisionConfig {
    /// Pending node to provision
    pub node_id: Uuid,
    /// `worker` or `control-plane`
    pub role: String,
    /// Extra `key=value` labels
    #[serde(default)]
    pub labels: Vec<String>,
    /// Install target, e.g. `/dev/sda`; empty means the default disk
    #[serde(default)]
    pub install_disk: String,
}

/// Per-node outcome of a provisioning batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeProvisionResult {
    /// Node the result is for
    pub node_id: Uuid,
    /// Name assigned, if provisioning got that far
    pub name: Option<String>,
    /// Role requested
    pub role: String,
    /// Labels applied
    pub labels: Vec<String>,
    /// Whether the configuration was applied
    pub succeeded: bool,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Turn `key=value` labels into a map. Entries without `=` get an empty value.
pub fn labels_to_map(labels: &[String]) -> BTreeMap<String, String> {
    labels
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| match l.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (l.trim().to_string(), String::new()),
        })
        .collect()
}

/// Labels every provisioned node carries, followed by the user's.
pub fn node_labels(provider: ProviderKind, role: NodeRole, extra: &[String]) -> Vec<String> {
    let mut labels = vec![format!("provider={}", provider), format!("role={}", role)];
    labels.extend(extra.iter().filter(|l| !l.trim().is_empty()).cloned());
    labels
}
