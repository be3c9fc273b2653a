//! Managed Kubernetes cluster and node-group records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Status of a managed cluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum K8sClusterStatus {
    Creating,
    Active,
    Inactive,
    Updating,
    Deleting,
    #[default]
    Undefined,
}

serde_plain::derive_display_from_serialize!(K8sClusterStatus);
serde_plain::derive_fromstr_from_deserialize!(K8sClusterStatus);

/// Status of a node group within a cluster.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum K8sNodeGroupStatus {
    Creating,
    Active,
    Inactive,
    Updating,
    Deleting,
    #[default]
    Undefined,
}

serde_plain::derive_display_from_serialize!(K8sNodeGroupStatus);
serde_plain::derive_fromstr_from_deserialize!(K8sNodeGroupStatus);

/// Autoscaling shape of a node group.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct K8sAutoscaling {
    pub on_auto: bool,
    pub desired: u32,
    pub min: u32,
    pub max: u32,
}

/// A managed Kubernetes cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sClusterInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    pub name: String,
    pub ns: String,
    pub connection_name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub v_net_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnet_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_group_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_key_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_groups: Vec<K8sNodeGroupInfo>,
    #[serde(default)]
    pub status: K8sClusterStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub csp_resource_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub csp_resource_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_message: String,
    #[serde(default)]
    pub created_time: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A homogeneous group of worker nodes.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sNodeGroupInfo {
    pub name: String,
    pub spec_id: String,
    /// Set only for providers that allow designating a node image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csp_image_name: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_key_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk_size: Option<String>,
    #[serde(default)]
    pub scaling: K8sAutoscaling,
    #[serde(default)]
    pub status: K8sNodeGroupStatus,
}

/// Declarative request for a managed cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sClusterDynamicReq {
    pub name: String,
    /// Requested control-plane version; empty picks the highest available.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    pub node_groups: Vec<K8sNodeGroupDynamicReq>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Declarative request for one node group.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sNodeGroupDynamicReq {
    pub name: String,
    pub common_spec: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub common_image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk_size: Option<String>,
    #[serde(default)]
    pub on_auto_scaling: bool,
    #[serde(default)]
    pub desired_node_size: u32,
    #[serde(default)]
    pub min_node_size: u32,
    #[serde(default)]
    pub max_node_size: u32,
}
