//! Wire types of the CSP-abstraction REST API.
//!
//! Field names mirror the upstream JSON exactly; unknown fields coming back
//! from the service are ignored. CSP-side sizes travel as decimal strings.

use serde::{Deserialize, Serialize};

/// Identifier pair: the name the caller chose and the id the CSP assigned.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SpiderIid {
    #[serde(rename = "NameId", default)]
    pub name_id: String,
    #[serde(rename = "SystemId", default)]
    pub system_id: String,
}

/// Envelope for every request: the connection to act on plus the payload.
#[derive(Clone, Debug, Serialize)]
pub struct SpiderRequest<T> {
    #[serde(rename = "ConnectionName")]
    pub connection_name: String,
    #[serde(rename = "ReqInfo")]
    pub req_info: T,
}

// network

#[derive(Clone, Debug, Default, Serialize)]
pub struct VpcReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "IPv4_CIDR")]
    pub ipv4_cidr: String,
    #[serde(rename = "SubnetInfoList")]
    pub subnet_info_list: Vec<SubnetReqInfo>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SubnetReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "IPv4_CIDR")]
    pub ipv4_cidr: String,
    #[serde(rename = "Zone", skip_serializing_if = "String::is_empty", default)]
    pub zone: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct VpcInfo {
    #[serde(rename = "IId", default)]
    pub iid: SpiderIid,
    #[serde(rename = "IPv4_CIDR", default)]
    pub ipv4_cidr: String,
    #[serde(rename = "SubnetInfoList", default)]
    pub subnet_info_list: Vec<SubnetInfo>,
}

/// Payload of `POST /subnet`: add one subnet to an existing VPC.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SubnetAddReqInfo {
    #[serde(rename = "VPCName")]
    pub vpc_name: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "IPv4_CIDR")]
    pub ipv4_cidr: String,
    #[serde(rename = "Zone", skip_serializing_if = "String::is_empty", default)]
    pub zone: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SubnetInfo {
    #[serde(rename = "IId", default)]
    pub iid: SpiderIid,
    #[serde(rename = "IPv4_CIDR", default)]
    pub ipv4_cidr: String,
    #[serde(rename = "Zone", default)]
    pub zone: String,
}

// ssh keys

#[derive(Clone, Debug, Default, Serialize)]
pub struct KeyPairReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct KeyPairInfo {
    #[serde(rename = "IId", default)]
    pub iid: SpiderIid,
    #[serde(rename = "Fingerprint", default)]
    pub fingerprint: String,
    #[serde(rename = "PublicKey", default)]
    pub public_key: String,
    #[serde(rename = "PrivateKey", default)]
    pub private_key: String,
}

// security groups

#[derive(Clone, Debug, Default, Serialize)]
pub struct SecurityGroupReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "VPCName")]
    pub vpc_name: String,
    #[serde(rename = "SecurityRules")]
    pub security_rules: Vec<SecurityRuleInfo>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct SecurityRuleInfo {
    #[serde(rename = "Direction")]
    pub direction: String,
    #[serde(rename = "IPProtocol")]
    pub ip_protocol: String,
    #[serde(rename = "FromPort")]
    pub from_port: String,
    #[serde(rename = "ToPort")]
    pub to_port: String,
    #[serde(rename = "CIDR", default)]
    pub cidr: String,
}

impl SecurityRuleInfo {
    /// The default inbound rule set of an on-demand security group: SSH only.
    pub fn default_inbound() -> Vec<Self> {
        vec![SecurityRuleInfo {
            direction: "inbound".into(),
            ip_protocol: "TCP".into(),
            from_port: "22".into(),
            to_port: "22".into(),
            cidr: "0.0.0.0/0".into(),
        }]
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SecurityGroupInfo {
    #[serde(rename = "IId", default)]
    pub iid: SpiderIid,
    #[serde(rename = "VpcIID", default)]
    pub vpc_iid: SpiderIid,
    #[serde(rename = "SecurityRules", default)]
    pub security_rules: Vec<SecurityRuleInfo>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SecurityRulesReqInfo {
    #[serde(rename = "RuleInfoList")]
    pub rule_info_list: Vec<SecurityRuleInfo>,
}

// vms

#[derive(Clone, Debug, Default, Serialize)]
pub struct VmReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ImageName")]
    pub image_name: String,
    #[serde(rename = "VPCName")]
    pub vpc_name: String,
    #[serde(rename = "SubnetName")]
    pub subnet_name: String,
    #[serde(rename = "SecurityGroupNames")]
    pub security_group_names: Vec<String>,
    #[serde(rename = "KeyPairName")]
    pub key_pair_name: String,
    #[serde(rename = "VMSpecName")]
    pub vm_spec_name: String,
    #[serde(rename = "RootDiskType", skip_serializing_if = "String::is_empty", default)]
    pub root_disk_type: String,
    #[serde(rename = "RootDiskSize", skip_serializing_if = "String::is_empty", default)]
    pub root_disk_size: String,
    #[serde(rename = "DataDiskNames", skip_serializing_if = "Vec::is_empty", default)]
    pub data_disk_names: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SpiderVmInfo {
    #[serde(rename = "IId", default)]
    pub iid: SpiderIid,
    #[serde(rename = "ImageIId", default)]
    pub image_iid: SpiderIid,
    #[serde(rename = "VpcIID", default)]
    pub vpc_iid: SpiderIid,
    #[serde(rename = "SubnetIID", default)]
    pub subnet_iid: SpiderIid,
    #[serde(rename = "SecurityGroupIIds", default)]
    pub security_group_iids: Vec<SpiderIid>,
    #[serde(rename = "KeyPairIId", default)]
    pub key_pair_iid: SpiderIid,
    #[serde(rename = "VMSpecName", default)]
    pub vm_spec_name: String,
    #[serde(rename = "PublicIP", default)]
    pub public_ip: String,
    #[serde(rename = "PrivateIP", default)]
    pub private_ip: String,
    #[serde(rename = "SSHAccessPoint", default)]
    pub ssh_access_point: String,
    #[serde(rename = "StartTime", default)]
    pub start_time: String,
}

impl SpiderVmInfo {
    /// Port component of `SSHAccessPoint` ("ip:port"), default 22.
    pub fn ssh_port(&self) -> String {
        self.ssh_access_point
            .rsplit_once(':')
            .map(|(_, port)| port.to_string())
            .unwrap_or_else(|| "22".to_string())
    }
}

/// Answer of `GET /vmstatus/{name}`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct VmStatusInfo {
    #[serde(rename = "Status", default)]
    pub status: String,
}

/// Answer of the deletion endpoints: `{"Result": "true"}`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BooleanResult {
    #[serde(rename = "Result", default)]
    pub result: String,
}

impl BooleanResult {
    pub fn is_true(&self) -> bool {
        self.result.eq_ignore_ascii_case("true")
    }
}

/// Control verbs of `GET /controlvm/{name}?action=...`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VmControlAction {
    Suspend,
    Resume,
    Reboot,
}

serde_plain::derive_display_from_serialize!(VmControlAction);
serde_plain::derive_fromstr_from_deserialize!(VmControlAction);

// disks

#[derive(Clone, Debug, Default, Serialize)]
pub struct DiskReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "DiskType", skip_serializing_if = "String::is_empty", default)]
    pub disk_type: String,
    #[serde(rename = "DiskSize", skip_serializing_if = "String::is_empty", default)]
    pub disk_size: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DiskInfo {
    #[serde(rename = "IId", default)]
    pub iid: SpiderIid,
    #[serde(rename = "DiskType", default)]
    pub disk_type: String,
    #[serde(rename = "DiskSize", default)]
    pub disk_size: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "OwnerVM", default)]
    pub owner_vm: SpiderIid,
}

/// Attach/detach payload for `PUT /disk/{name}/attach|detach`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DiskAttachReqInfo {
    #[serde(rename = "VMName")]
    pub vm_name: String,
}

// clusters

#[derive(Clone, Debug, Default, Serialize)]
pub struct ClusterReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "VPCName")]
    pub vpc_name: String,
    #[serde(rename = "SubnetNames")]
    pub subnet_names: Vec<String>,
    #[serde(rename = "SecurityGroupNames")]
    pub security_group_names: Vec<String>,
    #[serde(rename = "NodeGroupList", skip_serializing_if = "Vec::is_empty", default)]
    pub node_group_list: Vec<NodeGroupReqInfo>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct NodeGroupReqInfo {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ImageName", skip_serializing_if = "String::is_empty", default)]
    pub image_name: String,
    #[serde(rename = "VMSpecName")]
    pub vm_spec_name: String,
    #[serde(rename = "RootDiskType", skip_serializing_if = "String::is_empty", default)]
    pub root_disk_type: String,
    #[serde(rename = "RootDiskSize", skip_serializing_if = "String::is_empty", default)]
    pub root_disk_size: String,
    #[serde(rename = "KeyPairName")]
    pub key_pair_name: String,
    #[serde(rename = "OnAutoScaling")]
    pub on_auto_scaling: String,
    #[serde(rename = "DesiredNodeSize")]
    pub desired_node_size: String,
    #[serde(rename = "MinNodeSize")]
    pub min_node_size: String,
    #[serde(rename = "MaxNodeSize")]
    pub max_node_size: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClusterInfo {
    #[serde(rename = "IId", default)]
    pub iid: SpiderIid,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "AccessInfo", default)]
    pub access_info: ClusterAccessInfo,
    #[serde(rename = "NodeGroupList", default)]
    pub node_group_list: Vec<NodeGroupInfo>,
    #[serde(rename = "Status", default)]
    pub status: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClusterAccessInfo {
    #[serde(rename = "Endpoint", default)]
    pub endpoint: String,
    #[serde(rename = "Kubeconfig", default)]
    pub kubeconfig: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NodeGroupInfo {
    #[serde(rename = "IId", default)]
    pub iid: SpiderIid,
    #[serde(rename = "VMSpecName", default)]
    pub vm_spec_name: String,
    #[serde(rename = "OnAutoScaling", default)]
    pub on_auto_scaling: bool,
    #[serde(rename = "DesiredNodeSize", default)]
    pub desired_node_size: i64,
    #[serde(rename = "MinNodeSize", default)]
    pub min_node_size: i64,
    #[serde(rename = "MaxNodeSize", default)]
    pub max_node_size: i64,
    #[serde(rename = "Status", default)]
    pub status: String,
}

/// Payload for `PUT /cluster/{name}/nodegroup/{ng}/onautoscaling`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SetAutoscalingReqInfo {
    #[serde(rename = "OnAutoScaling")]
    pub on_auto_scaling: String,
}

/// Payload for `PUT /cluster/{name}/nodegroup/{ng}/autoscalesize`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ChangeAutoscaleSizeReqInfo {
    #[serde(rename = "DesiredNodeSize")]
    pub desired_node_size: String,
    #[serde(rename = "MinNodeSize")]
    pub min_node_size: String,
    #[serde(rename = "MaxNodeSize")]
    pub max_node_size: String,
}

/// Payload for `PUT /cluster/{name}/upgrade`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct UpgradeClusterReqInfo {
    #[serde(rename = "Version")]
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_shape() {
        let req = SpiderRequest {
            connection_name: "aws-ap-northeast-2".into(),
            req_info: KeyPairReqInfo {
                name: "aws-ap-northeast-2-demo-shared".into(),
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["ConnectionName"], "aws-ap-northeast-2");
        assert_eq!(json["ReqInfo"]["Name"], "aws-ap-northeast-2-demo-shared");
    }

    #[test]
    fn vm_info_ignores_unknown_fields() {
        let raw = r#"{
            "IId": {"NameId": "aws-v", "SystemId": "i-0abc"},
            "PublicIP": "3.3.3.3",
            "PrivateIP": "10.0.0.4",
            "SSHAccessPoint": "3.3.3.3:22",
            "Banana": {"deeply": ["unknown"]}
        }"#;
        let info: SpiderVmInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.iid.system_id, "i-0abc");
        assert_eq!(info.ssh_port(), "22");
    }

    #[test]
    fn ssh_port_defaults_to_22() {
        let info = SpiderVmInfo::default();
        assert_eq!(info.ssh_port(), "22");
    }
}
