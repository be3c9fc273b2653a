//! VM records and per-VM creation error bookkeeping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ActionType, FailurePolicy, MonAgentStatus, TargetStatus, VmCreationPhase, VmStatus};

/// A single virtual machine tracked by the orchestrator.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_group_id: Option<String>,
    pub mci_id: String,
    pub ns: String,
    pub connection_name: String,
    pub spec_id: String,
    pub image_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub v_net_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subnet_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub security_group_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_key_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_disk_ids: Vec<String>,
    #[serde(default)]
    pub status: VmStatus,
    #[serde(default)]
    pub target_status: TargetStatus,
    #[serde(default)]
    pub target_action: ActionType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub public_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ssh_port: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub csp_resource_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub csp_resource_name: String,
    #[serde(default)]
    pub mon_agent_status: MonAgentStatus,
    #[serde(default)]
    pub created_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk_size: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// One VM-level failure collected during MCI creation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmCreationError {
    pub vm_name: String,
    pub phase: VmCreationPhase,
    pub error: String,
    pub timestamp: i64,
}

/// Aggregated creation failures attached to an MCI that had partial failures.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MciCreationErrors {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vm_object_creation_errors: Vec<VmCreationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vm_creation_errors: Vec<VmCreationError>,
    pub total_vm_count: usize,
    pub successful_vm_count: usize,
    pub failed_vm_count: usize,
    pub failure_handling_strategy: FailurePolicy,
}

impl MciCreationErrors {
    /// True if any VM failed in either phase.
    pub fn any(&self) -> bool {
        !self.vm_object_creation_errors.is_empty() || !self.vm_creation_errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_are_omitted() {
        let vm = VmInfo {
            id: "v".into(),
            name: "v".into(),
            mci_id: "m1".into(),
            ns: "demo".into(),
            connection_name: "aws".into(),
            spec_id: "spec".into(),
            image_id: "img".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&vm).unwrap();
        assert!(!json.contains("publicIp"));
        assert!(!json.contains("sshPort"));
        assert!(json.contains("\"status\":\"Undefined\""));
    }

    #[test]
    fn creation_error_aggregate() {
        let errors = MciCreationErrors {
            vm_creation_errors: vec![VmCreationError {
                vm_name: "v-2".into(),
                phase: VmCreationPhase::VmCreation,
                error: "csp error (status 500): capacity".into(),
                timestamp: 0,
            }],
            total_vm_count: 3,
            successful_vm_count: 2,
            failed_vm_count: 1,
            failure_handling_strategy: FailurePolicy::Continue,
            ..Default::default()
        };
        assert!(errors.any());
        let json = serde_json::to_value(&errors).unwrap();
        assert_eq!(json["failedVmCount"], 1);
        assert_eq!(json["vmCreationErrors"][0]["phase"], "vm_creation");
        assert_eq!(json["failureHandlingStrategy"], "continue");
    }
}
