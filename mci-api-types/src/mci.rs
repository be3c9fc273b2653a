//! MCI and sub-group records plus the dynamic provisioning request types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ActionType, FailurePolicy, MciCreationErrors, TargetStatus, VmInfo};

/// A user-named bundle of VMs possibly spanning providers and regions.
///
/// The persisted record never embeds VMs; `vms` is filled when the record is
/// composed for a caller from a descendant scan.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MciInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    pub name: String,
    pub ns: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default)]
    pub target_status: TargetStatus,
    #[serde(default)]
    pub target_action: ActionType,
    #[serde(default)]
    pub install_mon_agent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_command: Option<PostCommand>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_label: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label: BTreeMap<String, String>,
    #[serde(default)]
    pub policy_on_partial_failure: FailurePolicy,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_message: String,
    #[serde(default)]
    pub created_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_errors: Option<MciCreationErrors>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vms: Vec<VmInfo>,
}

/// Commands to run on every VM once an MCI settles.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostCommand {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

/// A named homogeneous collection of VMs inside an MCI.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubGroupInfo {
    pub id: String,
    pub ns: String,
    pub mci_id: String,
    pub size: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vm_ids: Vec<String>,
}

/// Declarative request for a whole MCI.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MciDynamicReq {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub install_mon_agent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_command: Option<PostCommand>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub system_label: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label: BTreeMap<String, String>,
    #[serde(default)]
    pub policy_on_partial_failure: FailurePolicy,
    pub vm: Vec<VmDynamicReq>,
}

/// Declarative request for one sub-group of VMs.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmDynamicReq {
    pub name: String,
    /// Id of the spec in the catalog; implies connection, provider and region.
    pub common_spec: String,
    /// Id of the image in the catalog, resolved against the spec's connection.
    pub common_image: String,
    /// Number of VMs in the sub-group, as a decimal string. Default "1".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub_group_size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk_size: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl VmDynamicReq {
    /// Requested sub-group size; the wire carries it as a string.
    pub fn group_size(&self) -> Result<u32, anyhow::Error> {
        if self.sub_group_size.is_empty() {
            return Ok(1);
        }
        let n: u32 = self
            .sub_group_size
            .parse()
            .map_err(|_| anyhow::format_err!("invalid subGroupSize '{}'", self.sub_group_size))?;
        if n == 0 {
            anyhow::bail!("subGroupSize must be at least 1");
        }
        Ok(n)
    }
}

/// Options modifying MCI creation and deletion.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum McisOption {
    #[default]
    None,
    /// Pause after validation until an external continue/withdraw decision.
    Hold,
    /// Terminate still-running VMs before deletion.
    Terminate,
    /// Skip all safety gates.
    Force,
}

serde_plain::derive_display_from_serialize!(McisOption);
serde_plain::derive_fromstr_from_deserialize!(McisOption);
