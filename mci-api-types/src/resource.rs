//! Resource records: shared resources, specs and images.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Kind of a namespaced resource record.
///
/// The first four kinds are created on demand per (namespace, connection);
/// specs and images are read-only catalogs produced externally.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum ResourceKind {
    #[serde(rename = "vNet")]
    VNet,
    #[serde(rename = "subnet")]
    Subnet,
    #[serde(rename = "sshKey")]
    SshKey,
    #[serde(rename = "securityGroup")]
    SecurityGroup,
    #[serde(rename = "dataDisk")]
    DataDisk,
    #[serde(rename = "spec")]
    Spec,
    #[serde(rename = "image")]
    Image,
}

serde_plain::derive_display_from_serialize!(ResourceKind);
serde_plain::derive_fromstr_from_deserialize!(ResourceKind);

impl ResourceKind {
    /// The kinds created on demand by the shared-resource manager, in the
    /// order they must be created (network before things attached to it).
    pub const SHARED: [ResourceKind; 4] = [
        ResourceKind::VNet,
        ResourceKind::Subnet,
        ResourceKind::SshKey,
        ResourceKind::SecurityGroup,
    ];
}

/// A default resource created on demand per (namespace, connection).
///
/// `associated` is the set of store keys currently referencing this resource;
/// it must be empty before the resource may be deleted without `force`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedResourceInfo {
    pub kind: Option<ResourceKind>,
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    pub ns: String,
    pub connection_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub csp_resource_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub csp_resource_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub associated: BTreeSet<String>,
    #[serde(default)]
    pub created_time: i64,
}

/// A VM size descriptor, read-only in this system.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecInfo {
    pub id: String,
    pub connection_name: String,
    pub csp_spec_name: String,
    pub provider_name: String,
    pub region_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v_cpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_gib: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_hour: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_disk_size: Option<String>,
}

/// An OS image descriptor, read-only in this system.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfo {
    pub id: String,
    pub connection_name: String,
    pub csp_image_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_family: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Keys of the VMs currently provisioned from this image.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub associated: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names() {
        assert_eq!(ResourceKind::VNet.to_string(), "vNet");
        assert_eq!(ResourceKind::SshKey.to_string(), "sshKey");
        assert_eq!(
            "securityGroup".parse::<ResourceKind>().unwrap(),
            ResourceKind::SecurityGroup
        );
    }

    #[test]
    fn associated_set_round_trip() {
        let mut res = SharedResourceInfo {
            kind: Some(ResourceKind::VNet),
            id: "demo-shared-aws".into(),
            ns: "demo".into(),
            connection_name: "aws".into(),
            ..Default::default()
        };
        res.associated.insert("/ns/demo/mci/m1/vm/v".into());

        let json = serde_json::to_string(&res).unwrap();
        let back: SharedResourceInfo = serde_json::from_str(&json).unwrap();
        assert!(back.associated.contains("/ns/demo/mci/m1/vm/v"));
        assert_eq!(back.kind, Some(ResourceKind::VNet));
    }
}
