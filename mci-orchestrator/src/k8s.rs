//! Managed Kubernetes cluster orchestration.
//!
//! Mirrors the MCI create path on top of the same shared-resource manager
//! and CSP client. What a provider can do (node groups bundled into cluster
//! creation, node image designation, required subnet count, available
//! versions per region) comes from a YAML capability table.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::Deserialize;

use mci_api_types::{
    csp_resource_name, k8s_cluster_key, new_uid, shared_resource_id, verify_label,
    K8sAutoscaling, K8sClusterDynamicReq, K8sClusterInfo, K8sClusterStatus, K8sNodeGroupInfo,
    K8sNodeGroupStatus, ResourceKind,
};
use mci_kvstore::{create_record, put_record, KvStore as _};
use mci_spider_client::{ClusterReqInfo, NodeGroupReqInfo, SubnetAddReqInfo};

use crate::error::{Error, Result};
use crate::shared_resource::{
    add_association, default_subnet_cidr, ensure_connection_defaults, get_shared, rollback,
};
use crate::{catalog, epoch_now, read_or_reset, Context};

/// Capability table, keyed by provider name.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sCapabilityTable {
    pub providers: BTreeMap<String, ProviderCapability>,
}

/// What one provider's managed-Kubernetes offering supports.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapability {
    /// Node groups must be bundled into cluster creation.
    pub node_groups_on_creation: bool,
    /// A node image may be designated explicitly; otherwise the CSP picks.
    pub node_image_designation: bool,
    /// Minimum number of subnets a cluster's vNet must offer.
    pub required_subnet_count: usize,
    #[serde(default)]
    pub root_disk: Option<RootDiskDefaults>,
    #[serde(default)]
    pub versions: Vec<VersionRow>,
}

/// Root-disk constraints applied when a node-group request leaves them out.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootDiskDefaults {
    #[serde(default)]
    pub r#type: String,
    #[serde(default)]
    pub size: String,
}

/// Available control-plane versions for a set of regions. The sentinel
/// region `common` applies to every region of the provider.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRow {
    pub regions: Vec<String>,
    pub available: Vec<AvailableVersion>,
}

/// One offered version: display name and the full id sent to the CSP.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableVersion {
    pub name: String,
    pub id: String,
}

static BUILTIN_TABLE: LazyLock<K8sCapabilityTable> = LazyLock::new(|| {
    K8sCapabilityTable::from_yaml(include_str!("../k8sclusterinfo.yaml"))
        .expect("builtin k8sclusterinfo.yaml parses")
});

impl K8sCapabilityTable {
    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// The table compiled into the crate.
    pub fn builtin() -> &'static Self {
        &BUILTIN_TABLE
    }

    pub fn provider(&self, provider_name: &str) -> Option<&ProviderCapability> {
        self.providers.get(provider_name)
    }
}

impl ProviderCapability {
    /// Versions offered in `region`, including `common` rows.
    pub fn versions_for_region(&self, region: &str) -> Vec<&AvailableVersion> {
        self.versions
            .iter()
            .filter(|row| {
                row.regions
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(region) || r.eq_ignore_ascii_case("common"))
            })
            .flat_map(|row| row.available.iter())
            .collect()
    }
}

/// Pick the version to use: the lexicographically highest available id whose
/// prefix matches the requested version filtered down to digits and dots.
/// An empty request picks the overall highest.
pub fn recommend_version<'a>(
    available: impl IntoIterator<Item = &'a AvailableVersion>,
    requested: &str,
) -> Result<String> {
    let filtered: String = requested
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let best = available
        .into_iter()
        .filter(|v| filtered.is_empty() || v.id.starts_with(&filtered))
        .map(|v| v.id.as_str())
        .max();

    match best {
        Some(id) => Ok(id.to_string()),
        None if filtered.is_empty() => Err(Error::validation(
            "no kubernetes version is available for this provider/region",
        )),
        None => Err(Error::validation(format!(
            "no available kubernetes version matches '{requested}'"
        ))),
    }
}

fn map_cluster_status(native: &str) -> K8sClusterStatus {
    match native {
        "Creating" => K8sClusterStatus::Creating,
        "Active" => K8sClusterStatus::Active,
        "Inactive" => K8sClusterStatus::Inactive,
        "Updating" => K8sClusterStatus::Updating,
        "Deleting" => K8sClusterStatus::Deleting,
        _ => K8sClusterStatus::Undefined,
    }
}

fn map_node_group_status(native: &str) -> K8sNodeGroupStatus {
    match native {
        "Creating" => K8sNodeGroupStatus::Creating,
        "Active" => K8sNodeGroupStatus::Active,
        "Inactive" => K8sNodeGroupStatus::Inactive,
        "Updating" => K8sNodeGroupStatus::Updating,
        "Deleting" => K8sNodeGroupStatus::Deleting,
        _ => K8sNodeGroupStatus::Undefined,
    }
}

/// Create a managed cluster from a declarative request.
pub async fn create_k8s_cluster_dynamic(
    ctx: &Context,
    ns: &str,
    req: &K8sClusterDynamicReq,
    capabilities: &K8sCapabilityTable,
) -> Result<K8sClusterInfo> {
    verify_label(ns).map_err(|err| Error::validation(format!("invalid ns: {err}")))?;
    verify_label(&req.name)
        .map_err(|err| Error::validation(format!("invalid cluster name: {err}")))?;
    if req.node_groups.is_empty() {
        return Err(Error::validation("request contains no node groups"));
    }
    for ng in &req.node_groups {
        verify_label(&ng.name)
            .map_err(|err| Error::validation(format!("invalid node group name: {err}")))?;
        if ng.max_node_size > 0 && ng.min_node_size > ng.max_node_size {
            return Err(Error::validation(format!(
                "node group '{}': min {} exceeds max {}",
                ng.name, ng.min_node_size, ng.max_node_size
            )));
        }
    }

    // all node groups resolve through their specs; they must share one connection
    let first_spec = catalog::get_spec(ctx, ns, &req.node_groups[0].common_spec).await?;
    let connection_name = first_spec.connection_name.clone();
    for ng in &req.node_groups[1..] {
        let spec = catalog::get_spec(ctx, ns, &ng.common_spec).await?;
        if spec.connection_name != connection_name {
            return Err(Error::validation(format!(
                "node group '{}' resolves to connection '{}', expected '{}'",
                ng.name, spec.connection_name, connection_name
            )));
        }
    }

    let capability = capabilities
        .provider(&first_spec.provider_name)
        .ok_or_else(|| {
            Error::validation(format!(
                "provider '{}' has no managed-kubernetes capability",
                first_spec.provider_name
            ))
        })?;
    let version = recommend_version(
        capability.versions_for_region(&first_spec.region_name),
        &req.version,
    )?;

    let key = k8s_cluster_key(ns, &req.name);
    if read_or_reset::<K8sClusterInfo>(ctx.kv.as_ref(), &key)
        .await?
        .is_some()
    {
        return Err(Error::precondition(format!(
            "k8s cluster '{}' already exists in ns '{ns}'",
            req.name
        )));
    }

    // shared defaults, then widen the vNet to the required subnet count
    let created = match ensure_connection_defaults(ctx, ns, &connection_name, true).await {
        Ok(created) => created,
        Err((err, created)) => {
            if let Err(rollback_err) = rollback(ctx, &created).await {
                return Err(Error::SharedResource(format!("{err}; {rollback_err}")));
            }
            return Err(err);
        }
    };

    let shared_id = shared_resource_id(ns, &connection_name);
    let vnet = get_shared(ctx, ns, ResourceKind::VNet, &shared_id).await?;
    let ssh_key = get_shared(ctx, ns, ResourceKind::SshKey, &shared_id).await?;
    let security_group = get_shared(ctx, ns, ResourceKind::SecurityGroup, &shared_id).await?;

    let mut subnet_names = vec![vnet.csp_resource_name.clone()];
    for index in 1..capability.required_subnet_count.max(1) {
        let name = format!("{}-k8s-{index}", vnet.csp_resource_name);
        let result = ctx
            .spider
            .add_subnet(
                &connection_name,
                SubnetAddReqInfo {
                    vpc_name: vnet.csp_resource_name.clone(),
                    name: name.clone(),
                    ipv4_cidr: default_subnet_cidr(index),
                    zone: String::new(),
                },
            )
            .await;
        match result {
            Ok(_) => subnet_names.push(name),
            // an earlier cluster may have widened the vNet already
            Err(err) if err.status() == Some(409) => subnet_names.push(name),
            Err(err) => {
                if let Err(rollback_err) = rollback(ctx, &created).await {
                    log::error!("rollback after subnet failure: {rollback_err}");
                }
                return Err(Error::SharedResource(format!(
                    "failed to add subnet '{name}' for cluster '{}': {err}",
                    req.name
                )));
            }
        }
    }

    let uid = new_uid();
    let cluster_csp_name = csp_resource_name(&connection_name, &uid);

    let mut node_groups = Vec::with_capacity(req.node_groups.len());
    let mut node_group_reqs = Vec::with_capacity(req.node_groups.len());
    for ng in &req.node_groups {
        let spec = catalog::get_spec(ctx, ns, &ng.common_spec).await?;
        let csp_image_name = if capability.node_image_designation && !ng.common_image.is_empty() {
            Some(
                catalog::get_image(ctx, ns, &ng.common_image)
                    .await?
                    .csp_image_name,
            )
        } else {
            None
        };

        let root_disk_type = ng
            .root_disk_type
            .clone()
            .or_else(|| capability.root_disk.as_ref().map(|d| d.r#type.clone()))
            .filter(|t| !t.is_empty());
        let root_disk_size = ng
            .root_disk_size
            .clone()
            .or_else(|| capability.root_disk.as_ref().map(|d| d.size.clone()))
            .filter(|s| !s.is_empty());

        let desired = ng.desired_node_size.max(1);
        let min = ng.min_node_size.max(1).min(desired);
        let max = ng.max_node_size.max(desired);

        node_group_reqs.push(NodeGroupReqInfo {
            name: format!("{cluster_csp_name}-{}", ng.name),
            image_name: csp_image_name.clone().unwrap_or_default(),
            vm_spec_name: spec.csp_spec_name.clone(),
            root_disk_type: root_disk_type.clone().unwrap_or_default(),
            root_disk_size: root_disk_size.clone().unwrap_or_default(),
            key_pair_name: ssh_key.csp_resource_name.clone(),
            on_auto_scaling: ng.on_auto_scaling.to_string(),
            desired_node_size: desired.to_string(),
            min_node_size: min.to_string(),
            max_node_size: max.to_string(),
        });
        node_groups.push(K8sNodeGroupInfo {
            name: ng.name.clone(),
            spec_id: spec.id.clone(),
            csp_image_name,
            ssh_key_id: shared_id.clone(),
            root_disk_type,
            root_disk_size,
            scaling: K8sAutoscaling {
                on_auto: ng.on_auto_scaling,
                desired,
                min,
                max,
            },
            status: K8sNodeGroupStatus::Creating,
        });
    }

    let bundled = capability.node_groups_on_creation;
    let cluster_req = ClusterReqInfo {
        name: cluster_csp_name.clone(),
        version: version.clone(),
        vpc_name: vnet.csp_resource_name.clone(),
        subnet_names: subnet_names.clone(),
        security_group_names: vec![security_group.csp_resource_name.clone()],
        node_group_list: if bundled {
            node_group_reqs.clone()
        } else {
            Vec::new()
        },
    };

    let mut cluster_info = ctx
        .spider
        .create_cluster(&connection_name, cluster_req)
        .await?;

    if !bundled {
        for ng_req in node_group_reqs {
            cluster_info = ctx
                .spider
                .add_node_group(&connection_name, &cluster_csp_name, ng_req)
                .await?;
        }
    }

    for (record, native) in node_groups.iter_mut().zip(&cluster_info.node_group_list) {
        record.status = map_node_group_status(&native.status);
    }

    let record = K8sClusterInfo {
        id: req.name.clone(),
        uid,
        name: req.name.clone(),
        ns: ns.to_string(),
        connection_name: connection_name.clone(),
        version,
        v_net_id: shared_id.clone(),
        subnet_ids: vec![shared_id.clone()],
        security_group_ids: vec![shared_id.clone()],
        ssh_key_id: shared_id.clone(),
        node_groups,
        status: map_cluster_status(&cluster_info.status),
        endpoint: cluster_info.access_info.endpoint.clone(),
        csp_resource_id: cluster_info.iid.system_id.clone(),
        csp_resource_name: cluster_csp_name,
        created_time: epoch_now(),
        label: req.label.clone(),
        description: req.description.clone(),
        ..Default::default()
    };
    if !create_record(ctx.kv.as_ref(), &key, &record).await? {
        return Err(Error::precondition(format!(
            "k8s cluster '{}' appeared concurrently in ns '{ns}'",
            req.name
        )));
    }

    for kind in ResourceKind::SHARED {
        add_association(ctx, ns, kind, &shared_id, &key).await?;
    }

    Ok(record)
}

/// Read one cluster record.
pub async fn get_k8s_cluster(ctx: &Context, ns: &str, cluster_id: &str) -> Result<K8sClusterInfo> {
    let key = k8s_cluster_key(ns, cluster_id);
    read_or_reset(ctx.kv.as_ref(), &key)
        .await?
        .ok_or_else(|| {
            Error::precondition(format!("k8s cluster '{cluster_id}' not found in ns '{ns}'"))
        })
}

/// Toggle autoscaling of one node group.
pub async fn set_node_group_autoscaling(
    ctx: &Context,
    ns: &str,
    cluster_id: &str,
    node_group_name: &str,
    on: bool,
) -> Result<K8sClusterInfo> {
    let mut cluster = get_k8s_cluster(ctx, ns, cluster_id).await?;
    let group = cluster
        .node_groups
        .iter_mut()
        .find(|g| g.name == node_group_name)
        .ok_or_else(|| {
            Error::precondition(format!(
                "node group '{node_group_name}' not found in cluster '{cluster_id}'"
            ))
        })?;

    let csp_ng_name = format!("{}-{}", cluster.csp_resource_name, node_group_name);
    ctx.spider
        .set_node_group_autoscaling(
            &cluster.connection_name,
            &cluster.csp_resource_name,
            &csp_ng_name,
            on,
        )
        .await?;

    group.scaling.on_auto = on;
    put_record(ctx.kv.as_ref(), &k8s_cluster_key(ns, cluster_id), &cluster).await?;
    Ok(cluster)
}

/// Change the scaling envelope of one node group.
pub async fn change_node_group_scale(
    ctx: &Context,
    ns: &str,
    cluster_id: &str,
    node_group_name: &str,
    desired: u32,
    min: u32,
    max: u32,
) -> Result<K8sClusterInfo> {
    if min > desired || desired > max {
        return Err(Error::validation(format!(
            "scaling sizes must satisfy min <= desired <= max (got {min}/{desired}/{max})"
        )));
    }

    let mut cluster = get_k8s_cluster(ctx, ns, cluster_id).await?;
    let group = cluster
        .node_groups
        .iter_mut()
        .find(|g| g.name == node_group_name)
        .ok_or_else(|| {
            Error::precondition(format!(
                "node group '{node_group_name}' not found in cluster '{cluster_id}'"
            ))
        })?;

    let csp_ng_name = format!("{}-{}", cluster.csp_resource_name, node_group_name);
    ctx.spider
        .change_node_group_scale(
            &cluster.connection_name,
            &cluster.csp_resource_name,
            &csp_ng_name,
            desired,
            min,
            max,
        )
        .await?;

    group.scaling.desired = desired;
    group.scaling.min = min;
    group.scaling.max = max;
    put_record(ctx.kv.as_ref(), &k8s_cluster_key(ns, cluster_id), &cluster).await?;
    Ok(cluster)
}

/// Upgrade the control plane to the recommended match for `requested`.
pub async fn upgrade_k8s_cluster(
    ctx: &Context,
    ns: &str,
    cluster_id: &str,
    requested: &str,
    capabilities: &K8sCapabilityTable,
) -> Result<K8sClusterInfo> {
    let mut cluster = get_k8s_cluster(ctx, ns, cluster_id).await?;
    let spec = catalog::get_spec(ctx, ns, &cluster.node_groups[0].spec_id).await?;
    let capability = capabilities.provider(&spec.provider_name).ok_or_else(|| {
        Error::validation(format!(
            "provider '{}' has no managed-kubernetes capability",
            spec.provider_name
        ))
    })?;
    let version = recommend_version(
        capability.versions_for_region(&spec.region_name),
        requested,
    )?;

    let info = ctx
        .spider
        .upgrade_cluster(&cluster.connection_name, &cluster.csp_resource_name, &version)
        .await?;

    cluster.version = version;
    cluster.status = map_cluster_status(&info.status);
    put_record(ctx.kv.as_ref(), &k8s_cluster_key(ns, cluster_id), &cluster).await?;
    Ok(cluster)
}

/// Delete a cluster and drop its shared-resource back-references.
pub async fn delete_k8s_cluster(
    ctx: &Context,
    ns: &str,
    cluster_id: &str,
    force: bool,
) -> Result<()> {
    let cluster = get_k8s_cluster(ctx, ns, cluster_id).await?;
    match ctx
        .spider
        .delete_cluster(&cluster.connection_name, &cluster.csp_resource_name)
        .await
    {
        Ok(()) => {}
        Err(err) if force => {
            log::warn!("forced delete of cluster '{cluster_id}': csp said {err}")
        }
        Err(err) => return Err(err.into()),
    }

    let key = k8s_cluster_key(ns, cluster_id);
    let shared_id = shared_resource_id(ns, &cluster.connection_name);
    for kind in ResourceKind::SHARED {
        crate::shared_resource::remove_association(ctx, ns, kind, &shared_id, &key).await?;
    }
    ctx.kv.delete(&key).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(ids: &[&str]) -> Vec<AvailableVersion> {
        ids.iter()
            .map(|id| AvailableVersion {
                name: id.split('.').take(2).collect::<Vec<_>>().join("."),
                id: id.to_string(),
            })
            .collect()
    }

    #[test]
    fn recommend_matches_prefix() {
        let available = versions(&["1.28.9", "1.29.4", "1.29.1", "1.30.0"]);
        assert_eq!(
            recommend_version(available.iter(), "1.29").unwrap(),
            "1.29.4"
        );
        assert_eq!(
            recommend_version(available.iter(), "v1.28").unwrap(),
            "1.28.9"
        );
    }

    #[test]
    fn recommend_unspecified_picks_highest() {
        let available = versions(&["1.28.9", "1.30.0", "1.29.4"]);
        assert_eq!(recommend_version(available.iter(), "").unwrap(), "1.30.0");
    }

    #[test]
    fn recommend_rejects_unknown() {
        let available = versions(&["1.28.9"]);
        assert!(recommend_version(available.iter(), "2.0").is_err());
        assert!(recommend_version(std::iter::empty::<&AvailableVersion>(), "").is_err());
    }

    #[test]
    fn builtin_table_parses() {
        let table = K8sCapabilityTable::builtin();
        let aws = table.provider("aws").expect("aws capability");
        assert!(aws.required_subnet_count >= 2);
        assert!(!aws.versions_for_region("ap-northeast-2").is_empty());
    }

    #[test]
    fn common_region_rows_apply_everywhere() {
        let yaml = r#"
providers:
  gcp:
    nodeGroupsOnCreation: false
    nodeImageDesignation: false
    requiredSubnetCount: 1
    versions:
      - regions: [common]
        available:
          - { name: "1.29", id: "1.29.4" }
"#;
        let table = K8sCapabilityTable::from_yaml(yaml).unwrap();
        let gcp = table.provider("gcp").unwrap();
        assert_eq!(gcp.versions_for_region("anywhere").len(), 1);
    }
}
