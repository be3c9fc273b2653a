//! On-demand default resources per (namespace, connection).
//!
//! Every VM needs a vNet, a subnet, an SSH key and a security group on its
//! connection. These defaults carry a deterministic id, so a concurrent
//! request that finds one already present reuses it instead of re-creating;
//! the CSP-side name collision backstops the race. Resources created within
//! one request are tracked for rollback.

use std::collections::BTreeSet;

use serde_json::Value;

use mci_api_types::{
    csp_resource_name, new_uid, resource_key, shared_resource_id, ResourceKind,
    SharedResourceInfo,
};
use mci_kvstore::{put_record, KvStore as _};
use mci_spider_client::{
    KeyPairReqInfo, SecurityGroupReqInfo, SecurityRuleInfo, SubnetAddReqInfo, SubnetReqInfo,
    VpcReqInfo,
};

use crate::error::{Error, Result};
use crate::fanout::{scatter, MAX_CONCURRENCY};
use crate::{epoch_now, read_or_reset, Context};

/// Address space of an on-demand vNet and its first subnets.
pub const DEFAULT_VNET_CIDR: &str = "10.0.0.0/16";

/// One resource created on demand within the current request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedResource {
    pub kind: ResourceKind,
    pub id: String,
    pub ns: String,
    pub connection_name: String,
}

/// Per-request list of on-demand creations, in creation order.
pub type CreatedResources = Vec<CreatedResource>;

/// CIDR of the n-th default subnet inside [`DEFAULT_VNET_CIDR`].
pub fn default_subnet_cidr(index: usize) -> String {
    format!("10.0.{}.0/24", index + 1)
}

/// Reserve the default resources for every connection of a request, with
/// bounded concurrency. On failure the combined created-resource list is
/// handed back so the caller can [`rollback`].
pub async fn prepare_for_connections(
    ctx: &Context,
    ns: &str,
    connections: &BTreeSet<String>,
    on_demand: bool,
) -> std::result::Result<CreatedResources, (Error, CreatedResources)> {
    let results = scatter(connections.iter(), MAX_CONCURRENCY, |_, connection| {
        ensure_connection_defaults(ctx, ns, connection, on_demand)
    })
    .await;

    let mut created = CreatedResources::new();
    let mut first_error = None;
    for result in results {
        match result {
            Ok(mut list) => created.append(&mut list),
            Err((err, mut list)) => {
                created.append(&mut list);
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }
    match first_error {
        None => Ok(created),
        Some(err) => Err((err, created)),
    }
}

/// Look up or create the four default resources of one connection.
pub async fn ensure_connection_defaults(
    ctx: &Context,
    ns: &str,
    connection_name: &str,
    on_demand: bool,
) -> std::result::Result<CreatedResources, (Error, CreatedResources)> {
    let mut created = CreatedResources::new();
    let id = shared_resource_id(ns, connection_name);

    for kind in ResourceKind::SHARED {
        match ensure_one(ctx, ns, connection_name, kind, &id, on_demand).await {
            Ok(mut resources) => created.append(&mut resources),
            Err(err) => return Err((err, created)),
        }
    }
    Ok(created)
}

/// Returns the tracking entries for what this call created. Creating the
/// vNet yields two: the subnet born with it gets its own record.
async fn ensure_one(
    ctx: &Context,
    ns: &str,
    connection_name: &str,
    kind: ResourceKind,
    id: &str,
    on_demand: bool,
) -> Result<CreatedResources> {
    let key = resource_key(ns, kind, id);
    if read_or_reset::<SharedResourceInfo>(ctx.kv.as_ref(), &key)
        .await?
        .is_some()
    {
        return Ok(Vec::new());
    }
    if !on_demand {
        return Err(Error::precondition(format!(
            "default {kind} '{id}' does not exist and on-demand creation is disabled"
        )));
    }

    let csp_name = csp_resource_name(connection_name, id);
    let create_result = create_on_csp(ctx, connection_name, kind, &csp_name).await;

    let created_ids = match create_result {
        Ok(ids) => ids,
        Err(err) => {
            // A concurrent request may have won the deterministic-id race;
            // if the record is present now, reuse it.
            if read_or_reset::<SharedResourceInfo>(ctx.kv.as_ref(), &key)
                .await?
                .is_some()
            {
                log::debug!("default {kind} '{id}' appeared concurrently, reusing");
                return Ok(Vec::new());
            }
            return Err(Error::SharedResource(format!(
                "failed to create default {kind} '{id}' on connection '{connection_name}': {err}"
            )));
        }
    };

    let mut created = Vec::new();
    for (record_kind, csp_resource_id) in created_ids {
        let record = SharedResourceInfo {
            kind: Some(record_kind),
            id: id.to_string(),
            uid: new_uid(),
            ns: ns.to_string(),
            connection_name: connection_name.to_string(),
            csp_resource_id,
            csp_resource_name: csp_name.clone(),
            description: format!("default {record_kind} for connection {connection_name}"),
            associated: BTreeSet::new(),
            created_time: epoch_now(),
        };
        put_record(
            ctx.kv.as_ref(),
            &resource_key(ns, record_kind, id),
            &record,
        )
        .await?;
        log::info!("created default {record_kind} '{id}' on connection '{connection_name}'");
        created.push(CreatedResource {
            kind: record_kind,
            id: id.to_string(),
            ns: ns.to_string(),
            connection_name: connection_name.to_string(),
        });
    }
    Ok(created)
}

/// Issue the CSP-side create for one default resource. Returns the record
/// kinds to write with their CSP ids (the vNet create also yields its
/// first subnet).
async fn create_on_csp(
    ctx: &Context,
    connection_name: &str,
    kind: ResourceKind,
    csp_name: &str,
) -> std::result::Result<Vec<(ResourceKind, String)>, mci_spider_client::SpiderError> {
    match kind {
        ResourceKind::VNet => {
            let info = ctx
                .spider
                .create_vpc(
                    connection_name,
                    VpcReqInfo {
                        name: csp_name.to_string(),
                        ipv4_cidr: DEFAULT_VNET_CIDR.to_string(),
                        subnet_info_list: vec![SubnetReqInfo {
                            name: csp_name.to_string(),
                            ipv4_cidr: default_subnet_cidr(0),
                            zone: String::new(),
                        }],
                    },
                )
                .await?;
            let subnet_id = info
                .subnet_info_list
                .first()
                .map(|s| s.iid.system_id.clone())
                .unwrap_or_default();
            Ok(vec![
                (ResourceKind::VNet, info.iid.system_id),
                (ResourceKind::Subnet, subnet_id),
            ])
        }
        ResourceKind::Subnet => {
            // The first subnet is born with the vNet; creating it separately
            // only happens when the vNet pre-existed without a subnet record.
            match ctx
                .spider
                .add_subnet(
                    connection_name,
                    SubnetAddReqInfo {
                        vpc_name: csp_name.to_string(),
                        name: csp_name.to_string(),
                        ipv4_cidr: default_subnet_cidr(0),
                        zone: String::new(),
                    },
                )
                .await
            {
                Ok(info) => {
                    let id = info
                        .subnet_info_list
                        .iter()
                        .find(|s| s.iid.name_id == csp_name)
                        .map(|s| s.iid.system_id.clone())
                        .unwrap_or_default();
                    Ok(vec![(ResourceKind::Subnet, id)])
                }
                // The subnet already exists inside the vNet: adopt it.
                Err(err) if err.status() == Some(409) => {
                    Ok(vec![(ResourceKind::Subnet, String::new())])
                }
                Err(err) => Err(err),
            }
        }
        ResourceKind::SshKey => {
            let info = ctx
                .spider
                .create_keypair(
                    connection_name,
                    KeyPairReqInfo {
                        name: csp_name.to_string(),
                    },
                )
                .await?;
            Ok(vec![(ResourceKind::SshKey, info.iid.system_id)])
        }
        ResourceKind::SecurityGroup => {
            let info = ctx
                .spider
                .create_security_group(
                    connection_name,
                    SecurityGroupReqInfo {
                        name: csp_name.to_string(),
                        vpc_name: csp_name.to_string(),
                        security_rules: SecurityRuleInfo::default_inbound(),
                    },
                )
                .await?;
            Ok(vec![(ResourceKind::SecurityGroup, info.iid.system_id)])
        }
        other => Err(mci_spider_client::SpiderError::BadResponse(format!(
            "{other} is not an on-demand resource kind"
        ))),
    }
}

/// Undo the creations of one request: sshKey first, then securityGroup,
/// a settling gap, then vNet (subnets go with it). Partial failures are
/// collected and surfaced with a CRITICAL marker for manual cleanup.
pub async fn rollback(ctx: &Context, created: &CreatedResources) -> Result<()> {
    if created.is_empty() {
        return Ok(());
    }
    log::warn!("rolling back {} on-demand resource(s)", created.len());

    let mut failures = Vec::new();
    for kind in [ResourceKind::SshKey, ResourceKind::SecurityGroup] {
        rollback_kind(ctx, created, kind, &mut failures).await;
    }
    if !ctx.pacing.rollback_settle.is_zero() {
        tokio::time::sleep(ctx.pacing.rollback_settle).await;
    }
    rollback_kind(ctx, created, ResourceKind::VNet, &mut failures).await;

    // Subnet records ride on the vNet; only the store entry is removed.
    for resource in created.iter().filter(|r| r.kind == ResourceKind::Subnet) {
        let key = resource_key(&resource.ns, ResourceKind::Subnet, &resource.id);
        if let Err(err) = ctx.kv.delete(&key).await {
            failures.push(format!("subnet '{}': {err}", resource.id));
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::SharedResource(format!(
            "CRITICAL: rollback left resources behind, manual cleanup required: {}",
            failures.join("; ")
        )))
    }
}

async fn rollback_kind(
    ctx: &Context,
    created: &CreatedResources,
    kind: ResourceKind,
    failures: &mut Vec<String>,
) {
    for resource in created.iter().filter(|r| r.kind == kind) {
        let csp_name = csp_resource_name(&resource.connection_name, &resource.id);
        let result = match kind {
            ResourceKind::SshKey => {
                ctx.spider
                    .delete_keypair(&resource.connection_name, &csp_name)
                    .await
            }
            ResourceKind::SecurityGroup => {
                ctx.spider
                    .delete_security_group(&resource.connection_name, &csp_name)
                    .await
            }
            ResourceKind::VNet => {
                ctx.spider
                    .delete_vpc(&resource.connection_name, &csp_name)
                    .await
            }
            _ => Ok(()),
        };
        if let Err(err) = result {
            failures.push(format!("{kind} '{}': {err}", resource.id));
            continue;
        }
        let key = resource_key(&resource.ns, kind, &resource.id);
        if let Err(err) = ctx.kv.delete(&key).await {
            failures.push(format!("{kind} '{}' (record): {err}", resource.id));
        }
    }
}

/// Read one shared resource; absence is a precondition error.
pub async fn get_shared(
    ctx: &Context,
    ns: &str,
    kind: ResourceKind,
    id: &str,
) -> Result<SharedResourceInfo> {
    let key = resource_key(ns, kind, id);
    read_or_reset(ctx.kv.as_ref(), &key)
        .await?
        .ok_or_else(|| Error::precondition(format!("{kind} '{id}' not found in ns '{ns}'")))
}

/// Delete one shared resource. Refused while `associated` is non-empty,
/// unless `force`.
pub async fn delete_shared(
    ctx: &Context,
    ns: &str,
    kind: ResourceKind,
    id: &str,
    force: bool,
) -> Result<()> {
    let resource = get_shared(ctx, ns, kind, id).await?;
    if !resource.associated.is_empty() && !force {
        return Err(Error::precondition(format!(
            "{kind} '{id}' still has {} associated resource(s)",
            resource.associated.len()
        )));
    }
    let result = match kind {
        ResourceKind::VNet => {
            ctx.spider
                .delete_vpc(&resource.connection_name, &resource.csp_resource_name)
                .await
        }
        ResourceKind::SshKey => {
            ctx.spider
                .delete_keypair(&resource.connection_name, &resource.csp_resource_name)
                .await
        }
        ResourceKind::SecurityGroup => {
            ctx.spider
                .delete_security_group(&resource.connection_name, &resource.csp_resource_name)
                .await
        }
        // subnets disappear with their vNet; other kinds have no CSP side
        _ => Ok(()),
    };
    match result {
        Ok(()) => {}
        Err(err) if force => log::warn!("forced delete of {kind} '{id}': csp said {err}"),
        Err(err) => return Err(err.into()),
    }
    ctx.kv.delete(&resource_key(ns, kind, id)).await?;
    Ok(())
}

/// Add a back-reference to a resource record's `associated` set.
///
/// At-least-once and idempotent: the set add is a no-op when the reference
/// is already present, and the record is only rewritten when it changed.
pub async fn add_association(
    ctx: &Context,
    ns: &str,
    kind: ResourceKind,
    id: &str,
    referencer_key: &str,
) -> Result<()> {
    update_association(ctx, ns, kind, id, referencer_key, true).await
}

/// Remove a back-reference from a resource record's `associated` set.
pub async fn remove_association(
    ctx: &Context,
    ns: &str,
    kind: ResourceKind,
    id: &str,
    referencer_key: &str,
) -> Result<()> {
    update_association(ctx, ns, kind, id, referencer_key, false).await
}

async fn update_association(
    ctx: &Context,
    ns: &str,
    kind: ResourceKind,
    id: &str,
    referencer_key: &str,
    add: bool,
) -> Result<()> {
    // catalog entries referenced by common id usually live in the system
    // namespace; the back-reference belongs on the record that resolved
    let mut candidates = vec![ns.to_string()];
    if matches!(kind, ResourceKind::Image | ResourceKind::Spec) && ns != ctx.settings.system_ns {
        candidates.push(ctx.settings.system_ns.clone());
    }

    for candidate_ns in candidates {
        let key = resource_key(&candidate_ns, kind, id);
        if let Some(record) = read_or_reset::<Value>(ctx.kv.as_ref(), &key).await? {
            return apply_association(ctx, &key, record, referencer_key, add).await;
        }
    }
    log::warn!("association update on missing {kind} '{id}' (ns '{ns}')");
    Ok(())
}

async fn apply_association(
    ctx: &Context,
    key: &str,
    mut record: Value,
    referencer_key: &str,
    add: bool,
) -> Result<()> {
    let mut set: BTreeSet<String> = record
        .get("associated")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let changed = if add {
        set.insert(referencer_key.to_string())
    } else {
        set.remove(referencer_key)
    };
    if !changed {
        return Ok(());
    }

    let object = record.as_object_mut().ok_or_else(|| Error::CorruptedState {
        key: key.to_string(),
    })?;
    if set.is_empty() {
        object.remove("associated");
    } else {
        object.insert(
            "associated".to_string(),
            Value::Array(set.into_iter().map(Value::String).collect()),
        );
    }
    put_record(ctx.kv.as_ref(), key, &record).await?;
    Ok(())
}
