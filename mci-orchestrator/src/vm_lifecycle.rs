//! Per-VM state machine and status reconciliation.
//!
//! A VM object is created in `Preparing`, flips to `Prepared` once the
//! defaults of its connection are reserved, moves to `Creating` when the
//! create call goes out, and from there follows the native status reported
//! by the CSP abstraction. Within a single orchestrator call the status
//! writes of a VM are monotonic; concurrent callers of other actions must
//! first observe `targetAction == Complete`.

use mci_api_types::{
    csp_resource_name, new_uid, vm_id_from_descendant, vm_key, ActionType, ResourceKind,
    TargetStatus, VmInfo, VmStatus,
};
use mci_kvstore::{put_record, KvStore as _};
use mci_spider_client::{VmControlAction, VmReqInfo};

use crate::error::{Error, Result};
use crate::shared_resource::{add_association, get_shared, remove_association};
use crate::{catalog, epoch_now, read_or_reset, Context};

/// Read one VM record.
pub async fn get_vm(ctx: &Context, ns: &str, mci_id: &str, vm_id: &str) -> Result<VmInfo> {
    let key = vm_key(ns, mci_id, vm_id);
    read_or_reset(ctx.kv.as_ref(), &key)
        .await?
        .ok_or_else(|| Error::precondition(format!("vm '{vm_id}' not found in mci '{mci_id}'")))
}

/// All VMs of an MCI, in lexicographic id order (the scan order).
pub async fn list_vms(ctx: &Context, ns: &str, mci_id: &str) -> Result<Vec<VmInfo>> {
    let prefix = mci_api_types::mci_descendant_prefix(ns, mci_id);
    let pairs = ctx.kv.list(&prefix).await?;

    let mut vms = Vec::new();
    for pair in pairs {
        if vm_id_from_descendant(&prefix, &pair.key).is_none() {
            continue;
        }
        match serde_json::from_str::<VmInfo>(&pair.value) {
            Ok(vm) => vms.push(vm),
            Err(err) => {
                log::warn!("removing corrupted vm record at '{}': {err}", pair.key);
                ctx.kv.delete(&pair.key).await?;
            }
        }
    }
    Ok(vms)
}

/// Persist a VM record, writing only when the stored value differs. This
/// keeps repeated reconciliations from churning the store and waking
/// watchers for nothing.
pub async fn update_vm_info(ctx: &Context, vm: &VmInfo) -> Result<()> {
    let key = vm_key(&vm.ns, &vm.mci_id, &vm.id);
    let encoded = serde_json::to_string(vm)?;
    if ctx.kv.get(&key).await?.as_deref() == Some(encoded.as_str()) {
        return Ok(());
    }
    ctx.kv.put(&key, &encoded).await?;
    Ok(())
}

/// Materialize a VM object: referential checks, then a `Preparing` record
/// that flips to `Prepared` (the caller reserves shared resources first).
pub async fn create_vm_object(ctx: &Context, mut vm: VmInfo) -> Result<VmInfo> {
    catalog::get_spec(ctx, &vm.ns, &vm.spec_id).await?;
    catalog::get_image(ctx, &vm.ns, &vm.image_id).await?;

    get_shared(ctx, &vm.ns, ResourceKind::VNet, &vm.v_net_id).await?;
    get_shared(ctx, &vm.ns, ResourceKind::Subnet, &vm.subnet_id).await?;
    get_shared(ctx, &vm.ns, ResourceKind::SshKey, &vm.ssh_key_id).await?;
    for sg in &vm.security_group_ids {
        get_shared(ctx, &vm.ns, ResourceKind::SecurityGroup, sg).await?;
    }

    vm.uid = new_uid();
    vm.status = VmStatus::Preparing;
    vm.target_status = TargetStatus::None;
    vm.target_action = ActionType::None;

    let key = vm_key(&vm.ns, &vm.mci_id, &vm.id);
    if !mci_kvstore::create_record(ctx.kv.as_ref(), &key, &vm).await? {
        return Err(Error::precondition(format!(
            "vm '{}' already exists in mci '{}'",
            vm.id, vm.mci_id
        )));
    }

    vm.status = VmStatus::Prepared;
    update_vm_info(ctx, &vm).await?;
    Ok(vm)
}

/// Back-references a VM holds into resource records.
fn associations(vm: &VmInfo) -> Vec<(ResourceKind, String)> {
    let mut refs = vec![(ResourceKind::Image, vm.image_id.clone())];
    for (kind, id) in [
        (ResourceKind::VNet, &vm.v_net_id),
        (ResourceKind::Subnet, &vm.subnet_id),
        (ResourceKind::SshKey, &vm.ssh_key_id),
    ] {
        if !id.is_empty() {
            refs.push((kind, id.clone()));
        }
    }
    for sg in &vm.security_group_ids {
        refs.push((ResourceKind::SecurityGroup, sg.clone()));
    }
    for disk in &vm.data_disk_ids {
        refs.push((ResourceKind::DataDisk, disk.clone()));
    }
    refs
}

/// Issue the CSP-side create for a prepared VM and reconcile its status.
///
/// On failure the VM moves to `Failed` with the cause in `systemMessage`,
/// and the error is returned for policy handling.
pub async fn provision_vm(ctx: &Context, vm: &mut VmInfo) -> Result<()> {
    let spec = catalog::get_spec(ctx, &vm.ns, &vm.spec_id).await?;
    let image = catalog::get_image(ctx, &vm.ns, &vm.image_id).await?;

    let vnet = get_shared(ctx, &vm.ns, ResourceKind::VNet, &vm.v_net_id).await?;
    let subnet = get_shared(ctx, &vm.ns, ResourceKind::Subnet, &vm.subnet_id).await?;
    let ssh_key = get_shared(ctx, &vm.ns, ResourceKind::SshKey, &vm.ssh_key_id).await?;
    let mut sg_names = Vec::with_capacity(vm.security_group_ids.len());
    for sg in &vm.security_group_ids {
        sg_names.push(
            get_shared(ctx, &vm.ns, ResourceKind::SecurityGroup, sg)
                .await?
                .csp_resource_name,
        );
    }

    vm.csp_resource_name = csp_resource_name(&vm.connection_name, &vm.uid);
    vm.status = VmStatus::Creating;
    vm.target_status = TargetStatus::Running;
    vm.target_action = ActionType::Create;
    update_vm_info(ctx, vm).await?;

    let req = VmReqInfo {
        name: vm.csp_resource_name.clone(),
        image_name: image.csp_image_name.clone(),
        vpc_name: vnet.csp_resource_name,
        subnet_name: subnet.csp_resource_name,
        security_group_names: sg_names,
        key_pair_name: ssh_key.csp_resource_name,
        vm_spec_name: spec.csp_spec_name.clone(),
        root_disk_type: vm
            .root_disk_type
            .clone()
            .or(spec.root_disk_type)
            .unwrap_or_default(),
        root_disk_size: vm
            .root_disk_size
            .clone()
            .or(spec.root_disk_size)
            .unwrap_or_default(),
        data_disk_names: vm.data_disk_ids.clone(),
    };

    let created = match ctx.spider.create_vm(&vm.connection_name, req).await {
        Ok(info) => info,
        Err(err) => {
            vm.status = VmStatus::Failed;
            vm.system_message = err.to_string();
            update_vm_info(ctx, vm).await?;
            return Err(err.into());
        }
    };

    vm.csp_resource_id = created.iid.system_id.clone();
    vm.public_ip = created.public_ip.clone();
    vm.private_ip = created.private_ip.clone();
    vm.ssh_port = created.ssh_port();
    vm.created_time = epoch_now();
    update_vm_info(ctx, vm).await?;

    let key = vm_key(&vm.ns, &vm.mci_id, &vm.id);
    for (kind, id) in associations(vm) {
        add_association(ctx, &vm.ns, kind, &id, &key).await?;
    }

    reconcile_vm_status(ctx, vm).await?;
    Ok(())
}

/// Map a native status onto the target action in flight. A freshly issued
/// create may legitimately report nothing yet; a terminate may race the
/// suspend it interrupted.
pub fn adjust_for_target(status: VmStatus, target_action: ActionType) -> VmStatus {
    match target_action {
        ActionType::Create => match status {
            VmStatus::Undefined => VmStatus::Creating,
            s => s,
        },
        ActionType::Terminate => match status {
            VmStatus::Undefined => VmStatus::Terminated,
            VmStatus::Suspending => VmStatus::Terminating,
            s => s,
        },
        ActionType::Resume => match status {
            VmStatus::Undefined | VmStatus::Creating => VmStatus::Resuming,
            s => s,
        },
        ActionType::Reboot => match status {
            VmStatus::Suspending
            | VmStatus::Suspended
            | VmStatus::Creating
            | VmStatus::Resuming
            | VmStatus::Undefined => VmStatus::Rebooting,
            s => s,
        },
        _ => status,
    }
}

fn target_reached(status: VmStatus, target: TargetStatus) -> bool {
    matches!(
        (status, target),
        (VmStatus::Running, TargetStatus::Running)
            | (VmStatus::Suspended, TargetStatus::Suspended)
            | (VmStatus::Terminated, TargetStatus::Terminated)
    )
}

/// Fetch the native status, map it into the internal alphabet, and settle
/// the target bookkeeping. Once the target is reached the access info is
/// re-read, since the address may change across stop/start cycles.
pub async fn reconcile_vm_status(ctx: &Context, vm: &mut VmInfo) -> Result<()> {
    if vm.csp_resource_name.is_empty() {
        // never handed to the CSP; nothing to reconcile against
        return Ok(());
    }

    let native = match ctx
        .spider
        .get_vm_status(&vm.connection_name, &vm.csp_resource_name)
        .await
    {
        Ok(info) => info.status,
        Err(err) => {
            log::warn!("status read for vm '{}' failed: {err}", vm.id);
            String::new()
        }
    };

    vm.status = adjust_for_target(VmStatus::from_native(&native), vm.target_action);

    if target_reached(vm.status, vm.target_status) {
        vm.target_status = TargetStatus::Complete;
        vm.target_action = ActionType::Complete;

        if vm.status == VmStatus::Running {
            match ctx
                .spider
                .get_vm(&vm.connection_name, &vm.csp_resource_name)
                .await
            {
                Ok(info) => {
                    vm.public_ip = info.public_ip.clone();
                    vm.private_ip = info.private_ip.clone();
                    vm.ssh_port = info.ssh_port();
                }
                Err(err) => {
                    log::warn!("access info refresh for vm '{}' failed: {err}", vm.id)
                }
            }
        }
    }

    update_vm_info(ctx, vm).await?;
    Ok(())
}

/// Drive one VM through suspend/resume/reboot/terminate.
pub async fn control_vm(ctx: &Context, vm: &mut VmInfo, action: ActionType) -> Result<()> {
    if vm.status == VmStatus::Terminated && action != ActionType::Terminate {
        return Err(Error::precondition(format!(
            "vm '{}' is terminated and only accepts terminate/delete",
            vm.id
        )));
    }

    let (transitional, call) = match action {
        ActionType::Suspend => (VmStatus::Suspending, Some(VmControlAction::Suspend)),
        ActionType::Resume => (VmStatus::Resuming, Some(VmControlAction::Resume)),
        ActionType::Reboot => (VmStatus::Rebooting, Some(VmControlAction::Reboot)),
        ActionType::Terminate => (VmStatus::Terminating, None),
        other => {
            return Err(Error::validation(format!(
                "'{other}' is not a per-vm control action"
            )))
        }
    };

    vm.target_status = action.target_status();
    vm.target_action = action;
    vm.status = transitional;
    update_vm_info(ctx, vm).await?;

    let result = match call {
        Some(control) => {
            ctx.spider
                .control_vm(&vm.connection_name, &vm.csp_resource_name, control)
                .await
        }
        None => {
            ctx.spider
                .terminate_vm(&vm.connection_name, &vm.csp_resource_name)
                .await
        }
    };
    if let Err(err) = result {
        vm.status = VmStatus::Failed;
        vm.system_message = err.to_string();
        update_vm_info(ctx, vm).await?;
        return Err(err.into());
    }

    reconcile_vm_status(ctx, vm).await?;
    Ok(())
}

/// Remove a VM record and every back-reference it holds.
pub async fn delete_vm(ctx: &Context, vm: &VmInfo) -> Result<()> {
    let key = vm_key(&vm.ns, &vm.mci_id, &vm.id);
    for (kind, id) in associations(vm) {
        remove_association(ctx, &vm.ns, kind, &id, &key).await?;
    }
    ctx.kv.delete(&key).await?;
    Ok(())
}

/// Create a data disk on a connection and record it.
pub async fn create_data_disk(
    ctx: &Context,
    ns: &str,
    connection_name: &str,
    disk_id: &str,
    disk_type: &str,
    disk_size: &str,
) -> Result<mci_api_types::SharedResourceInfo> {
    mci_api_types::verify_label(disk_id)
        .map_err(|err| Error::validation(format!("invalid disk name: {err}")))?;

    let csp_name = csp_resource_name(connection_name, disk_id);
    let info = ctx
        .spider
        .create_disk(
            connection_name,
            mci_spider_client::DiskReqInfo {
                name: csp_name.clone(),
                disk_type: disk_type.to_string(),
                disk_size: disk_size.to_string(),
            },
        )
        .await?;

    let record = mci_api_types::SharedResourceInfo {
        kind: Some(ResourceKind::DataDisk),
        id: disk_id.to_string(),
        uid: new_uid(),
        ns: ns.to_string(),
        connection_name: connection_name.to_string(),
        csp_resource_id: info.iid.system_id,
        csp_resource_name: csp_name,
        created_time: crate::epoch_now(),
        ..Default::default()
    };
    let key = mci_api_types::resource_key(ns, ResourceKind::DataDisk, disk_id);
    if !mci_kvstore::create_record(ctx.kv.as_ref(), &key, &record).await? {
        return Err(Error::precondition(format!(
            "data disk '{disk_id}' already exists in ns '{ns}'"
        )));
    }
    Ok(record)
}

/// Attach a data disk to a running VM and cross-link the records.
pub async fn attach_data_disk(
    ctx: &Context,
    ns: &str,
    mci_id: &str,
    vm_id: &str,
    disk_id: &str,
) -> Result<VmInfo> {
    let mut vm = get_vm(ctx, ns, mci_id, vm_id).await?;
    let disk = get_shared(ctx, ns, ResourceKind::DataDisk, disk_id).await?;
    if disk.connection_name != vm.connection_name {
        return Err(Error::precondition(format!(
            "disk '{disk_id}' lives on connection '{}', vm '{vm_id}' on '{}'",
            disk.connection_name, vm.connection_name
        )));
    }

    ctx.spider
        .attach_disk(
            &vm.connection_name,
            &disk.csp_resource_name,
            &vm.csp_resource_name,
        )
        .await?;

    if !vm.data_disk_ids.iter().any(|id| id == disk_id) {
        vm.data_disk_ids.push(disk_id.to_string());
    }
    update_vm_info(ctx, &vm).await?;
    let key = vm_key(ns, mci_id, vm_id);
    add_association(ctx, ns, ResourceKind::DataDisk, disk_id, &key).await?;
    Ok(vm)
}

/// Detach a data disk from a VM and drop the cross-links.
pub async fn detach_data_disk(
    ctx: &Context,
    ns: &str,
    mci_id: &str,
    vm_id: &str,
    disk_id: &str,
) -> Result<VmInfo> {
    let mut vm = get_vm(ctx, ns, mci_id, vm_id).await?;
    let disk = get_shared(ctx, ns, ResourceKind::DataDisk, disk_id).await?;

    ctx.spider
        .detach_disk(
            &vm.connection_name,
            &disk.csp_resource_name,
            &vm.csp_resource_name,
        )
        .await?;

    vm.data_disk_ids.retain(|id| id != disk_id);
    update_vm_info(ctx, &vm).await?;
    let key = vm_key(ns, mci_id, vm_id);
    remove_association(ctx, ns, ResourceKind::DataDisk, disk_id, &key).await?;
    Ok(vm)
}

/// Fixed accessor table for the filterable VM fields.
pub fn vm_field_accessor(field: &str) -> Option<fn(&VmInfo) -> String> {
    Some(match field {
        "id" => |vm: &VmInfo| vm.id.clone(),
        "name" => |vm: &VmInfo| vm.name.clone(),
        "subGroupId" => |vm: &VmInfo| vm.sub_group_id.clone().unwrap_or_default(),
        "status" => |vm: &VmInfo| vm.status.to_string(),
        "targetStatus" => |vm: &VmInfo| vm.target_status.to_string(),
        "targetAction" => |vm: &VmInfo| vm.target_action.to_string(),
        "connectionName" => |vm: &VmInfo| vm.connection_name.clone(),
        "specId" => |vm: &VmInfo| vm.spec_id.clone(),
        "imageId" => |vm: &VmInfo| vm.image_id.clone(),
        "publicIp" => |vm: &VmInfo| vm.public_ip.clone(),
        "privateIp" => |vm: &VmInfo| vm.private_ip.clone(),
        "sshPort" => |vm: &VmInfo| vm.ssh_port.clone(),
        "cspResourceId" => |vm: &VmInfo| vm.csp_resource_id.clone(),
        "cspResourceName" => |vm: &VmInfo| vm.csp_resource_name.clone(),
        "monAgentStatus" => |vm: &VmInfo| vm.mon_agent_status.to_string(),
        _ => return None,
    })
}

/// VMs of an MCI whose `field` equals `value`.
pub async fn list_vm_by_filter(
    ctx: &Context,
    ns: &str,
    mci_id: &str,
    field: &str,
    value: &str,
) -> Result<Vec<VmInfo>> {
    let accessor = vm_field_accessor(field)
        .ok_or_else(|| Error::validation(format!("unknown vm filter field '{field}'")))?;
    let vms = list_vms(ctx, ns, mci_id).await?;
    Ok(vms.into_iter().filter(|vm| accessor(vm) == value).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_upgrades_undefined() {
        assert_eq!(
            adjust_for_target(VmStatus::Undefined, ActionType::Create),
            VmStatus::Creating
        );
        assert_eq!(
            adjust_for_target(VmStatus::Running, ActionType::Create),
            VmStatus::Running
        );
    }

    #[test]
    fn terminate_upgrades() {
        assert_eq!(
            adjust_for_target(VmStatus::Undefined, ActionType::Terminate),
            VmStatus::Terminated
        );
        assert_eq!(
            adjust_for_target(VmStatus::Suspending, ActionType::Terminate),
            VmStatus::Terminating
        );
    }

    #[test]
    fn resume_and_reboot_upgrades() {
        assert_eq!(
            adjust_for_target(VmStatus::Creating, ActionType::Resume),
            VmStatus::Resuming
        );
        for status in [
            VmStatus::Suspending,
            VmStatus::Suspended,
            VmStatus::Creating,
            VmStatus::Resuming,
            VmStatus::Undefined,
        ] {
            assert_eq!(
                adjust_for_target(status, ActionType::Reboot),
                VmStatus::Rebooting
            );
        }
        assert_eq!(
            adjust_for_target(VmStatus::Running, ActionType::Reboot),
            VmStatus::Running
        );
    }

    #[test]
    fn accessor_table_covers_filterable_fields() {
        let vm = VmInfo {
            id: "v-1".into(),
            name: "v-1".into(),
            sub_group_id: Some("v".into()),
            status: VmStatus::Running,
            public_ip: "3.3.3.3".into(),
            ..Default::default()
        };
        assert_eq!(vm_field_accessor("status").unwrap()(&vm), "Running");
        assert_eq!(vm_field_accessor("subGroupId").unwrap()(&vm), "v");
        assert_eq!(vm_field_accessor("publicIp").unwrap()(&vm), "3.3.3.3");
        assert!(vm_field_accessor("nonsense").is_none());
    }
}
