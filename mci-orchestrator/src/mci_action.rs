//! Lifecycle actions on whole MCIs, and deletion.

use mci_api_types::{
    mci_descendant_prefix, mci_key, ActionType, McisOption, MciInfo, TargetStatus, VmStatus,
};
use mci_kvstore::{put_record, KvStore as _};

use crate::error::{Error, Result};
use crate::fanout::{scatter, MAX_CONCURRENCY};
use crate::hold::HoldDecision;
use crate::vm_lifecycle::{control_vm, delete_vm, list_vms};
use crate::{mci, read_or_reset, Context};

/// Whether `action` makes sense for a VM currently in `status`.
/// VMs outside the set are skipped, not failed; the reconciler's
/// target-action upgrades absorb the in-between states.
fn controllable(status: VmStatus, action: ActionType) -> bool {
    match action {
        ActionType::Suspend => matches!(status, VmStatus::Running | VmStatus::Resuming),
        ActionType::Resume => matches!(status, VmStatus::Suspended | VmStatus::Suspending),
        ActionType::Reboot => matches!(status, VmStatus::Running | VmStatus::Suspended),
        ActionType::Terminate => !matches!(
            status,
            VmStatus::Terminated | VmStatus::Terminating
        ),
        _ => false,
    }
}

/// Apply a lifecycle action to an MCI.
///
/// `refine` removes only the Failed/Undefined VMs; `continue`/`withdraw`
/// resolve a held creation; the rest fan out over the member VMs.
pub async fn handle_mci_action(
    ctx: &Context,
    ns: &str,
    mci_id: &str,
    action: ActionType,
    force: bool,
) -> Result<String> {
    let key = mci_key(ns, mci_id);

    match action {
        ActionType::Refine => {}
        ActionType::Suspend
        | ActionType::Resume
        | ActionType::Reboot
        | ActionType::Terminate => {}
        ActionType::None | ActionType::Create | ActionType::Complete => {
            return Err(Error::validation(format!(
                "'{action}' is not an mci action"
            )))
        }
    }

    let mut record: MciInfo = read_or_reset(ctx.kv.as_ref(), &key)
        .await?
        .ok_or_else(|| Error::precondition(format!("mci '{mci_id}' not found in ns '{ns}'")))?;

    if action == ActionType::Refine {
        return refine_mci(ctx, ns, mci_id, &mut record).await;
    }

    if !force && record.target_action != ActionType::Complete && record.target_action != ActionType::None
    {
        return Err(Error::precondition(format!(
            "mci '{mci_id}' has action '{}' in flight; wait for completion or force",
            record.target_action
        )));
    }

    record.target_action = action;
    record.target_status = action.target_status();
    put_record(ctx.kv.as_ref(), &key, &record).await?;

    let vms = list_vms(ctx, ns, mci_id).await?;
    let results = scatter(vms, MAX_CONCURRENCY, |_, mut vm| async move {
        if !controllable(vm.status, action) {
            log::debug!(
                "skipping {action} on vm '{}' in status {}",
                vm.id,
                vm.status
            );
            return (vm.id, Ok(false));
        }
        match control_vm(ctx, &mut vm, action).await {
            Ok(()) => (vm.id, Ok(true)),
            Err(err) => (vm.id, Err(err)),
        }
    })
    .await;

    let mut acted = 0usize;
    let mut failures = Vec::new();
    for (vm_id, result) in results {
        match result {
            Ok(true) => acted += 1,
            Ok(false) => {}
            Err(err) => failures.push(format!("{vm_id}: {err}")),
        }
    }

    mci::get_mci_status(ctx, ns, mci_id).await?;

    if failures.is_empty() {
        Ok(format!("{action} applied to {acted} vm(s) of '{mci_id}'"))
    } else {
        Err(Error::precondition(format!(
            "{action} on '{mci_id}' failed for {} of {} vm(s): {}",
            failures.len(),
            acted + failures.len(),
            failures.join("; ")
        )))
    }
}

/// Delete only the Failed/Undefined VMs, keeping the healthy ones.
async fn refine_mci(
    ctx: &Context,
    ns: &str,
    mci_id: &str,
    record: &mut MciInfo,
) -> Result<String> {
    let vms = list_vms(ctx, ns, mci_id).await?;
    let mut removed = 0usize;
    for vm in &vms {
        if matches!(vm.status, VmStatus::Failed | VmStatus::Undefined) {
            log::info!("refine: removing vm '{}' in status {}", vm.id, vm.status);
            delete_vm(ctx, vm).await?;
            removed += 1;
        }
    }

    let remaining = list_vms(ctx, ns, mci_id).await?;
    let statuses: Vec<VmStatus> = remaining.iter().map(|vm| vm.status).collect();
    record.status = mci::derive_mci_status(&statuses);
    if remaining
        .iter()
        .all(|vm| vm.target_status == TargetStatus::Complete || vm.status == VmStatus::Terminated)
    {
        record.target_status = TargetStatus::Complete;
        record.target_action = ActionType::Complete;
    }
    put_record(ctx.kv.as_ref(), &mci_key(ns, mci_id), record).await?;

    Ok(format!("refine removed {removed} vm(s) from '{mci_id}'"))
}

/// Resolve a held creation from outside.
pub fn decide_hold(ctx: &Context, ns: &str, mci_id: &str, decision: HoldDecision) -> Result<()> {
    ctx.holds.decide(&mci_key(ns, mci_id), decision)
}

/// Delete an MCI and everything under it.
///
/// Refused unless every VM is Terminated/Undefined/Failed, `option=force`,
/// or `option=terminate` (which refines, terminates, settles, then deletes).
pub async fn del_mci(ctx: &Context, ns: &str, mci_id: &str, option: McisOption) -> Result<()> {
    let key = mci_key(ns, mci_id);
    let record: Option<MciInfo> = read_or_reset(ctx.kv.as_ref(), &key).await?;
    if record.is_none() {
        return Err(Error::precondition(format!(
            "mci '{mci_id}' not found in ns '{ns}'"
        )));
    }

    let vms = list_vms(ctx, ns, mci_id).await?;
    let all_deletable = vms.iter().all(|vm| vm.status.is_deletable());

    match option {
        McisOption::Force => {
            // best-effort terminate of anything still alive on the CSP side
            for vm in &vms {
                if !vm.csp_resource_name.is_empty() && !vm.status.is_deletable() {
                    if let Err(err) = ctx
                        .spider
                        .terminate_vm(&vm.connection_name, &vm.csp_resource_name)
                        .await
                    {
                        log::warn!("forced delete: terminate of vm '{}' failed: {err}", vm.id);
                    }
                }
            }
        }
        McisOption::Terminate if !all_deletable => {
            handle_mci_action(ctx, ns, mci_id, ActionType::Refine, false).await?;
            handle_mci_action(ctx, ns, mci_id, ActionType::Terminate, false).await?;
            if !ctx.pacing.terminate_settle.is_zero() {
                tokio::time::sleep(ctx.pacing.terminate_settle).await;
            }
        }
        McisOption::Terminate => {}
        _ if all_deletable => {}
        _ => {
            return Err(Error::precondition(format!(
                "mci '{mci_id}' has non-terminated VMs; terminate first or use force/terminate"
            )))
        }
    }

    // remove VMs first so every back-reference is decremented
    for vm in list_vms(ctx, ns, mci_id).await? {
        delete_vm(ctx, &vm).await?;
    }

    // sub-groups and any remaining descendants
    let prefix = mci_descendant_prefix(ns, mci_id);
    for pair in ctx.kv.list(&prefix).await? {
        ctx.kv.delete(&pair.key).await?;
    }
    ctx.kv.delete(&key).await?;
    log::info!("deleted mci '{mci_id}' from ns '{ns}'");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controllable_matrix() {
        assert!(controllable(VmStatus::Running, ActionType::Suspend));
        assert!(!controllable(VmStatus::Suspended, ActionType::Suspend));
        assert!(controllable(VmStatus::Suspended, ActionType::Resume));
        assert!(controllable(VmStatus::Running, ActionType::Terminate));
        assert!(controllable(VmStatus::Failed, ActionType::Terminate));
        assert!(!controllable(VmStatus::Terminated, ActionType::Terminate));
        assert!(!controllable(VmStatus::Running, ActionType::Refine));
    }
}
