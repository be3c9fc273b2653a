//! MCI creation pipeline and status derivation.
//!
//! The dynamic create path: validate, claim the name, (optionally hold),
//! reserve shared resources, materialize VM objects, fan the creates
//! out, reconcile, apply the partial-failure policy, run post-create hooks.
//! The batch never aborts on the first VM error; policy decides what
//! happens to the survivors.

use std::collections::{BTreeMap, BTreeSet};

use mci_api_types::{
    mci_key, shared_resource_id, subgroup_key, verify_label, ActionType,
    FailurePolicy, ImageInfo, MciCreationErrors, MciDynamicReq, MciInfo, McisOption, SpecInfo,
    SubGroupInfo, TargetStatus, VmCreationError, VmCreationPhase, VmDynamicReq, VmInfo, VmStatus,
};
use mci_kvstore::{create_record, put_record, KvStore as _};

use crate::error::{Error, Result};
use crate::fanout::{scatter, MAX_CONCURRENCY};
use crate::hold::HoldDecision;
use crate::provision_log::{self, ProvisionEvent};
use crate::vm_lifecycle::{
    create_vm_object, list_vms, provision_vm, reconcile_vm_status, update_vm_info,
};
use crate::{catalog, epoch_now, mci_action, read_or_reset, shared_resource, Context};

/// One validated sub-group of the request.
struct SubGroupPlan {
    req: VmDynamicReq,
    size: u32,
    spec: SpecInfo,
    image: ImageInfo,
    connection_name: String,
}

impl SubGroupPlan {
    fn vm_ids(&self) -> Vec<String> {
        if self.size == 1 {
            vec![self.req.name.clone()]
        } else {
            (1..=self.size)
                .map(|i| format!("{}-{i}", self.req.name))
                .collect()
        }
    }
}

/// Validate a dynamic request and resolve its catalog references.
async fn plan_subgroups(
    ctx: &Context,
    ns: &str,
    req: &MciDynamicReq,
) -> Result<Vec<SubGroupPlan>> {
    verify_label(ns).map_err(|err| Error::validation(format!("invalid ns: {err}")))?;
    verify_label(&req.name).map_err(|err| Error::validation(format!("invalid mci name: {err}")))?;
    if req.vm.is_empty() {
        return Err(Error::validation("request contains no vm sub-groups"));
    }

    let mut seen = BTreeSet::new();
    let mut plans = Vec::with_capacity(req.vm.len());
    for vm_req in &req.vm {
        verify_label(&vm_req.name)
            .map_err(|err| Error::validation(format!("invalid vm name: {err}")))?;
        if !seen.insert(vm_req.name.clone()) {
            return Err(Error::validation(format!(
                "duplicate vm name '{}' in request",
                vm_req.name
            )));
        }

        let size = vm_req
            .group_size()
            .map_err(|err| Error::validation(err.to_string()))?;
        let spec = catalog::get_spec(ctx, ns, &vm_req.common_spec).await?;
        let image = catalog::get_image(ctx, ns, &vm_req.common_image).await?;
        let connection_name = vm_req
            .connection_name
            .clone()
            .unwrap_or_else(|| spec.connection_name.clone());
        if connection_name.is_empty() {
            return Err(Error::validation(format!(
                "spec '{}' does not resolve to a connection",
                spec.id
            )));
        }

        if ctx.settings.risk_gating {
            let analysis =
                provision_log::analyze(ctx, &spec.id, &image.csp_image_name).await?;
            if analysis.overall_risk.level == mci_api_types::RiskLevel::High {
                return Err(Error::validation(format!(
                    "provisioning risk for spec '{}' with image '{}' is high: {}",
                    spec.id, image.csp_image_name, analysis.overall_risk.reason
                )));
            }
        }

        plans.push(SubGroupPlan {
            req: vm_req.clone(),
            size,
            spec,
            image,
            connection_name,
        });
    }
    Ok(plans)
}

/// Create an MCI from a declarative request.
pub async fn create_mci_dynamic(
    ctx: &Context,
    ns: &str,
    req: &MciDynamicReq,
    option: McisOption,
) -> Result<MciInfo> {
    let plans = plan_subgroups(ctx, ns, req).await?;
    let total_vm_count: u32 = plans.iter().map(|p| p.size).sum();
    let key = mci_key(ns, &req.name);

    let mut mci = MciInfo {
        id: req.name.clone(),
        uid: mci_api_types::new_uid(),
        name: req.name.clone(),
        ns: ns.to_string(),
        description: req.description.clone(),
        status: VmStatus::Preparing.to_string(),
        target_status: TargetStatus::Running,
        target_action: ActionType::Create,
        install_mon_agent: req.install_mon_agent,
        post_command: req.post_command.clone(),
        system_label: req.system_label.clone(),
        label: req.label.clone(),
        policy_on_partial_failure: req.policy_on_partial_failure,
        created_time: epoch_now(),
        ..Default::default()
    };
    if !create_record(ctx.kv.as_ref(), &key, &mci).await? {
        return Err(Error::precondition(format!(
            "mci '{}' already exists in ns '{ns}'",
            req.name
        )));
    }

    if option == McisOption::Hold {
        match ctx.holds.wait(&key).await {
            HoldDecision::Continue => log::info!("mci '{}' released, continuing", req.name),
            HoldDecision::Withdraw => {
                ctx.kv.delete(&key).await?;
                return Err(Error::precondition(format!(
                    "creation of mci '{}' was withdrawn",
                    req.name
                )));
            }
        }
    }

    // reserve the defaults of every referenced connection
    let connections: BTreeSet<String> =
        plans.iter().map(|p| p.connection_name.clone()).collect();
    if let Err((err, created)) =
        shared_resource::prepare_for_connections(ctx, ns, &connections, true).await
    {
        let err = match shared_resource::rollback(ctx, &created).await {
            Ok(()) => err,
            Err(rollback_err) => Error::SharedResource(format!("{err}; {rollback_err}")),
        };
        ctx.kv.delete(&key).await?;
        return Err(err);
    }

    // sub-group records and VM objects
    let mut vm_protos: Vec<(usize, VmInfo)> = Vec::with_capacity(total_vm_count as usize);
    for (plan_index, plan) in plans.iter().enumerate() {
        let subgroup = SubGroupInfo {
            id: plan.req.name.clone(),
            ns: ns.to_string(),
            mci_id: mci.id.clone(),
            size: plan.size,
            vm_ids: plan.vm_ids(),
        };
        put_record(
            ctx.kv.as_ref(),
            &subgroup_key(ns, &mci.id, &subgroup.id),
            &subgroup,
        )
        .await?;

        let shared_id = shared_resource_id(ns, &plan.connection_name);
        for vm_id in plan.vm_ids() {
            vm_protos.push((
                plan_index,
                VmInfo {
                    id: vm_id.clone(),
                    name: vm_id,
                    sub_group_id: Some(plan.req.name.clone()),
                    mci_id: mci.id.clone(),
                    ns: ns.to_string(),
                    connection_name: plan.connection_name.clone(),
                    spec_id: plan.spec.id.clone(),
                    image_id: plan.image.id.clone(),
                    v_net_id: shared_id.clone(),
                    subnet_id: shared_id.clone(),
                    security_group_ids: vec![shared_id.clone()],
                    ssh_key_id: shared_id.clone(),
                    root_disk_type: plan.req.root_disk_type.clone(),
                    root_disk_size: plan.req.root_disk_size.clone(),
                    label: plan.req.label.clone(),
                    description: plan.req.description.clone(),
                    ..Default::default()
                },
            ));
        }
    }

    let mut object_errors = Vec::new();
    let mut prepared: Vec<(usize, VmInfo)> = Vec::new();
    let object_results = scatter(vm_protos, MAX_CONCURRENCY, |_, (plan_index, vm)| async move {
        let name = vm.name.clone();
        (plan_index, name, create_vm_object(ctx, vm).await)
    })
    .await;
    for (plan_index, name, result) in object_results {
        match result {
            Ok(vm) => prepared.push((plan_index, vm)),
            Err(err) => object_errors.push(VmCreationError {
                vm_name: name,
                phase: VmCreationPhase::ObjectCreation,
                error: err.to_string(),
                timestamp: epoch_now(),
            }),
        }
    }

    // fan the creates out, softly staggered against CSP rate limits
    let plans_ref = &plans;
    let create_results = scatter(prepared, MAX_CONCURRENCY, |index, (plan_index, mut vm)| {
        async move {
            let stagger = ctx.pacing.stagger_delay(index);
            if !stagger.is_zero() {
                tokio::time::sleep(stagger).await;
            }
            let plan = &plans_ref[plan_index];
            let result = provision_vm(ctx, &mut vm).await;
            if let Err(err) = &result {
                // failures before the CSP call also leave the VM as Failed
                if vm.status != VmStatus::Failed {
                    vm.status = VmStatus::Failed;
                    vm.system_message = err.to_string();
                    if let Err(write_err) = update_vm_info(ctx, &vm).await {
                        log::warn!("failed to persist failure of vm '{}': {write_err}", vm.id);
                    }
                }
            }

            let event = ProvisionEvent {
                csp_image_name: &plan.image.csp_image_name,
                is_success: result.is_ok(),
                error_message: result.as_ref().err().map(|_| vm.system_message.as_str()),
                vm_name: Some(&vm.name),
                mci_id: Some(&vm.mci_id),
                timestamp: epoch_now(),
            };
            if let Err(err) = provision_log::record(ctx, &plan.spec, event).await {
                log::warn!("failed to record provisioning history: {err}");
            }
            (vm, result)
        }
    })
    .await;

    let mut creation_errors = Vec::new();
    for (vm, result) in &create_results {
        if let Err(err) = result {
            creation_errors.push(VmCreationError {
                vm_name: vm.name.clone(),
                phase: VmCreationPhase::VmCreation,
                error: err.to_string(),
                timestamp: epoch_now(),
            });
        }
    }

    let failed_vm_count = object_errors.len() + creation_errors.len();
    let errors = MciCreationErrors {
        vm_object_creation_errors: object_errors,
        vm_creation_errors: creation_errors,
        total_vm_count: total_vm_count as usize,
        successful_vm_count: total_vm_count as usize - failed_vm_count,
        failed_vm_count,
        failure_handling_strategy: req.policy_on_partial_failure,
    };

    if errors.any() {
        match req.policy_on_partial_failure {
            FailurePolicy::Continue => {
                mci.creation_errors = Some(errors.clone());
            }
            FailurePolicy::Rollback => {
                log::warn!(
                    "rolling back mci '{}': {} of {} VMs failed",
                    mci.id,
                    errors.failed_vm_count,
                    errors.total_vm_count
                );
                mci_action::del_mci(ctx, ns, &mci.id, McisOption::Force).await?;
                return Err(Error::VmCreation { errors });
            }
            FailurePolicy::Refine => {
                mci.creation_errors = Some(errors.clone());
                refresh_mci_record(ctx, &mut mci).await?;
                mci_action::handle_mci_action(ctx, ns, &mci.id, ActionType::Refine, false)
                    .await?;
            }
        }
    }

    refresh_mci_record(ctx, &mut mci).await?;
    run_post_create_hooks(ctx, ns, &mci.id).await;
    get_mci(ctx, ns, &req.name).await
}

/// Re-derive the aggregate status/target fields and persist the record.
async fn refresh_mci_record(ctx: &Context, mci: &mut MciInfo) -> Result<()> {
    let vms = list_vms(ctx, &mci.ns, &mci.id).await?;
    let statuses: Vec<VmStatus> = vms.iter().map(|vm| vm.status).collect();
    mci.status = derive_mci_status(&statuses);

    let settled = !vms.is_empty()
        && vms.iter().all(|vm| {
            vm.target_status == TargetStatus::Complete || vm.status == VmStatus::Terminated
        });
    if settled {
        mci.target_status = TargetStatus::Complete;
        mci.target_action = ActionType::Complete;
    }

    let record = MciInfo {
        vms: Vec::new(),
        ..mci.clone()
    };
    put_record(ctx.kv.as_ref(), &mci_key(&mci.ns, &mci.id), &record).await?;
    Ok(())
}

/// Monitoring-agent installation and post-commands, best effort.
async fn run_post_create_hooks(ctx: &Context, ns: &str, mci_id: &str) {
    let mci = match get_mci(ctx, ns, mci_id).await {
        Ok(mci) => mci,
        Err(err) => {
            log::warn!("skipping post-create hooks for '{mci_id}': {err}");
            return;
        }
    };
    let running = mci
        .vms
        .iter()
        .filter(|vm| vm.status == VmStatus::Running)
        .count();
    if running == 0 {
        return;
    }

    if mci.install_mon_agent {
        let wait = ctx.pacing.mon_agent_wait(mci.vms.len());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        if let Err(err) = ctx.hooks.install_mon_agent(&mci) {
            log::warn!("monitoring agent installation on '{mci_id}' failed: {err}");
        }
    }

    if let Some(command) = &mci.post_command {
        if !ctx.pacing.post_command_settle.is_zero() {
            tokio::time::sleep(ctx.pacing.post_command_settle).await;
        }
        if let Err(err) = ctx.hooks.run_post_command(&mci, command) {
            log::warn!("post-command on '{mci_id}' failed: {err}");
        }
    }
}

/// Derive the aggregate MCI status from the multiset of VM statuses.
///
/// Deterministic and idempotent: the result depends only on the counts.
pub fn derive_mci_status(statuses: &[VmStatus]) -> String {
    let n = statuses.len();
    if n == 0 {
        return String::new();
    }
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for status in statuses {
        *counts.entry(status.to_string()).or_default() += 1;
    }
    let running = statuses.iter().filter(|s| **s == VmStatus::Running).count();
    let failed = statuses.iter().filter(|s| **s == VmStatus::Failed).count();

    if failed == n {
        return format!("Failed:{failed} (R:{running}/{n})");
    }
    if failed > 0 {
        return format!("Partial-Failed:{failed} (R:{running}/{n})");
    }

    // dominant status; ties break towards the lexicographically first name
    let (dominant, &count) = counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
        .expect("non-empty");
    if count == n {
        format!("{dominant}:{n} (R:{running}/{n})")
    } else {
        format!("Partial-{dominant}:{count} (R:{running}/{n})")
    }
}

/// Compose an MCI with its VMs and freshly derived status.
pub async fn get_mci(ctx: &Context, ns: &str, mci_id: &str) -> Result<MciInfo> {
    let key = mci_key(ns, mci_id);
    let mut mci: MciInfo = read_or_reset(ctx.kv.as_ref(), &key)
        .await?
        .ok_or_else(|| Error::precondition(format!("mci '{mci_id}' not found in ns '{ns}'")))?;

    let vms = list_vms(ctx, ns, mci_id).await?;
    let statuses: Vec<VmStatus> = vms.iter().map(|vm| vm.status).collect();
    mci.status = derive_mci_status(&statuses);
    mci.vms = vms;
    Ok(mci)
}

/// Reconcile every VM against the CSP abstraction, then compose the MCI.
pub async fn get_mci_status(ctx: &Context, ns: &str, mci_id: &str) -> Result<MciInfo> {
    let vms = list_vms(ctx, ns, mci_id).await?;
    scatter(vms, MAX_CONCURRENCY, |_, mut vm| async move {
        if let Err(err) = reconcile_vm_status(ctx, &mut vm).await {
            log::warn!("status reconciliation for vm '{}' failed: {err}", vm.id);
        }
    })
    .await;

    let mut mci = get_mci(ctx, ns, mci_id).await?;
    refresh_mci_record(ctx, &mut mci).await?;
    Ok(mci)
}

/// All MCIs of a namespace.
pub async fn list_mci(ctx: &Context, ns: &str) -> Result<Vec<MciInfo>> {
    let prefix = format!("/ns/{ns}/mci/");
    let pairs = ctx.kv.list(&prefix).await?;

    let mut out = Vec::new();
    for pair in pairs {
        let rest = &pair.key[prefix.len()..];
        if rest.is_empty() || rest.contains('/') {
            continue;
        }
        match serde_json::from_str::<MciInfo>(&pair.value) {
            Ok(mci) => out.push(mci),
            Err(err) => {
                log::warn!("removing corrupted mci record at '{}': {err}", pair.key);
                ctx.kv.delete(&pair.key).await?;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_running() {
        let statuses = vec![VmStatus::Running; 3];
        assert_eq!(derive_mci_status(&statuses), "Running:3 (R:3/3)");
    }

    #[test]
    fn partial_failure_overrides_dominant() {
        let statuses = vec![VmStatus::Running, VmStatus::Running, VmStatus::Failed];
        assert_eq!(derive_mci_status(&statuses), "Partial-Failed:1 (R:2/3)");
    }

    #[test]
    fn total_failure() {
        let statuses = vec![VmStatus::Failed, VmStatus::Failed];
        assert_eq!(derive_mci_status(&statuses), "Failed:2 (R:0/2)");
    }

    #[test]
    fn mixed_without_failure_is_partial_dominant() {
        let statuses = vec![
            VmStatus::Running,
            VmStatus::Running,
            VmStatus::Suspended,
        ];
        assert_eq!(derive_mci_status(&statuses), "Partial-Running:2 (R:2/3)");
    }

    #[test]
    fn derivation_is_deterministic_and_order_free() {
        let a = vec![VmStatus::Running, VmStatus::Suspended, VmStatus::Running];
        let b = vec![VmStatus::Suspended, VmStatus::Running, VmStatus::Running];
        assert_eq!(derive_mci_status(&a), derive_mci_status(&b));
        assert_eq!(derive_mci_status(&a), derive_mci_status(&a));
    }

    #[test]
    fn empty_is_empty() {
        assert_eq!(derive_mci_status(&[]), "");
    }
}
