//! Pre-flight review of dynamic MCI requests.
//!
//! [`review_mci_dynamic`] is the gate UIs call before creation: it inspects
//! availability, cost and provisioning risk and aggregates recommendations,
//! without writing a single key. Creation re-runs the cheap parts of this
//! validation itself.

use std::collections::BTreeSet;

use mci_api_types::{
    verify_label, FailurePolicy, MciDynamicReq, ReviewReport, ReviewStatus, ReviewSummary,
    RiskLevel, VmReview,
};

use crate::error::Result;
use crate::provision_log;
use crate::{catalog, Context};

/// Review a dynamic MCI request. Pure with respect to the store.
pub async fn review_mci_dynamic(
    ctx: &Context,
    ns: &str,
    req: &MciDynamicReq,
) -> Result<ReviewReport> {
    let mut vm_reviews = Vec::with_capacity(req.vm.len());
    let mut total_vm_count = 0u32;

    let mut specs = BTreeSet::new();
    let mut images = BTreeSet::new();
    let mut connections = BTreeSet::new();
    let mut providers = BTreeSet::new();
    let mut regions = BTreeSet::new();
    let mut recommendations = Vec::new();
    let mut cost_known = true;
    let mut total_cost = 0.0f64;

    let mut seen_names = BTreeSet::new();

    for vm_req in &req.vm {
        let mut review = VmReview {
            name: vm_req.name.clone(),
            spec_id: vm_req.common_spec.clone(),
            image_id: vm_req.common_image.clone(),
            ..Default::default()
        };

        if let Err(err) = verify_label(&vm_req.name) {
            review.status = ReviewStatus::Error;
            review.messages.push(format!("invalid vm name: {err}"));
        }
        if !seen_names.insert(vm_req.name.clone()) {
            review.status = ReviewStatus::Error;
            review
                .messages
                .push(format!("duplicate vm name '{}'", vm_req.name));
        }

        match vm_req.group_size() {
            Ok(size) => {
                review.sub_group_size = size;
                total_vm_count += size;
            }
            Err(err) => {
                review.status = ReviewStatus::Error;
                review.messages.push(err.to_string());
            }
        }

        let spec = catalog::lookup_spec(ctx, ns, &vm_req.common_spec).await?;
        let image = catalog::lookup_image(ctx, ns, &vm_req.common_image).await?;
        review.spec_available = spec.is_some();
        review.image_available = image.is_some();

        if let Some(spec) = &spec {
            specs.insert(spec.id.clone());
            review.connection_name = spec.connection_name.clone();
            review.connection_available = !spec.connection_name.is_empty();
            if review.connection_available {
                connections.insert(spec.connection_name.clone());
            }
            if !spec.provider_name.is_empty() {
                providers.insert(spec.provider_name.clone());
            }
            if !spec.region_name.is_empty() {
                regions.insert(spec.region_name.clone());
            }

            match spec.cost_per_hour {
                Some(cost) => {
                    let group_cost = cost * f64::from(review.sub_group_size.max(1));
                    review.estimated_cost_per_hour = Some(group_cost);
                    total_cost += group_cost;
                }
                None => {
                    cost_known = false;
                    review
                        .messages
                        .push(format!("no cost information for spec '{}'", spec.id));
                }
            }
        } else {
            review
                .messages
                .push(format!("spec '{}' is not available", vm_req.common_spec));
        }

        if let Some(image) = &image {
            images.insert(image.id.clone());
        } else {
            review
                .messages
                .push(format!("image '{}' is not available", vm_req.common_image));
        }

        if let (Some(spec), Some(image)) = (&spec, &image) {
            let analysis =
                provision_log::analyze_readonly(ctx, &spec.id, &image.csp_image_name).await?;
            for rec in &analysis.recommendations {
                if !recommendations.contains(rec) {
                    recommendations.push(rec.clone());
                }
            }
            match analysis.overall_risk.level {
                RiskLevel::High => {
                    review.status = ReviewStatus::Error;
                    review.messages.push(format!(
                        "provisioning risk is high: {}",
                        analysis.overall_risk.reason
                    ));
                }
                RiskLevel::Medium => {
                    review.status = review.status.max(ReviewStatus::Warning);
                    review.messages.push(format!(
                        "provisioning risk is medium: {}",
                        analysis.overall_risk.reason
                    ));
                }
                RiskLevel::Low => {}
            }
            review.risk = Some(analysis);
        }

        if !review.spec_available || !review.image_available || !review.connection_available {
            review.status = ReviewStatus::Error;
        } else if review.estimated_cost_per_hour.is_none() {
            review.status = review.status.max(ReviewStatus::Warning);
        }

        vm_reviews.push(review);
    }

    let overall_status = vm_reviews
        .iter()
        .map(|r| r.status)
        .max()
        .unwrap_or(ReviewStatus::Error);
    let creatable = !req.vm.is_empty() && overall_status != ReviewStatus::Error;

    if providers.len() > 1 {
        recommendations.push(format!(
            "The request spans {} providers; VM failures are more likely to be partial. \
             Policy '{}' will apply per VM.",
            providers.len(),
            req.policy_on_partial_failure
        ));
    }
    if req.policy_on_partial_failure == FailurePolicy::Rollback && total_vm_count > 10 {
        recommendations.push(
            "Policy 'rollback' discards all VMs on any failure; with a deployment this size, \
             consider 'continue' or 'refine' instead."
                .to_string(),
        );
    }
    if overall_status == ReviewStatus::Error {
        recommendations.push("Resolve the reported errors before creating the MCI.".to_string());
    }

    let estimated_cost_per_hour = if cost_known && !vm_reviews.is_empty() {
        format!("{total_cost:.4}")
    } else {
        "unavailable".to_string()
    };

    Ok(ReviewReport {
        mci_name: req.name.clone(),
        total_vm_count,
        creatable,
        overall_status,
        vm_reviews,
        summary: ReviewSummary {
            unique_specs: specs.into_iter().collect(),
            unique_images: images.into_iter().collect(),
            unique_connections: connections.into_iter().collect(),
            unique_providers: providers.into_iter().collect(),
            unique_regions: regions.into_iter().collect(),
            estimated_cost_per_hour,
            policy: req.policy_on_partial_failure,
            recommendations,
        },
    })
}
