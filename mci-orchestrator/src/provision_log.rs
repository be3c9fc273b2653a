//! Durable provisioning history and risk analysis.
//!
//! One log record per spec, keyed by the percent-encoded spec id. The log is
//! a regret-minimization store, not a complete audit: failures are always
//! recorded, successes only once the spec has failed at least once. Risk
//! verdicts are a pure function of the stored record, so identical logs
//! always produce identical verdicts.

use mci_api_types::{
    provision_log_key, ProvisioningLog, RiskAnalysis, RiskFactor, RiskLevel, RiskVerdict,
    SpecInfo,
};
use mci_kvstore::{put_record, KvStore as _};

use crate::error::Result;
use crate::{read_only, read_or_reset, Context};

/// Failure messages kept per spec; older ones age out first.
const MAX_FAILURE_MESSAGES: usize = 20;

/// One provisioning outcome to be recorded.
#[derive(Clone, Copy, Debug)]
pub struct ProvisionEvent<'a> {
    pub csp_image_name: &'a str,
    pub is_success: bool,
    pub error_message: Option<&'a str>,
    pub vm_name: Option<&'a str>,
    pub mci_id: Option<&'a str>,
    pub timestamp: i64,
}

/// Load the log of a spec. With `repair`, corrupted or empty records are
/// deleted on read and treated as missing.
pub async fn load(ctx: &Context, spec_id: &str, repair: bool) -> Result<Option<ProvisioningLog>> {
    let key = provision_log_key(spec_id);
    let log = if repair {
        read_or_reset::<ProvisioningLog>(ctx.kv.as_ref(), &key).await?
    } else {
        read_only::<ProvisioningLog>(ctx.kv.as_ref(), &key).await?
    };
    match log {
        Some(log) if log.failure_count == 0 && log.success_count == 0 => {
            if repair {
                log::warn!("removing empty provisioning log for spec '{spec_id}'");
                ctx.kv.delete(&key).await?;
            }
            Ok(None)
        }
        other => Ok(other),
    }
}

/// Record one provisioning outcome for a spec.
///
/// Successes are persisted only while `failure_count > 0`; a success against
/// a spec with no failure history leaves no trace.
pub async fn record(ctx: &Context, spec: &SpecInfo, event: ProvisionEvent<'_>) -> Result<()> {
    let existing = load(ctx, &spec.id, true).await?;

    if event.is_success && existing.as_ref().map_or(0, |l| l.failure_count) == 0 {
        log::debug!(
            "not recording success for spec '{}': no failure history",
            spec.id
        );
        return Ok(());
    }

    let mut log = existing.unwrap_or_else(|| ProvisioningLog {
        spec_id: spec.id.clone(),
        provider_name: spec.provider_name.clone(),
        region_name: spec.region_name.clone(),
        ..Default::default()
    });

    if event.is_success {
        log.success_count += 1;
        log.success_timestamps.push(event.timestamp);
        log.success_images.insert(event.csp_image_name.to_string());
    } else {
        log.failure_count += 1;
        log.failure_timestamps.push(event.timestamp);
        log.failure_images.insert(event.csp_image_name.to_string());
        log.failure_messages.push(failure_message(&event));
        if log.failure_messages.len() > MAX_FAILURE_MESSAGES {
            let drop = log.failure_messages.len() - MAX_FAILURE_MESSAGES;
            log.failure_messages.drain(..drop);
        }
    }
    log.last_updated = event.timestamp;

    put_record(ctx.kv.as_ref(), &provision_log_key(&spec.id), &log).await?;
    Ok(())
}

fn failure_message(event: &ProvisionEvent<'_>) -> String {
    let origin = match (event.mci_id, event.vm_name) {
        (Some(mci), Some(vm)) => format!("{mci}/{vm}"),
        (Some(mci), None) => mci.to_string(),
        (None, Some(vm)) => vm.to_string(),
        (None, None) => "unknown".to_string(),
    };
    format!(
        "[{origin}] {}",
        event.error_message.unwrap_or("unspecified error")
    )
}

/// Analyze the risk of provisioning `csp_image_name` on `spec_id`,
/// repairing corrupted log records along the way.
pub async fn analyze(ctx: &Context, spec_id: &str, csp_image_name: &str) -> Result<RiskAnalysis> {
    let log = load(ctx, spec_id, true).await?;
    Ok(analyze_log(log.as_ref(), spec_id, csp_image_name))
}

/// Analyze without touching the store; used by the reviewer.
pub async fn analyze_readonly(
    ctx: &Context,
    spec_id: &str,
    csp_image_name: &str,
) -> Result<RiskAnalysis> {
    let log = load(ctx, spec_id, false).await?;
    Ok(analyze_log(log.as_ref(), spec_id, csp_image_name))
}

/// Derive the verdicts from a log record alone.
pub fn analyze_log(
    log: Option<&ProvisioningLog>,
    spec_id: &str,
    csp_image_name: &str,
) -> RiskAnalysis {
    let spec_risk = spec_risk(log, spec_id);
    let image_risk = image_risk(log, spec_id, csp_image_name);

    let image_is_new = log.map_or(true, |log| {
        !log.failure_images.contains(csp_image_name)
            && !log.success_images.contains(csp_image_name)
    });

    let overall_level = spec_risk.level.max(image_risk.level);
    let primary_risk_factor = if spec_risk.level == RiskLevel::Low && image_risk.level == RiskLevel::Low
    {
        RiskFactor::None
    } else if image_is_new && spec_risk.level > RiskLevel::Low {
        RiskFactor::Combination
    } else if image_risk.level > spec_risk.level {
        RiskFactor::Image
    } else {
        RiskFactor::Spec
    };

    let mut recommendations = Vec::new();
    match spec_risk.level {
        RiskLevel::High => recommendations.push(format!(
            "Spec '{spec_id}' fails frequently; consider a different spec or region."
        )),
        RiskLevel::Medium => recommendations.push(format!(
            "Spec '{spec_id}' has recorded provisioning failures; monitor the deployment closely."
        )),
        RiskLevel::Low => {}
    }
    if image_risk.level == RiskLevel::High {
        recommendations.push(format!(
            "Image '{csp_image_name}' has failed with spec '{spec_id}' before; consider using a different image."
        ));
    }
    if primary_risk_factor == RiskFactor::Combination {
        recommendations.push(format!(
            "No history for image '{csp_image_name}' with spec '{spec_id}'; verify compatibility before scaling out."
        ));
    }

    let overall_reason = match primary_risk_factor {
        RiskFactor::None => "no significant risk recorded".to_string(),
        RiskFactor::Spec => spec_risk.reason.clone(),
        RiskFactor::Image => image_risk.reason.clone(),
        RiskFactor::Combination => format!(
            "{} and the image is untried with this spec",
            spec_risk.reason
        ),
    };

    RiskAnalysis {
        spec_risk,
        image_risk,
        overall_risk: RiskVerdict {
            level: overall_level,
            reason: overall_reason,
        },
        primary_risk_factor,
        recommendations,
    }
}

fn spec_risk(log: Option<&ProvisioningLog>, spec_id: &str) -> RiskVerdict {
    let Some(log) = log else {
        return RiskVerdict {
            level: RiskLevel::Low,
            reason: format!("no provisioning history for spec '{spec_id}'"),
        };
    };
    let failed_images = log.failure_images.len();
    let attempts = log.failure_count + log.success_count;
    let rate = log.failure_rate();

    if failed_images >= 10 {
        return RiskVerdict {
            level: RiskLevel::High,
            reason: format!("{failed_images} distinct images have failed on this spec"),
        };
    }
    if attempts >= 5 && rate >= 0.8 {
        return RiskVerdict {
            level: RiskLevel::High,
            reason: format!(
                "{:.0}% of {attempts} recorded attempts failed",
                rate * 100.0
            ),
        };
    }
    if failed_images >= 5 {
        return RiskVerdict {
            level: RiskLevel::Medium,
            reason: format!("{failed_images} distinct images have failed on this spec"),
        };
    }
    if log.failure_count >= 3 && log.success_count == 0 {
        return RiskVerdict {
            level: RiskLevel::Medium,
            reason: format!("{} failures and no recorded success", log.failure_count),
        };
    }
    if rate >= 0.5 {
        return RiskVerdict {
            level: RiskLevel::Medium,
            reason: format!(
                "{:.0}% of {attempts} recorded attempts failed",
                rate * 100.0
            ),
        };
    }
    RiskVerdict {
        level: RiskLevel::Low,
        reason: "failure history is within bounds".to_string(),
    }
}

fn image_risk(log: Option<&ProvisioningLog>, spec_id: &str, csp_image_name: &str) -> RiskVerdict {
    let failed = log.is_some_and(|log| log.failure_images.contains(csp_image_name));
    if failed {
        // Once an image has failed with a spec it stays high, regardless of
        // later successes.
        RiskVerdict {
            level: RiskLevel::High,
            reason: format!("image '{csp_image_name}' has failed with spec '{spec_id}'"),
        }
    } else {
        RiskVerdict {
            level: RiskLevel::Low,
            reason: format!("image '{csp_image_name}' has no failure with spec '{spec_id}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use mci_kvstore::MemKvStore;
    use mci_spider_client::SpiderClient;

    fn test_ctx() -> Context {
        // the spider client is never exercised by these tests
        Context::new(Arc::new(MemKvStore::new()), SpiderClient::new("http://localhost:1"))
    }

    fn spec() -> SpecInfo {
        SpecInfo {
            id: "gcp+europe-north1+f1-micro".into(),
            connection_name: "gcp-europe-north1".into(),
            csp_spec_name: "f1-micro".into(),
            provider_name: "gcp".into(),
            region_name: "europe-north1".into(),
            ..Default::default()
        }
    }

    fn failure(ts: i64) -> ProvisionEvent<'static> {
        ProvisionEvent {
            csp_image_name: "ubuntu22.04",
            is_success: false,
            error_message: Some("quota exceeded"),
            vm_name: Some("v-1"),
            mci_id: Some("m1"),
            timestamp: ts,
        }
    }

    fn success(ts: i64) -> ProvisionEvent<'static> {
        ProvisionEvent {
            csp_image_name: "ubuntu22.04",
            is_success: true,
            error_message: None,
            vm_name: Some("v-1"),
            mci_id: Some("m1"),
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn success_without_failure_history_leaves_no_trace() {
        let ctx = test_ctx();
        record(&ctx, &spec(), success(1)).await.unwrap();
        assert!(load(&ctx, &spec().id, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn success_after_failure_is_recorded() {
        let ctx = test_ctx();
        record(&ctx, &spec(), failure(1)).await.unwrap();
        record(&ctx, &spec(), success(2)).await.unwrap();

        let log = load(&ctx, &spec().id, true).await.unwrap().unwrap();
        assert_eq!(log.failure_count, 1);
        assert_eq!(log.success_count, 1);
        // counts always match the timestamp vectors
        assert_eq!(
            (log.failure_count + log.success_count) as usize,
            log.failure_timestamps.len() + log.success_timestamps.len()
        );
        assert!(log.failure_messages[0].contains("m1/v-1"));
    }

    #[tokio::test]
    async fn failures_never_decrease() {
        let ctx = test_ctx();
        for ts in 0..4 {
            record(&ctx, &spec(), failure(ts)).await.unwrap();
        }
        record(&ctx, &spec(), success(9)).await.unwrap();
        let log = load(&ctx, &spec().id, true).await.unwrap().unwrap();
        assert_eq!(log.failure_count, 4);
        assert_eq!(log.last_updated, 9);
    }

    #[tokio::test]
    async fn corrupted_log_is_removed_on_repairing_read() {
        let ctx = test_ctx();
        let key = provision_log_key(&spec().id);
        ctx.kv.put(&key, "{broken").await.unwrap();

        assert!(load(&ctx, &spec().id, true).await.unwrap().is_none());
        assert_eq!(ctx.kv.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn readonly_load_keeps_corrupted_record() {
        let ctx = test_ctx();
        let key = provision_log_key(&spec().id);
        ctx.kv.put(&key, "{broken").await.unwrap();

        assert!(load(&ctx, &spec().id, false).await.unwrap().is_none());
        assert!(ctx.kv.get(&key).await.unwrap().is_some());
    }

    fn log_with(failures: u64, successes: u64, failed_images: &[&str]) -> ProvisioningLog {
        ProvisioningLog {
            spec_id: "s".into(),
            failure_count: failures,
            success_count: successes,
            failure_timestamps: (0..failures as i64).collect(),
            success_timestamps: (0..successes as i64).collect(),
            failure_images: failed_images.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn single_failure_flags_the_image_not_the_spec() {
        // one failed attempt with one image: the image verdict dominates
        let log = log_with(1, 0, &["ubuntu22.04"]);
        let analysis = analyze_log(Some(&log), "s", "ubuntu22.04");
        assert_eq!(analysis.overall_risk.level, RiskLevel::High);
        assert_eq!(analysis.primary_risk_factor, RiskFactor::Image);
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.contains("different image")));
    }

    #[test]
    fn ten_failed_images_make_the_spec_high_risk() {
        let images: Vec<String> = (0..10).map(|i| format!("img-{i}")).collect();
        let image_refs: Vec<&str> = images.iter().map(String::as_str).collect();
        let log = log_with(10, 10, &image_refs);
        let analysis = analyze_log(Some(&log), "s", "img-0");
        assert_eq!(analysis.spec_risk.level, RiskLevel::High);
        assert_eq!(analysis.overall_risk.level, RiskLevel::High);
        // both high: the tie breaks towards the spec
        assert_eq!(analysis.primary_risk_factor, RiskFactor::Spec);
    }

    #[test]
    fn three_failures_no_success_is_medium() {
        let log = log_with(3, 0, &["a", "b"]);
        let analysis = analyze_log(Some(&log), "s", "c");
        assert_eq!(analysis.spec_risk.level, RiskLevel::Medium);
        // image "c" is untried while the spec is risky
        assert_eq!(analysis.primary_risk_factor, RiskFactor::Combination);
        assert_eq!(analysis.overall_risk.level, RiskLevel::Medium);
    }

    #[test]
    fn high_failure_rate_needs_a_sample() {
        // 1/1 failed is not yet a high-risk spec
        let one = log_with(1, 0, &["a"]);
        assert_eq!(analyze_log(Some(&one), "s", "x").spec_risk.level, RiskLevel::Medium);

        // 4/5 failed is
        let five = log_with(4, 1, &["a"]);
        assert_eq!(analyze_log(Some(&five), "s", "x").spec_risk.level, RiskLevel::High);
    }

    #[test]
    fn no_history_is_low_risk() {
        let analysis = analyze_log(None, "s", "ubuntu22.04");
        assert_eq!(analysis.overall_risk.level, RiskLevel::Low);
        assert_eq!(analysis.primary_risk_factor, RiskFactor::None);
        assert!(analysis.recommendations.is_empty());
    }

    #[test]
    fn analysis_is_deterministic() {
        let log = log_with(7, 3, &["a", "b", "c", "d", "e"]);
        let first = serde_json::to_string(&analyze_log(Some(&log), "s", "a")).unwrap();
        let second = serde_json::to_string(&analyze_log(Some(&log), "s", "a")).unwrap();
        assert_eq!(first, second);
    }
}
