//! Durable provisioning history and risk verdict types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Per-spec durable log of provisioning outcomes.
///
/// Invariant: `failure_count + success_count` equals the total number of
/// recorded timestamps after any event.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningLog {
    pub spec_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region_name: String,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_timestamps: Vec<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_timestamps: Vec<i64>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub failure_images: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub success_images: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_messages: Vec<String>,
    #[serde(default)]
    pub last_updated: i64,
}

impl ProvisioningLog {
    /// Failures over all recorded attempts, in [0, 1]. Zero when empty.
    pub fn failure_rate(&self) -> f64 {
        let total = self.failure_count + self.success_count;
        if total == 0 {
            0.0
        } else {
            self.failure_count as f64 / total as f64
        }
    }
}

/// Severity of a risk verdict. Ordered so `max` picks the dominant one.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

serde_plain::derive_display_from_serialize!(RiskLevel);
serde_plain::derive_fromstr_from_deserialize!(RiskLevel);

/// Which dimension dominates an overall risk verdict.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskFactor {
    #[default]
    None,
    Spec,
    Image,
    Combination,
}

serde_plain::derive_display_from_serialize!(RiskFactor);
serde_plain::derive_fromstr_from_deserialize!(RiskFactor);

/// A single risk verdict with its reasoning.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskVerdict {
    pub level: RiskLevel,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// Full analysis for a (spec, image) pair, derived from the log alone.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAnalysis {
    pub spec_risk: RiskVerdict,
    pub image_risk: RiskVerdict,
    pub overall_risk: RiskVerdict,
    pub primary_risk_factor: RiskFactor,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_ordering() {
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
        assert_eq!(RiskLevel::High.max(RiskLevel::Low), RiskLevel::High);
        assert_eq!(RiskLevel::High.to_string(), "high");
    }

    #[test]
    fn failure_rate() {
        let mut log = ProvisioningLog::default();
        assert_eq!(log.failure_rate(), 0.0);
        log.failure_count = 4;
        log.success_count = 1;
        assert!((log.failure_rate() - 0.8).abs() < f64::EPSILON);
    }
}
