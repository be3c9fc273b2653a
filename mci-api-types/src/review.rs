//! Pre-flight review report types.

use serde::{Deserialize, Serialize};

use crate::{FailurePolicy, RiskAnalysis};

/// Verdict of a review for a single requested sub-group.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Ready,
    Warning,
    Error,
}

serde_plain::derive_display_from_serialize!(ReviewStatus);
serde_plain::derive_fromstr_from_deserialize!(ReviewStatus);

/// Per-sub-group findings of a review.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmReview {
    pub name: String,
    pub sub_group_size: u32,
    pub spec_id: String,
    pub image_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connection_name: String,
    pub spec_available: bool,
    pub image_available: bool,
    pub connection_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost_per_hour: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAnalysis>,
    pub status: ReviewStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
}

/// Aggregated findings across the whole request.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSummary {
    pub unique_specs: Vec<String>,
    pub unique_images: Vec<String>,
    pub unique_connections: Vec<String>,
    pub unique_providers: Vec<String>,
    pub unique_regions: Vec<String>,
    /// Sum of spec costs as a decimal string, or "unavailable" when any spec
    /// carries no cost.
    pub estimated_cost_per_hour: String,
    pub policy: FailurePolicy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

/// Result of reviewing a dynamic MCI request. Produced without mutating any
/// state.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReport {
    pub mci_name: String,
    pub total_vm_count: u32,
    pub creatable: bool,
    pub overall_status: ReviewStatus,
    pub vm_reviews: Vec<VmReview>,
    pub summary: ReviewSummary,
}
