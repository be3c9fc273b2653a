//! Process-wide settings and pacing knobs.

use std::time::Duration;

/// Settings of the orchestration engine.
///
/// Read once at startup; every field has a workable default so the engine
/// runs against a local CSP-abstraction service out of the box.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Root URL of the CSP-abstraction REST service.
    pub spider_rest_url: String,
    /// Namespace holding system-owned specs and images, consulted as a
    /// fallback by catalog lookups.
    pub system_ns: String,
    /// When set, creation refuses (spec, image) pairs whose overall risk
    /// verdict is high. Review always reports the verdict either way.
    pub risk_gating: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            spider_rest_url: "http://localhost:1024/spider".to_string(),
            system_ns: "system".to_string(),
            risk_gating: false,
        }
    }
}

impl Settings {
    /// Settings from the environment: `SpiderRestUrl`, `SystemCommonNs`.
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Settings {
            spider_rest_url: std::env::var("SpiderRestUrl")
                .unwrap_or(defaults.spider_rest_url),
            system_ns: std::env::var("SystemCommonNs").unwrap_or(defaults.system_ns),
            risk_gating: defaults.risk_gating,
        }
    }
}

/// Every deliberate wait of the engine, in one place.
///
/// Defaults are the production values; tests zero them out with
/// [`Pacing::immediate`].
#[derive(Clone, Debug)]
pub struct Pacing {
    /// Per-VM create stagger unit; VM `i` waits `min(unit × i, cap)`.
    pub create_stagger_unit: Duration,
    pub create_stagger_cap: Duration,
    /// Settling gap between the security-group and vNet phases of a
    /// shared-resource rollback (CSP-side dependency ordering).
    pub rollback_settle: Duration,
    /// Wait before contacting freshly created VMs with post-commands.
    pub post_command_settle: Duration,
    /// Wait between terminate and deletion in the terminate-then-delete path.
    pub terminate_settle: Duration,
    /// Wait before monitoring-agent installation, small deployments (≤5 VMs).
    pub mon_agent_wait_small: Duration,
    /// Wait before monitoring-agent installation, larger deployments.
    pub mon_agent_wait_large: Duration,
    /// Back-off between CSP status-read retries.
    pub status_retry_backoff: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            create_stagger_unit: Duration::from_millis(200),
            create_stagger_cap: Duration::from_secs(5),
            rollback_settle: Duration::from_secs(5),
            post_command_settle: Duration::from_secs(5),
            terminate_settle: Duration::from_secs(5),
            mon_agent_wait_small: Duration::from_secs(30),
            mon_agent_wait_large: Duration::from_secs(60),
            status_retry_backoff: Duration::from_secs(5),
        }
    }
}

impl Pacing {
    /// All-zero pacing for tests.
    pub fn immediate() -> Self {
        Pacing {
            create_stagger_unit: Duration::ZERO,
            create_stagger_cap: Duration::ZERO,
            rollback_settle: Duration::ZERO,
            post_command_settle: Duration::ZERO,
            terminate_settle: Duration::ZERO,
            mon_agent_wait_small: Duration::ZERO,
            mon_agent_wait_large: Duration::ZERO,
            status_retry_backoff: Duration::ZERO,
        }
    }

    /// Stagger before issuing the `index`-th VM create of a batch.
    pub fn stagger_delay(&self, index: usize) -> Duration {
        self.create_stagger_unit
            .saturating_mul(index as u32)
            .min(self.create_stagger_cap)
    }

    /// Wait before monitoring-agent installation, by deployment size.
    pub fn mon_agent_wait(&self, vm_count: usize) -> Duration {
        if vm_count > 5 {
            self.mon_agent_wait_large
        } else {
            self.mon_agent_wait_small
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stagger_is_capped() {
        let pacing = Pacing::default();
        assert_eq!(pacing.stagger_delay(0), Duration::ZERO);
        assert_eq!(pacing.stagger_delay(3), Duration::from_millis(600));
        assert_eq!(pacing.stagger_delay(100), Duration::from_secs(5));
    }

    #[test]
    fn mon_agent_wait_by_size() {
        let pacing = Pacing::default();
        assert_eq!(pacing.mon_agent_wait(5), Duration::from_secs(30));
        assert_eq!(pacing.mon_agent_wait(6), Duration::from_secs(60));
    }
}
