//! Status and action alphabets for VMs and MCIs.

use serde::{Deserialize, Serialize};

/// Status of a single VM.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum VmStatus {
    /// VM object exists in the store, no resources reserved yet.
    Preparing,
    /// Shared resources for the VM's connection are reserved.
    Prepared,
    /// The create call has been issued to the CSP.
    Creating,
    Running,
    Suspending,
    Suspended,
    Resuming,
    Rebooting,
    Terminating,
    /// Terminal until the VM record is deleted from the store.
    Terminated,
    /// A fatal error occurred; `systemMessage` carries the cause.
    Failed,
    /// Status reported by the CSP is outside the known alphabet.
    #[default]
    Undefined,
}

serde_plain::derive_display_from_serialize!(VmStatus);
serde_plain::derive_fromstr_from_deserialize!(VmStatus);

impl VmStatus {
    /// Map a native status string reported by the CSP abstraction into the
    /// internal alphabet. Anything outside the whitelist becomes `Undefined`.
    pub fn from_native(native: &str) -> Self {
        match native {
            "Creating" => VmStatus::Creating,
            "Running" => VmStatus::Running,
            "Suspending" => VmStatus::Suspending,
            "Suspended" => VmStatus::Suspended,
            "Resuming" => VmStatus::Resuming,
            "Rebooting" => VmStatus::Rebooting,
            "Terminating" => VmStatus::Terminating,
            "Terminated" => VmStatus::Terminated,
            _ => VmStatus::Undefined,
        }
    }

    /// Whether a VM in this status may be deleted without `force`.
    pub fn is_deletable(self) -> bool {
        matches!(
            self,
            VmStatus::Terminated | VmStatus::Undefined | VmStatus::Failed
        )
    }
}

/// Target status a VM or MCI is being driven towards.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum TargetStatus {
    #[default]
    None,
    Running,
    Suspended,
    Terminated,
    /// The target has been reached; no action is in flight.
    Complete,
}

serde_plain::derive_display_from_serialize!(TargetStatus);
serde_plain::derive_fromstr_from_deserialize!(TargetStatus);

/// Action currently driving a VM or MCI.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum ActionType {
    #[default]
    None,
    Create,
    Suspend,
    Resume,
    Reboot,
    Terminate,
    /// Delete only the Failed/Undefined VMs of an MCI.
    Refine,
    Complete,
}

serde_plain::derive_display_from_serialize!(ActionType);
serde_plain::derive_fromstr_from_deserialize!(ActionType);

impl ActionType {
    /// The status a VM should end up in once this action completes.
    pub fn target_status(self) -> TargetStatus {
        match self {
            ActionType::Create | ActionType::Resume | ActionType::Reboot => TargetStatus::Running,
            ActionType::Suspend => TargetStatus::Suspended,
            ActionType::Terminate => TargetStatus::Terminated,
            _ => TargetStatus::None,
        }
    }
}

/// Policy applied when some VMs of an MCI fail to provision.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Keep going; failed VMs stay visible as `Failed`.
    #[default]
    Continue,
    /// Drain in-flight work, then force-delete the entire MCI.
    Rollback,
    /// Delete only the failed VMs once the others have settled.
    Refine,
}

serde_plain::derive_display_from_serialize!(FailurePolicy);
serde_plain::derive_fromstr_from_deserialize!(FailurePolicy);

/// Phase in which a VM-level creation error occurred.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VmCreationPhase {
    ObjectCreation,
    VmCreation,
}

serde_plain::derive_display_from_serialize!(VmCreationPhase);
serde_plain::derive_fromstr_from_deserialize!(VmCreationPhase);

/// Monitoring agent installation state of a VM.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MonAgentStatus {
    #[default]
    NotInstalled,
    Installing,
    Installed,
    Failed,
}

serde_plain::derive_display_from_serialize!(MonAgentStatus);
serde_plain::derive_fromstr_from_deserialize!(MonAgentStatus);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_status_whitelist() {
        assert_eq!(VmStatus::from_native("Running"), VmStatus::Running);
        assert_eq!(VmStatus::from_native("Terminated"), VmStatus::Terminated);
        assert_eq!(VmStatus::from_native(""), VmStatus::Undefined);
        assert_eq!(VmStatus::from_native("running"), VmStatus::Undefined);
        assert_eq!(VmStatus::from_native("Banana"), VmStatus::Undefined);
    }

    #[test]
    fn status_round_trips_as_string() {
        for status in [VmStatus::Preparing, VmStatus::Running, VmStatus::Failed] {
            let s = status.to_string();
            assert_eq!(s.parse::<VmStatus>().unwrap(), status);
        }
        assert_eq!(FailurePolicy::Continue.to_string(), "continue");
        assert_eq!("rollback".parse::<FailurePolicy>().unwrap(), FailurePolicy::Rollback);
        assert_eq!(VmCreationPhase::VmCreation.to_string(), "vm_creation");
    }

    #[test]
    fn action_targets() {
        assert_eq!(ActionType::Create.target_status(), TargetStatus::Running);
        assert_eq!(ActionType::Suspend.target_status(), TargetStatus::Suspended);
        assert_eq!(ActionType::Terminate.target_status(), TargetStatus::Terminated);
    }
}
