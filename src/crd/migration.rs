//! VirtualMachineInstanceMigration: requests a live migration of a VMI.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::virtualmachineinstance::MigrationState;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstanceMigration",
    plural = "virtualmachineinstancemigrations",
    shortname = "vmim",
    namespaced,
    status = "VirtualMachineInstanceMigrationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceMigrationSpec {
    /// VMI to migrate; must be running in the same namespace.
    pub vmi_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceMigrationStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<MigrationPhase>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_state: Option<MigrationState>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum MigrationPhase {
    Pending,
    Scheduling,
    Scheduled,
    PreparingTarget,
    TargetReady,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl VirtualMachineInstanceMigration {
    pub fn phase(&self) -> MigrationPhase {
        self.status
            .as_ref()
            .and_then(|s| s.phase)
            .unwrap_or(MigrationPhase::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_spec_names_the_vmi() {
        let migration = VirtualMachineInstanceMigration::new(
            "migrate-vm-a",
            VirtualMachineInstanceMigrationSpec {
                vmi_name: "vm-a".to_string(),
            },
        );

        let json = serde_json::to_value(&migration).unwrap();
        assert_eq!(json["kind"], "VirtualMachineInstanceMigration");
        assert_eq!(json["spec"]["vmiName"], "vm-a");
    }

    #[test]
    fn phase_defaults_to_unknown() {
        let migration = VirtualMachineInstanceMigration::new(
            "m",
            VirtualMachineInstanceMigrationSpec {
                vmi_name: "vm-a".to_string(),
            },
        );
        assert_eq!(migration.phase(), MigrationPhase::Unknown);
    }
}
