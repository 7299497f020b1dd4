//! VirtualMachineSnapshot and VirtualMachineRestore: online VM
//! point-in-time copies and rollback.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

/// Reference to the snapshotted or restored object, always a
/// kubevirt.io VirtualMachine in this suite.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTargetRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,

    pub kind: String,
    pub name: String,
}

impl SnapshotTargetRef {
    pub fn virtual_machine(name: &str) -> Self {
        SnapshotTargetRef {
            api_group: Some("kubevirt.io".to_string()),
            kind: "VirtualMachine".to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "snapshot.kubevirt.io",
    version = "v1beta1",
    kind = "VirtualMachineSnapshot",
    plural = "virtualmachinesnapshots",
    shortname = "vmsnapshot",
    namespaced,
    status = "VirtualMachineSnapshotStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSnapshotSpec {
    pub source: SnapshotTargetRef,

    /// Seconds before an incomplete snapshot is marked failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_deadline: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSnapshotStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<SnapshotPhase>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SnapshotError>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum SnapshotPhase {
    InProgress,
    Succeeded,
    Failed,
    Deleting,
    #[serde(other)]
    Unknown,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl VirtualMachineSnapshot {
    pub fn ready_to_use(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.ready_to_use)
            .unwrap_or(false)
    }

    pub fn failed(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.phase)
            .map(|p| p == SnapshotPhase::Failed)
            .unwrap_or(false)
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "snapshot.kubevirt.io",
    version = "v1beta1",
    kind = "VirtualMachineRestore",
    plural = "virtualmachinerestores",
    shortname = "vmrestore",
    namespaced,
    status = "VirtualMachineRestoreStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineRestoreSpec {
    /// VM to roll back; may be the snapshot's source or a new target.
    pub target: SnapshotTargetRef,

    pub virtual_machine_snapshot_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineRestoreStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub restore_time: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl VirtualMachineRestore {
    pub fn complete(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.complete)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_source_targets_the_vm_api_group() {
        let snapshot = VirtualMachineSnapshot::new(
            "snap-vm-a",
            VirtualMachineSnapshotSpec {
                source: SnapshotTargetRef::virtual_machine("vm-a"),
                failure_deadline: None,
            },
        );

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["apiVersion"], "snapshot.kubevirt.io/v1beta1");
        assert_eq!(json["spec"]["source"]["apiGroup"], "kubevirt.io");
        assert_eq!(json["spec"]["source"]["kind"], "VirtualMachine");
        assert_eq!(json["spec"]["source"]["name"], "vm-a");
    }

    #[test]
    fn readiness_and_completion_default_to_false() {
        let snapshot = VirtualMachineSnapshot::new(
            "s",
            VirtualMachineSnapshotSpec {
                source: SnapshotTargetRef::virtual_machine("vm-a"),
                failure_deadline: None,
            },
        );
        assert!(!snapshot.ready_to_use());
        assert!(!snapshot.failed());

        let restore = VirtualMachineRestore::new(
            "r",
            VirtualMachineRestoreSpec {
                target: SnapshotTargetRef::virtual_machine("vm-a"),
                virtual_machine_snapshot_name: "s".to_string(),
            },
        );
        assert!(!restore.complete());
    }

    #[test]
    fn snapshot_status_parses_failure_details() {
        let status: VirtualMachineSnapshotStatus = serde_json::from_value(serde_json::json!({
            "phase": "Failed",
            "readyToUse": false,
            "error": {"message": "volume rootdisk does not support snapshots"}
        }))
        .unwrap();

        assert_eq!(status.phase, Some(SnapshotPhase::Failed));
        assert!(status
            .error
            .unwrap()
            .message
            .unwrap()
            .contains("does not support"));
    }
}
