//! VirtualMachine: the declarative, stoppable wrapper around a VMI.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::datavolume::DataVolumeSpec;
use super::virtualmachineinstance::VirtualMachineInstanceSpec;
use super::Condition;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachine",
    plural = "virtualmachines",
    shortname = "vm",
    namespaced,
    status = "VirtualMachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Legacy on/off switch. The API rejects setting this together with
    /// runStrategy, so builders populate exactly one of the two.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_strategy: Option<RunStrategy>,

    /// DataVolumes created and owned alongside the VM.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_volume_templates: Vec<DataVolumeTemplateSpec>,

    pub template: VmiTemplate,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum RunStrategy {
    Always,
    Halted,
    Manual,
    RerunOnFailure,
    Once,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TemplateMetadata>,

    pub spec: VirtualMachineInstanceSpec,
}

/// The slice of ObjectMeta a template actually carries.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeTemplateSpec {
    pub metadata: TemplateMetadata,
    pub spec: DataVolumeSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    /// True once the controller has created the VMI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,

    /// Human-readable rollup, e.g. "Running", "Stopped", "Provisioning".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_snapshot_statuses: Vec<VolumeSnapshotStatus>,
}

/// Per-volume answer to "can this volume be snapshotted".
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    pub name: String,
    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VirtualMachine {
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.ready)
            .unwrap_or(false)
    }

    pub fn printable_status(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.printable_status.as_deref())
            .unwrap_or("Unknown")
    }

    /// All volumes reported snapshot-capable, and at least one reported.
    pub fn snapshottable(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| {
                !s.volume_snapshot_statuses.is_empty()
                    && s.volume_snapshot_statuses.iter().all(|v| v.enabled)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
#[path = "virtualmachine_test.rs"]
mod tests;
