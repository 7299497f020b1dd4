//! DataVolume: CDI's declarative import/clone/upload of a disk image
//! into a PVC.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "cdi.kubevirt.io",
    version = "v1beta1",
    kind = "DataVolume",
    plural = "datavolumes",
    shortname = "dv",
    namespaced,
    status = "DataVolumeStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSpec {
    /// Where the disk content comes from. Mutually exclusive with sourceRef.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DataVolumeSource>,

    /// Indirect source, typically a golden-image DataSource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<DataVolumeSourceRef>,

    /// Storage-profile aware PVC request; CDI fills in access modes and
    /// volume mode the class supports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,

    /// Fully explicit PVC request, bypassing storage profiles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pvc: Option<PvcSpec>,

    /// "kubevirt" (disk image, default) or "archive".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub preallocation: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistrySource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pvc: Option<PvcSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub blank: Option<BlankSource>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpSource {
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_config_map: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// "pod" (default) or "node" for images pulled via the kubelet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_method: Option<String>,
}

/// Clone source: an existing PVC in some namespace.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvcSource {
    pub namespace: String,
    pub name: String,
}

/// Clone source: an existing VolumeSnapshot.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSource {
    pub namespace: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct UploadSource {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct BlankSource {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSourceRef {
    /// Only "DataSource" is supported by CDI today.
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,

    /// "Filesystem" or "Block"; omitted lets the storage profile decide.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_mode: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<StorageResources>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvcSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_mode: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    pub resources: StorageResources,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageResources {
    /// Only "storage" is meaningful here, e.g. requests: {storage: "5Gi"}.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<DataVolumePhase>,

    /// Import/clone progress as a percentage string, e.g. "43.21%".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,

    /// Times the transfer pod restarted; nonzero usually means trouble.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_count: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum DataVolumePhase {
    Pending,
    PVCBound,
    ImportScheduled,
    ImportInProgress,
    CloneScheduled,
    CloneInProgress,
    SnapshotForSmartCloneInProgress,
    SmartClonePVCInProgress,
    CSICloneInProgress,
    CloneFromSnapshotSourceInProgress,
    ExpansionInProgress,
    UploadScheduled,
    UploadReady,
    WaitForFirstConsumer,
    PendingPopulation,
    Paused,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl DataVolumePhase {
    /// Phases a DataVolume sits in while waiting for a consumer on a
    /// WaitForFirstConsumer storage class.
    pub fn is_pending_consumer(&self) -> bool {
        matches!(
            self,
            DataVolumePhase::WaitForFirstConsumer | DataVolumePhase::PendingPopulation
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DataVolumePhase::Succeeded | DataVolumePhase::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataVolumePhase::Pending => "Pending",
            DataVolumePhase::PVCBound => "PVCBound",
            DataVolumePhase::ImportScheduled => "ImportScheduled",
            DataVolumePhase::ImportInProgress => "ImportInProgress",
            DataVolumePhase::CloneScheduled => "CloneScheduled",
            DataVolumePhase::CloneInProgress => "CloneInProgress",
            DataVolumePhase::SnapshotForSmartCloneInProgress => {
                "SnapshotForSmartCloneInProgress"
            }
            DataVolumePhase::SmartClonePVCInProgress => "SmartClonePVCInProgress",
            DataVolumePhase::CSICloneInProgress => "CSICloneInProgress",
            DataVolumePhase::CloneFromSnapshotSourceInProgress => {
                "CloneFromSnapshotSourceInProgress"
            }
            DataVolumePhase::ExpansionInProgress => "ExpansionInProgress",
            DataVolumePhase::UploadScheduled => "UploadScheduled",
            DataVolumePhase::UploadReady => "UploadReady",
            DataVolumePhase::WaitForFirstConsumer => "WaitForFirstConsumer",
            DataVolumePhase::PendingPopulation => "PendingPopulation",
            DataVolumePhase::Paused => "Paused",
            DataVolumePhase::Succeeded => "Succeeded",
            DataVolumePhase::Failed => "Failed",
            DataVolumePhase::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for DataVolumePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DataVolume {
    pub fn phase(&self) -> DataVolumePhase {
        self.status
            .as_ref()
            .and_then(|s| s.phase)
            .unwrap_or(DataVolumePhase::Unknown)
    }

    /// Name of the PVC backing this DataVolume. Falls back to the
    /// DataVolume name, which CDI uses when status is not yet filled in.
    pub fn pvc_name(&self) -> String {
        self.status
            .as_ref()
            .and_then(|s| s.claim_name.clone())
            .or_else(|| self.metadata.name.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "datavolume_test.rs"]
mod tests;
