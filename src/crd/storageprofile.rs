//! StorageProfile: CDI's per-StorageClass capability report. Cluster
//! scoped, one per storage class, named after it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "cdi.kubevirt.io",
    version = "v1beta1",
    kind = "StorageProfile",
    plural = "storageprofiles",
    status = "StorageProfileStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfileSpec {
    /// Admin overrides; empty when CDI's defaults are in effect.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claim_property_sets: Vec<ClaimPropertySet>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_strategy: Option<CloneStrategy>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfileStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioner: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub claim_property_sets: Vec<ClaimPropertySet>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_strategy: Option<CloneStrategy>,

    /// VolumeSnapshotClass CDI would use for smart cloning, when one
    /// matches the provisioner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_class: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_import_cron_source_format: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClaimPropertySet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub access_modes: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_mode: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum CloneStrategy {
    #[serde(rename = "copy")]
    Copy,
    #[serde(rename = "snapshot")]
    Snapshot,
    #[serde(rename = "csi-clone")]
    CsiClone,
}

impl StorageProfile {
    pub fn provisioner(&self) -> Option<&str> {
        self.status.as_ref()?.provisioner.as_deref()
    }

    pub fn clone_strategy(&self) -> Option<CloneStrategy> {
        self.status.as_ref()?.clone_strategy
    }

    /// Access modes CDI resolved for this class, flattened across
    /// property sets in preference order.
    pub fn access_modes(&self) -> Vec<&str> {
        self.status
            .as_ref()
            .map(|s| {
                s.claim_property_sets
                    .iter()
                    .flat_map(|set| set.access_modes.iter().map(String::as_str))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn supports_access_mode(&self, mode: &str) -> bool {
        self.access_modes().contains(&mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_strategy_uses_lowercase_wire_values() {
        assert_eq!(
            serde_json::to_string(&CloneStrategy::CsiClone).unwrap(),
            "\"csi-clone\""
        );
        let parsed: CloneStrategy = serde_json::from_str("\"snapshot\"").unwrap();
        assert_eq!(parsed, CloneStrategy::Snapshot);
    }

    #[test]
    fn access_modes_flatten_across_property_sets() {
        let mut profile = StorageProfile::new("standard-csi", StorageProfileSpec::default());
        profile.status = Some(StorageProfileStatus {
            storage_class: Some("standard-csi".to_string()),
            provisioner: Some("csi.example.com".to_string()),
            claim_property_sets: vec![
                ClaimPropertySet {
                    access_modes: vec!["ReadWriteMany".to_string()],
                    volume_mode: Some("Block".to_string()),
                },
                ClaimPropertySet {
                    access_modes: vec!["ReadWriteOnce".to_string()],
                    volume_mode: Some("Filesystem".to_string()),
                },
            ],
            ..Default::default()
        });

        assert!(profile.supports_access_mode("ReadWriteMany"));
        assert!(profile.supports_access_mode("ReadWriteOnce"));
        assert!(!profile.supports_access_mode("ReadOnlyMany"));
        assert_eq!(profile.provisioner(), Some("csi.example.com"));
    }
}
