//! DataSource and DataImportCron: the golden-image machinery. A cron
//! periodically imports OS images and repoints the DataSource VMs
//! clone from.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::datavolume::DataVolumeSpec;
use super::{condition_true, Condition};

/// Namespace CNV ships golden images in.
pub const GOLDEN_IMAGE_NAMESPACE: &str = "openshift-virtualization-os-images";

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "cdi.kubevirt.io",
    version = "v1beta1",
    kind = "DataSource",
    plural = "datasources",
    shortname = "das",
    namespaced,
    status = "DataSourceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSpec {
    pub source: DataSourceSource,
}

/// Points at the latest imported image, as a PVC or a VolumeSnapshot
/// depending on what the storage profile prefers.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pvc: Option<NamespacedRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<NamespacedRef>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DataSourceSource>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl DataSource {
    /// Ready means the referenced image exists and is consumable.
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| condition_true(&s.conditions, "Ready"))
            .unwrap_or(false)
    }

    /// The PVC or snapshot name the DataSource currently points at.
    pub fn current_source_name(&self) -> Option<&str> {
        let source = self.status.as_ref()?.source.as_ref()?;
        source
            .pvc
            .as_ref()
            .or(source.snapshot.as_ref())
            .map(|r| r.name.as_str())
    }
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "cdi.kubevirt.io",
    version = "v1beta1",
    kind = "DataImportCron",
    plural = "dataimportcrons",
    shortname = "dic",
    namespaced,
    status = "DataImportCronStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DataImportCronSpec {
    /// Standard cron format, e.g. "0 */12 * * *".
    pub schedule: String,

    /// DataSource this cron keeps pointed at the newest import.
    pub managed_data_source: String,

    pub template: DataImportCronTemplate,

    /// "Outdated" garbage-collects superseded imports (the default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub garbage_collect: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub imports_to_keep: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataImportCronTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CronTemplateMetadata>,

    pub spec: DataVolumeSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CronTemplateMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataImportCronStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_imported_pvc: Option<NamespacedRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_import_timestamp: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl DataImportCron {
    /// UpToDate means the managed DataSource points at the latest import.
    pub fn up_to_date(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| condition_true(&s.conditions, "UpToDate"))
            .unwrap_or(false)
    }
}
