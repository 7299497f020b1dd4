//! Typed wrappers for the custom resources the suite drives and observes.
//!
//! CNV/CDI install the CRDs; these types only round-trip the fields the
//! suite reads and writes, so optional server-side fields stay optional.

pub mod datavolume;
pub mod goldenimage;
pub mod hyperconverged;
pub mod migration;
pub mod snapshot;
pub mod storageprofile;
pub mod virtualmachine;
pub mod virtualmachineinstance;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status condition shared by KubeVirt and CDI resources.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (e.g. "Ready", "Bound", "LiveMigratable")
    #[serde(rename = "type")]
    pub condition_type: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// True when a condition of the given type exists with status "True".
pub fn condition_true(conditions: &[Condition], condition_type: &str) -> bool {
    conditions
        .iter()
        .any(|c| c.condition_type == condition_type && c.status == "True")
}

/// Look up a condition by type.
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}
