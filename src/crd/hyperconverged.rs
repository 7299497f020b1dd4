//! HyperConverged: the CNV operator's top-level CR. The suite only
//! reads it, for health conditions and the deployed version.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{condition_true, Condition};

/// Namespace and name CNV installs the singleton under.
pub const HCO_NAMESPACE: &str = "openshift-cnv";
pub const HCO_NAME: &str = "kubevirt-hyperconverged";

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "hco.kubevirt.io",
    version = "v1beta1",
    kind = "HyperConverged",
    plural = "hyperconvergeds",
    namespaced,
    status = "HyperConvergedStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedSpec {
    // The suite never writes the spec; unknown fields are dropped on read.
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<HyperConvergedVersion>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HyperConvergedVersion {
    pub name: String,
    pub version: String,
}

impl HyperConverged {
    /// Healthy means Available without Progressing or Degraded.
    pub fn is_healthy(&self) -> bool {
        let Some(status) = self.status.as_ref() else {
            return false;
        };
        condition_true(&status.conditions, "Available")
            && !condition_true(&status.conditions, "Progressing")
            && !condition_true(&status.conditions, "Degraded")
    }

    /// The operator version, e.g. "4.16.3".
    pub fn operator_version(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .versions
            .iter()
            .find(|v| v.name == "operator")
            .map(|v| v.version.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(condition_type: &str, status: &str) -> Condition {
        Condition {
            condition_type: condition_type.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn healthy_requires_available_and_settled() {
        let mut hco = HyperConverged::new(HCO_NAME, HyperConvergedSpec::default());
        assert!(!hco.is_healthy());

        hco.status = Some(HyperConvergedStatus {
            conditions: vec![
                condition("Available", "True"),
                condition("Progressing", "True"),
            ],
            ..Default::default()
        });
        assert!(!hco.is_healthy());

        if let Some(status) = hco.status.as_mut() {
            status.conditions[1].status = "False".to_string();
        }
        assert!(hco.is_healthy());
    }

    #[test]
    fn operator_version_picks_the_operator_entry() {
        let mut hco = HyperConverged::new(HCO_NAME, HyperConvergedSpec::default());
        hco.status = Some(HyperConvergedStatus {
            versions: vec![HyperConvergedVersion {
                name: "operator".to_string(),
                version: "4.16.3".to_string(),
            }],
            ..Default::default()
        });

        assert_eq!(hco.operator_version(), Some("4.16.3"));
    }
}
