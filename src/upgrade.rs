//! Upgrade observation: operator health and versions before, during
//! and after a CNV upgrade. The suite never drives the upgrade itself;
//! it validates that workloads and the control plane survive one.

use std::time::Duration;

use kube::api::{Api, DynamicObject, ListParams};
use kube::core::ApiResource;
use kube::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::crd::hyperconverged::HyperConverged;
use crate::crd::virtualmachineinstance::VirtualMachineInstance;
use crate::sampler::{SamplerError, TimeoutSampler};

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Wait(#[from] SamplerError),

    #[error("HyperConverged {0} not found")]
    HcoMissing(String),
}

fn csv_resource() -> ApiResource {
    ApiResource {
        group: "operators.coreos.com".to_string(),
        version: "v1alpha1".to_string(),
        api_version: "operators.coreos.com/v1alpha1".to_string(),
        kind: "ClusterServiceVersion".to_string(),
        plural: "clusterserviceversions".to_string(),
    }
}

/// `status.phase` of a CSV fetched dynamically.
fn csv_phase(csv: &DynamicObject) -> Option<&str> {
    csv.data
        .get("status")
        .and_then(|s| s.get("phase"))
        .and_then(|p| p.as_str())
}

/// Identity of one running VMI, captured before an upgrade window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmiRecord {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

/// Every Running VMI on the cluster. Taken before an upgrade so
/// workload survival can be checked against it afterwards.
pub async fn running_vmi_inventory(client: &Client) -> Result<Vec<VmiRecord>, UpgradeError> {
    let vmis: Api<VirtualMachineInstance> = Api::all(client.clone());
    let list = vmis.list(&ListParams::default()).await?;
    Ok(list
        .items
        .into_iter()
        .filter(VirtualMachineInstance::is_running)
        .filter_map(|vmi| {
            Some(VmiRecord {
                namespace: vmi.metadata.namespace.clone()?,
                name: vmi.metadata.name.clone()?,
                uid: vmi.metadata.uid.clone()?,
            })
        })
        .collect())
}

/// Inventory entries that did not ride out the upgrade: deleted, no
/// longer Running, or recreated under a new UID. Live migration keeps
/// the UID, so a migrated workload does not count as lost.
pub async fn lost_workloads(
    client: &Client,
    inventory: &[VmiRecord],
) -> Result<Vec<String>, UpgradeError> {
    let mut lost = Vec::new();
    for record in inventory {
        let api: Api<VirtualMachineInstance> =
            Api::namespaced(client.clone(), &record.namespace);
        match api.get_opt(&record.name).await? {
            Some(vmi)
                if vmi.is_running() && vmi.metadata.uid.as_deref() == Some(&record.uid) => {}
            Some(vmi) => lost.push(format!(
                "{}/{}: phase {}, uid {:?}",
                record.namespace,
                record.name,
                vmi.phase(),
                vmi.metadata.uid
            )),
            None => lost.push(format!("{}/{}: deleted", record.namespace, record.name)),
        }
    }
    Ok(lost)
}

/// Watches operator-level state in the CNV namespace.
pub struct UpgradeWatcher {
    hcos: Api<HyperConverged>,
    csvs: Api<DynamicObject>,
    hco_name: String,
}

impl UpgradeWatcher {
    pub fn new(client: &Client, namespace: &str, hco_name: &str) -> Self {
        UpgradeWatcher {
            hcos: Api::namespaced(client.clone(), namespace),
            csvs: Api::namespaced_with(client.clone(), namespace, &csv_resource()),
            hco_name: hco_name.to_string(),
        }
    }

    pub async fn hco(&self) -> Result<HyperConverged, UpgradeError> {
        match self.hcos.get_opt(&self.hco_name).await? {
            Some(hco) => Ok(hco),
            None => Err(UpgradeError::HcoMissing(self.hco_name.clone())),
        }
    }

    /// Deployed operator version, e.g. "4.16.3".
    pub async fn operator_version(&self) -> Result<Option<String>, UpgradeError> {
        let hco = self.hco().await?;
        Ok(hco.operator_version().map(str::to_string))
    }

    /// Wait until the HCO is Available and neither Progressing nor
    /// Degraded.
    pub async fn wait_healthy(&self, timeout: Duration) -> Result<HyperConverged, UpgradeError> {
        let api = self.hcos.clone();
        let name = self.hco_name.clone();
        let hco = TimeoutSampler::new(format!("HyperConverged {} healthy", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = name.clone();
                async move {
                    match api.get(&name).await {
                        Ok(hco) if hco.is_healthy() => Ok(Some(hco)),
                        Ok(_) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        info!(hco = %self.hco_name, "HyperConverged healthy");
        Ok(hco)
    }

    /// Wait until the reported operator version changes away from
    /// `previous`. This is how tests detect the upgrade has landed.
    pub async fn wait_version_changed(
        &self,
        previous: &str,
        timeout: Duration,
    ) -> Result<String, UpgradeError> {
        let api = self.hcos.clone();
        let name = self.hco_name.clone();
        let previous = previous.to_string();
        let version = TimeoutSampler::new(
            format!("HyperConverged version moved off {}", previous),
            timeout,
        )
        .run(|| {
            let api = api.clone();
            let name = name.clone();
            let previous = previous.clone();
            async move {
                match api.get(&name).await {
                    Ok(hco) => Ok(hco
                        .operator_version()
                        .filter(|v| *v != previous)
                        .map(str::to_string)),
                    Err(e) => Err(e),
                }
            }
        })
        .await?;
        Ok(version)
    }

    /// Wait until every CSV in the namespace reports phase Succeeded.
    /// During an upgrade CSVs cycle through Pending/InstallReady/
    /// Replacing; all-Succeeded is the settled state.
    pub async fn wait_csvs_succeeded(&self, timeout: Duration) -> Result<(), UpgradeError> {
        let api = self.csvs.clone();
        TimeoutSampler::new("all ClusterServiceVersions Succeeded", timeout)
            .run(|| {
                let api = api.clone();
                async move {
                    let list = api.list(&ListParams::default()).await?;
                    let pending: Vec<_> = list
                        .items
                        .iter()
                        .filter(|csv| csv_phase(csv) != Some("Succeeded"))
                        .filter_map(|csv| csv.metadata.name.clone())
                        .collect();

                    if pending.is_empty() {
                        Ok::<_, kube::Error>(Some(()))
                    } else {
                        debug!(?pending, "CSVs not settled yet");
                        Ok(None)
                    }
                }
            })
            .await?;
        Ok(())
    }
}
