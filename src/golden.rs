//! Golden images: DataSources kept fresh by DataImportCrons, and VMs
//! cloned from them.

use std::time::Duration;

use kube::api::{Api, ListParams};
use kube::Client;
use thiserror::Error;
use tracing::info;

use crate::crd::goldenimage::{DataImportCron, DataSource};
use crate::crd::virtualmachine::VirtualMachine;
use crate::sampler::{SamplerError, TimeoutSampler};
use crate::storage::DataVolumeBuilder;
use crate::vm::VmBuilder;

#[derive(Debug, Error)]
pub enum GoldenImageError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Wait(#[from] SamplerError),

    #[error("No DataImportCron manages DataSource {0}")]
    NoCron(String),
}

/// Handle scoped to the golden-image namespace.
pub struct GoldenImages {
    data_sources: Api<DataSource>,
    crons: Api<DataImportCron>,
    namespace: String,
}

impl GoldenImages {
    pub fn new(client: &Client, namespace: &str) -> Self {
        GoldenImages {
            data_sources: Api::namespaced(client.clone(), namespace),
            crons: Api::namespaced(client.clone(), namespace),
            namespace: namespace.to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub async fn data_source(&self, name: &str) -> Result<DataSource, GoldenImageError> {
        Ok(self.data_sources.get(name).await?)
    }

    /// Names of DataSources whose Ready condition is true.
    pub async fn ready_data_sources(&self) -> Result<Vec<String>, GoldenImageError> {
        let list = self.data_sources.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .filter(DataSource::is_ready)
            .filter_map(|ds| ds.metadata.name)
            .collect())
    }

    /// Wait for a DataSource to become Ready. First-boot clusters can
    /// take a while: the initial cron import has to finish first.
    pub async fn wait_data_source_ready(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<DataSource, GoldenImageError> {
        let api = self.data_sources.clone();
        let ds_name = name.to_string();
        let ds = TimeoutSampler::new(format!("DataSource {} ready", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = ds_name.clone();
                async move {
                    match api.get(&name).await {
                        Ok(ds) if ds.is_ready() => Ok(Some(ds)),
                        Ok(_) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        Ok(ds)
    }

    /// The cron that manages a DataSource, matched by
    /// spec.managedDataSource.
    pub async fn cron_for(&self, data_source: &str) -> Result<DataImportCron, GoldenImageError> {
        let list = self.crons.list(&ListParams::default()).await?;
        list.items
            .into_iter()
            .find(|cron| cron.spec.managed_data_source == data_source)
            .ok_or_else(|| GoldenImageError::NoCron(data_source.to_string()))
    }

    /// Wait for a cron to report UpToDate, meaning its DataSource
    /// points at the newest import.
    pub async fn wait_cron_up_to_date(
        &self,
        cron_name: &str,
        timeout: Duration,
    ) -> Result<DataImportCron, GoldenImageError> {
        let api = self.crons.clone();
        let name = cron_name.to_string();
        let cron = TimeoutSampler::new(format!("DataImportCron {} up to date", cron_name), timeout)
            .run(|| {
                let api = api.clone();
                let name = name.clone();
                async move {
                    match api.get(&name).await {
                        Ok(cron) if cron.up_to_date() => Ok(Some(cron)),
                        Ok(_) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        info!(cron = cron_name, "DataImportCron up to date");
        Ok(cron)
    }
}

/// A VM whose root disk clones a golden-image DataSource. The clone
/// happens through a dataVolumeTemplate, so deleting the VM cleans up
/// the disk too.
pub fn golden_image_vm(
    vm_name: &str,
    data_source_namespace: &str,
    data_source: &str,
    size: &str,
) -> VirtualMachine {
    let dv_name = format!("{}-rootdisk", vm_name);
    let dv_spec = DataVolumeBuilder::new(&dv_name, size)
        .from_data_source(data_source_namespace, data_source)
        .build_spec();

    VmBuilder::new(vm_name)
        .memory("2Gi")
        .data_volume_template(&dv_name, dv_spec)
        .build()
}
