//! VirtualMachine lifecycle: build, create, start/stop/restart, migrate
//! and the waits between those steps.

use std::collections::BTreeMap;
use std::time::Duration;

use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::crd::datavolume::DataVolumeSpec;
use crate::crd::migration::{
    MigrationPhase, VirtualMachineInstanceMigration, VirtualMachineInstanceMigrationSpec,
};
use crate::crd::virtualmachine::{
    DataVolumeTemplateSpec, RunStrategy, TemplateMetadata, VirtualMachine, VirtualMachineSpec,
    VmiTemplate,
};
use crate::crd::virtualmachineinstance::{
    CloudInitNoCloudSource, ContainerDiskSource, CpuSpec, DataVolumeVolumeSource, DeviceSpec,
    Disk, DiskTarget, DomainSpec, Interface, MasqueradeBinding, MemorySpec, Network, PodNetwork,
    PvcVolumeSource, RngDevice, VirtualMachineInstance, VirtualMachineInstanceSpec, Volume,
    VmiPhase,
};
use crate::fixtures::unique_name;
use crate::sampler::{SamplerError, TimeoutSampler};

/// Conventional volume/disk names, shared with the virtctl helpers.
pub const ROOT_DISK: &str = "rootdisk";
pub const CLOUD_INIT_DISK: &str = "cloudinitdisk";

#[derive(Debug, Error)]
pub enum VmError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Wait(#[from] SamplerError),

    #[error("VMI {name} entered phase {phase} while waiting for Running")]
    VmiFailed { name: String, phase: VmiPhase },

    #[error("Migration of {vmi} failed: {reason}")]
    MigrationFailed { vmi: String, reason: String },

    #[error("VMI {name} reported no pod-network IP")]
    NoIpAddress { name: String },
}

/// Assembles a VirtualMachine with the defaults every test wants: one
/// masquerade pod interface, virtio buses, an RNG device and Halted
/// until the test starts it.
pub struct VmBuilder {
    name: String,
    memory: String,
    cpu_cores: u32,
    run_strategy: RunStrategy,
    disks: Vec<Disk>,
    volumes: Vec<Volume>,
    data_volume_templates: Vec<DataVolumeTemplateSpec>,
    labels: BTreeMap<String, String>,
    eviction_strategy: Option<String>,
}

impl VmBuilder {
    pub fn new(name: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("kubevirt.io/domain".to_string(), name.to_string());

        VmBuilder {
            name: name.to_string(),
            memory: "256Mi".to_string(),
            cpu_cores: 1,
            run_strategy: RunStrategy::Halted,
            disks: Vec::new(),
            volumes: Vec::new(),
            data_volume_templates: Vec::new(),
            labels,
            eviction_strategy: None,
        }
    }

    pub fn memory(mut self, memory: &str) -> Self {
        self.memory = memory.to_string();
        self
    }

    pub fn cpu_cores(mut self, cores: u32) -> Self {
        self.cpu_cores = cores;
        self
    }

    pub fn run_strategy(mut self, strategy: RunStrategy) -> Self {
        self.run_strategy = strategy;
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Required for live migration on most clusters.
    pub fn live_migratable(mut self) -> Self {
        self.eviction_strategy = Some("LiveMigrate".to_string());
        self
    }

    /// Boot from an ephemeral container disk.
    pub fn container_disk(mut self, image: &str) -> Self {
        self.push_disk(ROOT_DISK);
        self.volumes.push(Volume {
            name: ROOT_DISK.to_string(),
            container_disk: Some(ContainerDiskSource {
                image: image.to_string(),
            }),
            ..Default::default()
        });
        self
    }

    /// Boot from an existing DataVolume.
    pub fn data_volume_disk(mut self, dv_name: &str) -> Self {
        self.push_disk(ROOT_DISK);
        self.volumes.push(Volume {
            name: ROOT_DISK.to_string(),
            data_volume: Some(DataVolumeVolumeSource {
                name: dv_name.to_string(),
            }),
            ..Default::default()
        });
        self
    }

    /// Boot from an existing PVC.
    pub fn pvc_disk(mut self, claim_name: &str) -> Self {
        self.push_disk(ROOT_DISK);
        self.volumes.push(Volume {
            name: ROOT_DISK.to_string(),
            persistent_volume_claim: Some(PvcVolumeSource {
                claim_name: claim_name.to_string(),
            }),
            ..Default::default()
        });
        self
    }

    /// Boot from a DataVolume created and owned with the VM. The DV is
    /// provisioned by the VM controller, which is also what binds WFFC
    /// storage without extra annotations.
    pub fn data_volume_template(mut self, dv_name: &str, spec: DataVolumeSpec) -> Self {
        self.data_volume_templates.push(DataVolumeTemplateSpec {
            metadata: TemplateMetadata {
                name: Some(dv_name.to_string()),
                ..Default::default()
            },
            spec,
        });
        self.data_volume_disk(dv_name)
    }

    /// Attach cloud-init user data under the conventional volume name.
    pub fn cloud_init(mut self, user_data: &str) -> Self {
        self.push_disk(CLOUD_INIT_DISK);
        self.volumes.push(Volume {
            name: CLOUD_INIT_DISK.to_string(),
            cloud_init_no_cloud: Some(CloudInitNoCloudSource {
                user_data: Some(user_data.to_string()),
                network_data: None,
            }),
            ..Default::default()
        });
        self
    }

    fn push_disk(&mut self, name: &str) {
        self.disks.push(Disk {
            name: name.to_string(),
            disk: Some(DiskTarget {
                bus: Some("virtio".to_string()),
            }),
            ..Default::default()
        });
    }

    pub fn build(self) -> VirtualMachine {
        let spec = VirtualMachineSpec {
            running: None,
            run_strategy: Some(self.run_strategy),
            data_volume_templates: self.data_volume_templates,
            template: VmiTemplate {
                metadata: Some(TemplateMetadata {
                    labels: self.labels,
                    ..Default::default()
                }),
                spec: VirtualMachineInstanceSpec {
                    domain: DomainSpec {
                        cpu: Some(CpuSpec {
                            cores: Some(self.cpu_cores),
                            ..Default::default()
                        }),
                        memory: Some(MemorySpec {
                            guest: Some(self.memory),
                        }),
                        devices: DeviceSpec {
                            disks: self.disks,
                            interfaces: vec![Interface {
                                name: "default".to_string(),
                                masquerade: Some(MasqueradeBinding {}),
                                ..Default::default()
                            }],
                            rng: Some(RngDevice {}),
                            ..Default::default()
                        },
                        ..Default::default()
                    },
                    networks: vec![Network {
                        name: "default".to_string(),
                        pod: Some(PodNetwork {}),
                        ..Default::default()
                    }],
                    volumes: self.volumes,
                    termination_grace_period_seconds: Some(0),
                    eviction_strategy: self.eviction_strategy,
                    ..Default::default()
                },
            },
        };

        VirtualMachine::new(&self.name, spec)
    }
}

/// Namespaced handle for driving VMs and their VMIs.
pub struct VmManager {
    vms: Api<VirtualMachine>,
    vmis: Api<VirtualMachineInstance>,
    migrations: Api<VirtualMachineInstanceMigration>,
}

impl VmManager {
    pub fn new(client: &Client, namespace: &str) -> Self {
        VmManager {
            vms: Api::namespaced(client.clone(), namespace),
            vmis: Api::namespaced(client.clone(), namespace),
            migrations: Api::namespaced(client.clone(), namespace),
        }
    }

    pub async fn create(&self, vm: &VirtualMachine) -> Result<VirtualMachine, VmError> {
        let created = self.vms.create(&PostParams::default(), vm).await?;
        info!(vm = ?vm.metadata.name, "Created VirtualMachine");
        Ok(created)
    }

    pub async fn get(&self, name: &str) -> Result<VirtualMachine, VmError> {
        Ok(self.vms.get(name).await?)
    }

    pub async fn get_vmi(&self, name: &str) -> Result<VirtualMachineInstance, VmError> {
        Ok(self.vmis.get(name).await?)
    }

    /// Delete the VM, tolerating one that is already gone.
    pub async fn delete(&self, name: &str) -> Result<(), VmError> {
        match self.vms.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(vm = name, "Deleting VirtualMachine");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(vm = name, "VirtualMachine already gone");
                Ok(())
            }
            Err(e) => Err(VmError::Kube(e)),
        }
    }

    pub async fn delete_and_wait(&self, name: &str, timeout: Duration) -> Result<(), VmError> {
        self.delete(name).await?;
        let api = self.vms.clone();
        let vm_name = name.to_string();
        TimeoutSampler::new(format!("VirtualMachine {} removed", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = vm_name.clone();
                async move {
                    match api.get_opt(&name).await {
                        Ok(None) => Ok(Some(())),
                        Ok(Some(_)) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        Ok(())
    }

    /// Flip the run strategy to Always; the controller creates the VMI.
    pub async fn start(&self, name: &str) -> Result<(), VmError> {
        self.patch_run_strategy(name, RunStrategy::Always).await
    }

    /// Flip the run strategy to Halted; the controller tears the VMI down.
    pub async fn stop(&self, name: &str) -> Result<(), VmError> {
        self.patch_run_strategy(name, RunStrategy::Halted).await
    }

    async fn patch_run_strategy(&self, name: &str, strategy: RunStrategy) -> Result<(), VmError> {
        let patch = json!({"spec": {"runStrategy": strategy, "running": null}});
        self.vms
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        info!(vm = name, strategy = ?strategy, "Patched run strategy");
        Ok(())
    }

    /// Restart by deleting the VMI out from under an Always run
    /// strategy, then waiting for a replacement with a new UID to come
    /// back up.
    pub async fn restart(&self, name: &str, timeout: Duration) -> Result<(), VmError> {
        let old_uid = self.vmis.get(name).await?.metadata.uid;
        self.vmis.delete(name, &DeleteParams::default()).await?;
        info!(vmi = name, "Deleted VMI to force restart");

        let api = self.vmis.clone();
        let vmi_name = name.to_string();
        TimeoutSampler::new(format!("VMI {} recreated and Running", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = vmi_name.clone();
                let old_uid = old_uid.clone();
                async move {
                    match api.get_opt(&name).await {
                        Ok(Some(vmi)) if vmi.metadata.uid != old_uid && vmi.is_running() => {
                            Ok(Some(()))
                        }
                        Ok(_) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        Ok(())
    }

    /// Wait for status.ready on the VM, the controller's own rollup of
    /// "VMI exists and its Ready condition is true".
    pub async fn wait_ready(&self, name: &str, timeout: Duration) -> Result<VirtualMachine, VmError> {
        let api = self.vms.clone();
        let vm_name = name.to_string();
        let vm = TimeoutSampler::new(format!("VirtualMachine {} ready", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = vm_name.clone();
                async move {
                    match api.get(&name).await {
                        Ok(vm) if vm.is_ready() => Ok(Some(vm)),
                        Ok(_) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        Ok(vm)
    }

    /// Wait for the VMI to reach Running. A terminal Failed phase ends
    /// the wait early with an error instead of burning the budget.
    pub async fn wait_vmi_running(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<VirtualMachineInstance, VmError> {
        let api = self.vmis.clone();
        let vmi_name = name.to_string();
        let vmi = TimeoutSampler::new(format!("VMI {} phase Running", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = vmi_name.clone();
                async move {
                    match api.get_opt(&name).await {
                        Ok(Some(vmi))
                            if matches!(vmi.phase(), VmiPhase::Running | VmiPhase::Failed) =>
                        {
                            Ok(Some(vmi))
                        }
                        Ok(_) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;

        if vmi.phase() == VmiPhase::Failed {
            return Err(VmError::VmiFailed {
                name: name.to_string(),
                phase: VmiPhase::Failed,
            });
        }
        Ok(vmi)
    }

    /// Wait until the VMI object is gone, which is what "stopped" means
    /// at the API level.
    pub async fn wait_stopped(&self, name: &str, timeout: Duration) -> Result<(), VmError> {
        let api = self.vmis.clone();
        let vmi_name = name.to_string();
        TimeoutSampler::new(format!("VMI {} removed", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = vmi_name.clone();
                async move {
                    match api.get_opt(&name).await {
                        Ok(None) => Ok(Some(())),
                        Ok(Some(_)) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        Ok(())
    }

    /// Wait for the launcher to report a pod-network IP.
    pub async fn wait_for_ip(&self, name: &str, timeout: Duration) -> Result<String, VmError> {
        let api = self.vmis.clone();
        let vmi_name = name.to_string();
        let ip = TimeoutSampler::new(format!("VMI {} IP address", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = vmi_name.clone();
                async move {
                    match api.get(&name).await {
                        Ok(vmi) => Ok(vmi.primary_ip().map(str::to_string)),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        Ok(ip)
    }

    /// Live-migrate a running VMI and wait for the migration to finish.
    /// Returns the completed migration so callers can assert on
    /// source/target nodes.
    pub async fn migrate(
        &self,
        vmi_name: &str,
        timeout: Duration,
    ) -> Result<VirtualMachineInstanceMigration, VmError> {
        let migration = VirtualMachineInstanceMigration::new(
            &unique_name("migration"),
            VirtualMachineInstanceMigrationSpec {
                vmi_name: vmi_name.to_string(),
            },
        );
        let created = self.migrations.create(&PostParams::default(), &migration).await?;
        let migration_name = created
            .metadata
            .name
            .clone()
            .unwrap_or_else(|| "migration".to_string());
        info!(vmi = vmi_name, migration = %migration_name, "Started live migration");

        let api = self.migrations.clone();
        let name = migration_name.clone();
        let finished = TimeoutSampler::new(
            format!("migration {} of VMI {} finished", migration_name, vmi_name),
            timeout,
        )
        .run(|| {
            let api = api.clone();
            let name = name.clone();
            async move {
                match api.get(&name).await {
                    Ok(m)
                        if matches!(
                            m.phase(),
                            MigrationPhase::Succeeded | MigrationPhase::Failed
                        ) =>
                    {
                        Ok(Some(m))
                    }
                    Ok(_) => Ok(None),
                    Err(e) => Err(e),
                }
            }
        })
        .await?;

        if finished.phase() == MigrationPhase::Failed {
            let reason = finished
                .status
                .as_ref()
                .and_then(|s| s.migration_state.as_ref())
                .and_then(|m| m.end_timestamp.clone())
                .map(|t| format!("failed at {}", t))
                .unwrap_or_else(|| "phase Failed".to_string());
            return Err(VmError::MigrationFailed {
                vmi: vmi_name.to_string(),
                reason,
            });
        }
        Ok(finished)
    }
}

#[cfg(test)]
#[path = "vm_test.rs"]
mod tests;
