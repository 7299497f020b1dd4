//! Storage provisioning: DataVolume construction and waits, storage
//! capability detection, and VM snapshot/restore.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::core::ApiResource;
use kube::Client;
use thiserror::Error;
use tracing::{debug, info};

use crate::crd::datavolume::{
    BlankSource, DataVolume, DataVolumePhase, DataVolumeSource, DataVolumeSourceRef,
    DataVolumeSpec, HttpSource, PvcSource, RegistrySource, SnapshotSource, StorageResources,
    StorageSpec, UploadSource,
};
use crate::crd::snapshot::{
    SnapshotTargetRef, VirtualMachineRestore, VirtualMachineRestoreSpec, VirtualMachineSnapshot,
    VirtualMachineSnapshotSpec,
};
use crate::crd::storageprofile::StorageProfile;
use crate::crd::{find_condition, Condition};
use crate::fixtures::unique_name;
use crate::sampler::{SamplerError, TimeoutSampler};

/// CDI annotation forcing a PVC to bind on a WaitForFirstConsumer class
/// even though no pod will consume it.
pub const BIND_IMMEDIATE_ANNOTATION: &str = "cdi.kubevirt.io/storage.bind.immediate.requested";

/// Marks the cluster's default StorageClass.
const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Wait(#[from] SamplerError),

    #[error("DataVolume {name} failed: {message}")]
    DataVolumeFailed { name: String, message: String },

    #[error("Snapshot {name} failed: {message}")]
    SnapshotFailed { name: String, message: String },

    #[error("Cluster has no default StorageClass and none was configured")]
    NoDefaultStorageClass,
}

/// Assembles DataVolumes around the storage API, which lets CDI's
/// storage profile fill in access modes and volume mode unless the test
/// pins them.
pub struct DataVolumeBuilder {
    name: String,
    size: String,
    source: Option<DataVolumeSource>,
    source_ref: Option<DataVolumeSourceRef>,
    storage_class: Option<String>,
    access_modes: Vec<String>,
    volume_mode: Option<String>,
    content_type: Option<String>,
    preallocation: Option<bool>,
    bind_immediate: bool,
}

impl DataVolumeBuilder {
    pub fn new(name: &str, size: &str) -> Self {
        DataVolumeBuilder {
            name: name.to_string(),
            size: size.to_string(),
            source: None,
            source_ref: None,
            storage_class: None,
            access_modes: Vec::new(),
            volume_mode: None,
            content_type: None,
            preallocation: None,
            bind_immediate: false,
        }
    }

    /// Empty disk, imported instantly. The cheapest way to exercise
    /// provisioning.
    pub fn blank(mut self) -> Self {
        self.source = Some(DataVolumeSource {
            blank: Some(BlankSource {}),
            ..Default::default()
        });
        self
    }

    pub fn http(mut self, url: &str) -> Self {
        self.source = Some(DataVolumeSource {
            http: Some(HttpSource {
                url: url.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        });
        self
    }

    pub fn registry(mut self, url: &str) -> Self {
        self.source = Some(DataVolumeSource {
            registry: Some(RegistrySource {
                url: Some(url.to_string()),
                pull_method: None,
            }),
            ..Default::default()
        });
        self
    }

    /// Clone an existing PVC; CDI picks host-assisted, snapshot or
    /// csi-clone per the storage profile.
    pub fn clone_pvc(mut self, namespace: &str, name: &str) -> Self {
        self.source = Some(DataVolumeSource {
            pvc: Some(PvcSource {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            ..Default::default()
        });
        self
    }

    pub fn clone_snapshot(mut self, namespace: &str, name: &str) -> Self {
        self.source = Some(DataVolumeSource {
            snapshot: Some(SnapshotSource {
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            ..Default::default()
        });
        self
    }

    /// Populated later via `virtctl image-upload`.
    pub fn upload(mut self) -> Self {
        self.source = Some(DataVolumeSource {
            upload: Some(UploadSource {}),
            ..Default::default()
        });
        self
    }

    /// Clone whatever a golden-image DataSource currently points at.
    pub fn from_data_source(mut self, namespace: &str, name: &str) -> Self {
        self.source_ref = Some(DataVolumeSourceRef {
            kind: "DataSource".to_string(),
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        });
        self
    }

    pub fn storage_class(mut self, name: &str) -> Self {
        self.storage_class = Some(name.to_string());
        self
    }

    pub fn access_mode(mut self, mode: &str) -> Self {
        self.access_modes.push(mode.to_string());
        self
    }

    pub fn volume_mode(mut self, mode: &str) -> Self {
        self.volume_mode = Some(mode.to_string());
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    pub fn preallocation(mut self, on: bool) -> Self {
        self.preallocation = Some(on);
        self
    }

    /// Annotate so a WFFC class binds without a consumer pod.
    pub fn bind_immediate(mut self) -> Self {
        self.bind_immediate = true;
        self
    }

    /// Spec alone, for embedding in a VM's dataVolumeTemplates.
    pub fn build_spec(&self) -> DataVolumeSpec {
        DataVolumeSpec {
            source: self.source.clone(),
            source_ref: self.source_ref.clone(),
            storage: Some(StorageSpec {
                access_modes: self.access_modes.clone(),
                volume_mode: self.volume_mode.clone(),
                storage_class_name: self.storage_class.clone(),
                resources: Some(StorageResources {
                    requests: [("storage".to_string(), self.size.clone())].into(),
                }),
            }),
            pvc: None,
            content_type: self.content_type.clone(),
            preallocation: self.preallocation,
        }
    }

    pub fn build(&self) -> DataVolume {
        let mut dv = DataVolume::new(&self.name, self.build_spec());
        if self.bind_immediate {
            let mut annotations = BTreeMap::new();
            annotations.insert(BIND_IMMEDIATE_ANNOTATION.to_string(), "true".to_string());
            dv.metadata.annotations = Some(annotations);
        }
        dv
    }
}

fn failure_message(name: &str, conditions: &[Condition]) -> String {
    find_condition(conditions, "Ready")
        .or_else(|| find_condition(conditions, "Running"))
        .and_then(|c| c.message.clone())
        .unwrap_or_else(|| format!("DataVolume {} reached phase Failed", name))
}

/// Namespaced handle for DataVolumes and the PVCs behind them.
pub struct DvManager {
    dvs: Api<DataVolume>,
    pvcs: Api<PersistentVolumeClaim>,
}

impl DvManager {
    pub fn new(client: &Client, namespace: &str) -> Self {
        DvManager {
            dvs: Api::namespaced(client.clone(), namespace),
            pvcs: Api::namespaced(client.clone(), namespace),
        }
    }

    pub async fn create(&self, dv: &DataVolume) -> Result<DataVolume, StorageError> {
        let created = self.dvs.create(&PostParams::default(), dv).await?;
        info!(datavolume = ?dv.metadata.name, "Created DataVolume");
        Ok(created)
    }

    pub async fn get(&self, name: &str) -> Result<DataVolume, StorageError> {
        Ok(self.dvs.get(name).await?)
    }

    pub async fn delete(&self, name: &str) -> Result<(), StorageError> {
        match self.dvs.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(datavolume = name, "Deleting DataVolume");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(datavolume = name, "DataVolume already gone");
                Ok(())
            }
            Err(e) => Err(StorageError::Kube(e)),
        }
    }

    pub async fn delete_and_wait(&self, name: &str, timeout: Duration) -> Result<(), StorageError> {
        self.delete(name).await?;
        let api = self.dvs.clone();
        let dv_name = name.to_string();
        TimeoutSampler::new(format!("DataVolume {} removed", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = dv_name.clone();
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

    /// Wait for Succeeded. Failed short-circuits with the condition
    /// message rather than waiting out the budget.
    pub async fn wait_until_succeeded(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<DataVolume, StorageError> {
        let dv = self.wait_for_terminal_phase(name, timeout).await?;
        if dv.phase() == DataVolumePhase::Failed {
            let conditions = dv
                .status
                .as_ref()
                .map(|s| s.conditions.as_slice())
                .unwrap_or_default();
            return Err(StorageError::DataVolumeFailed {
                name: name.to_string(),
                message: failure_message(name, conditions),
            });
        }
        Ok(dv)
    }

    async fn wait_for_terminal_phase(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<DataVolume, StorageError> {
        let api = self.dvs.clone();
        let dv_name = name.to_string();
        let dv = TimeoutSampler::new(format!("DataVolume {} phase Succeeded", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = dv_name.clone();
                async move {
                    match api.get(&name).await {
                        Ok(dv) if dv.phase().is_terminal() => Ok(Some(dv)),
                        Ok(dv) => {
                            debug!(
                                datavolume = %name,
                                phase = %dv.phase(),
                                progress = ?dv.status.as_ref().and_then(|s| s.progress.as_deref()),
                                "DataVolume still importing"
                            );
                            Ok(None)
                        }
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        Ok(dv)
    }

    /// Wait until the DataVolume either completed or parked itself
    /// waiting for a first consumer. The parked phases are the expected
    /// steady state for WFFC classes when no VM consumes the disk.
    pub async fn wait_until_ready_for_consumer(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<DataVolumePhase, StorageError> {
        let api = self.dvs.clone();
        let dv_name = name.to_string();
        let dv = TimeoutSampler::new(
            format!("DataVolume {} succeeded or awaiting consumer", name),
            timeout,
        )
        .run(|| {
            let api = api.clone();
            let name = dv_name.clone();
            async move {
                match api.get(&name).await {
                    Ok(dv)
                        if dv.phase().is_terminal() || dv.phase().is_pending_consumer() =>
                    {
                        Ok(Some(dv))
                    }
                    Ok(_) => Ok(None),
                    Err(e) => Err(e),
                }
            }
        })
        .await?;

        if dv.phase() == DataVolumePhase::Failed {
            let conditions = dv
                .status
                .as_ref()
                .map(|s| s.conditions.as_slice())
                .unwrap_or_default();
            return Err(StorageError::DataVolumeFailed {
                name: name.to_string(),
                message: failure_message(name, conditions),
            });
        }
        Ok(dv.phase())
    }

    pub async fn pvc(&self, name: &str) -> Result<PersistentVolumeClaim, StorageError> {
        Ok(self.pvcs.get(name).await?)
    }

    pub async fn pvc_bound(&self, name: &str) -> Result<bool, StorageError> {
        let pvc = self.pvcs.get(name).await?;
        Ok(pvc
            .status
            .and_then(|s| s.phase)
            .map(|p| p == "Bound")
            .unwrap_or(false))
    }
}

/// The cluster's default StorageClass, by annotation.
pub async fn default_storage_class(client: &Client) -> Result<Option<String>, StorageError> {
    let classes: Api<StorageClass> = Api::all(client.clone());
    let list = classes.list(&ListParams::default()).await?;
    Ok(list.items.into_iter().find_map(|sc| {
        let is_default = sc
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(DEFAULT_CLASS_ANNOTATION))
            .map(|v| v == "true")
            .unwrap_or(false);
        if is_default {
            sc.metadata.name
        } else {
            None
        }
    }))
}

/// Resolve the class a test should use: explicit config first, then the
/// cluster default.
pub async fn resolve_storage_class(
    client: &Client,
    configured: Option<&str>,
) -> Result<String, StorageError> {
    if let Some(name) = configured {
        return Ok(name.to_string());
    }
    default_storage_class(client)
        .await?
        .ok_or(StorageError::NoDefaultStorageClass)
}

/// Whether the class binds on first consumer rather than immediately.
pub async fn is_wffc(client: &Client, class: &str) -> Result<bool, StorageError> {
    let classes: Api<StorageClass> = Api::all(client.clone());
    let sc = classes.get(class).await?;
    Ok(sc.volume_binding_mode.as_deref() == Some("WaitForFirstConsumer"))
}

/// CDI's capability report for a class. Profiles are named after their
/// StorageClass.
pub async fn storage_profile(client: &Client, class: &str) -> Result<StorageProfile, StorageError> {
    let profiles: Api<StorageProfile> = Api::all(client.clone());
    Ok(profiles.get(class).await?)
}

fn volume_snapshot_class_resource() -> ApiResource {
    ApiResource {
        group: "snapshot.storage.k8s.io".to_string(),
        version: "v1".to_string(),
        api_version: "snapshot.storage.k8s.io/v1".to_string(),
        kind: "VolumeSnapshotClass".to_string(),
        plural: "volumesnapshotclasses".to_string(),
    }
}

/// `driver` field of a VolumeSnapshotClass fetched dynamically.
fn snapshot_class_driver(class: &DynamicObject) -> Option<&str> {
    class.data.get("driver").and_then(|d| d.as_str())
}

/// Find a VolumeSnapshotClass whose driver matches the provisioner.
/// None means the class cannot do CSI snapshots, which downgrades
/// snapshot tests and smart cloning.
pub async fn snapshot_class_for_provisioner(
    client: &Client,
    provisioner: &str,
) -> Result<Option<String>, StorageError> {
    let api: Api<DynamicObject> =
        Api::all_with(client.clone(), &volume_snapshot_class_resource());
    let list = api.list(&ListParams::default()).await?;
    Ok(list
        .items
        .into_iter()
        .find(|c| snapshot_class_driver(c) == Some(provisioner))
        .and_then(|c| c.metadata.name))
}

/// Whether VM snapshots can work on this class: its provisioner has a
/// matching VolumeSnapshotClass.
pub async fn class_supports_snapshots(client: &Client, class: &str) -> Result<bool, StorageError> {
    let profile = storage_profile(client, class).await?;
    let Some(provisioner) = profile.provisioner() else {
        return Ok(false);
    };
    Ok(snapshot_class_for_provisioner(client, provisioner)
        .await?
        .is_some())
}

/// Namespaced handle for VM snapshot and restore objects.
pub struct SnapshotManager {
    snapshots: Api<VirtualMachineSnapshot>,
    restores: Api<VirtualMachineRestore>,
}

impl SnapshotManager {
    pub fn new(client: &Client, namespace: &str) -> Self {
        SnapshotManager {
            snapshots: Api::namespaced(client.clone(), namespace),
            restores: Api::namespaced(client.clone(), namespace),
        }
    }

    /// Snapshot a VM and wait until the snapshot is usable. Online
    /// snapshots are fine; KubeVirt freezes the guest when it can.
    pub async fn snapshot_vm(
        &self,
        vm_name: &str,
        timeout: Duration,
    ) -> Result<VirtualMachineSnapshot, StorageError> {
        let snapshot = VirtualMachineSnapshot::new(
            &unique_name(&format!("snap-{}", vm_name)),
            VirtualMachineSnapshotSpec {
                source: SnapshotTargetRef::virtual_machine(vm_name),
                failure_deadline: None,
            },
        );
        let created = self.snapshots.create(&PostParams::default(), &snapshot).await?;
        let name = created.metadata.name.clone().unwrap_or_default();
        info!(vm = vm_name, snapshot = %name, "Created VirtualMachineSnapshot");

        let api = self.snapshots.clone();
        let snap_name = name.clone();
        let done = TimeoutSampler::new(format!("snapshot {} ready to use", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = snap_name.clone();
                async move {
                    match api.get(&name).await {
                        Ok(s) if s.ready_to_use() || s.failed() => Ok(Some(s)),
                        Ok(_) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;

        if done.failed() {
            let message = done
                .status
                .as_ref()
                .and_then(|s| s.error.as_ref())
                .and_then(|e| e.message.clone())
                .unwrap_or_else(|| "phase Failed".to_string());
            return Err(StorageError::SnapshotFailed { name, message });
        }
        Ok(done)
    }

    /// Roll a (stopped) VM back to a snapshot and wait for completion.
    pub async fn restore_vm(
        &self,
        vm_name: &str,
        snapshot_name: &str,
        timeout: Duration,
    ) -> Result<VirtualMachineRestore, StorageError> {
        let restore = VirtualMachineRestore::new(
            &unique_name(&format!("restore-{}", vm_name)),
            VirtualMachineRestoreSpec {
                target: SnapshotTargetRef::virtual_machine(vm_name),
                virtual_machine_snapshot_name: snapshot_name.to_string(),
            },
        );
        let created = self.restores.create(&PostParams::default(), &restore).await?;
        let name = created.metadata.name.clone().unwrap_or_default();
        info!(vm = vm_name, restore = %name, "Created VirtualMachineRestore");

        let api = self.restores.clone();
        let restore_name = name.clone();
        let done = TimeoutSampler::new(format!("restore {} complete", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = restore_name.clone();
                async move {
                    match api.get(&name).await {
                        Ok(r) if r.complete() => Ok(Some(r)),
                        Ok(_) => Ok(None),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        Ok(done)
    }

    pub async fn delete_snapshot(&self, name: &str) -> Result<(), StorageError> {
        match self.snapshots.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(StorageError::Kube(e)),
        }
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
