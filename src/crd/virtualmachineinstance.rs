//! VirtualMachineInstance: the running guest created from a VirtualMachine.
//!
//! The domain, volume and network types here are shared with the
//! VirtualMachine template, so this module owns the whole VMI shape.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    plural = "virtualmachineinstances",
    shortname = "vmi",
    namespaced,
    status = "VirtualMachineInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    pub domain: DomainSpec,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Seconds the guest is given to shut down before being killed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub eviction_strategy: Option<String>,
}

/// Libvirt domain: cpu, memory and attached devices.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemorySpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineSpec>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    pub devices: DeviceSpec,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<FirmwareSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CpuSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cores: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sockets: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,

    /// CPU model exposed to the guest, e.g. "host-model".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemorySpec {
    /// Guest-visible memory, e.g. "1Gi".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
}

/// Kubernetes-style compute requests/limits keyed by resource name.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rng: Option<RngDevice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoattach_graphics_device: Option<bool>,
}

/// Virtio RNG device; present-or-absent, no fields.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct RngDevice {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Must match the name of a volume in the VMI spec.
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskTarget>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdrom: Option<CdromTarget>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiskTarget {
    /// Disk bus: "virtio", "sata" or "scsi".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CdromTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub masquerade: Option<MasqueradeBinding>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeBinding>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct MasqueradeBinding {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct BridgeBinding {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodNetwork>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub multus: Option<MultusNetwork>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodNetwork {}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultusNetwork {
    pub network_name: String,
}

/// Exactly one source field should be set per volume.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_disk: Option<ContainerDiskSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_volume: Option<DataVolumeVolumeSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<PvcVolumeSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_init_no_cloud: Option<CloudInitNoCloudSource>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub empty_disk: Option<EmptyDiskSource>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDiskSource {
    /// Ephemeral disk image, e.g. "quay.io/kubevirt/cirros-container-disk-demo".
    pub image: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeVolumeSource {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PvcVolumeSource {
    pub claim_name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitNoCloudSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_data: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDiskSource {
    /// Scratch disk size, e.g. "2Gi".
    pub capacity: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<VmiPhase>,

    /// Node the virt-launcher pod landed on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<VmiInterfaceStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_state: Option<MigrationState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_os_info: Option<GuestOsInfo>,

    /// Per-volume attachment state, including hotplugged volumes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_status: Vec<VolumeStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStatus {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Present only on hotplugged volumes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hotplug_volume: Option<HotplugVolumeStatus>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HotplugVolumeStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attach_pod_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub attach_pod_uid: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum VmiPhase {
    Pending,
    Scheduling,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for VmiPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VmiPhase::Pending => "Pending",
            VmiPhase::Scheduling => "Scheduling",
            VmiPhase::Scheduled => "Scheduled",
            VmiPhase::Running => "Running",
            VmiPhase::Succeeded => "Succeeded",
            VmiPhase::Failed => "Failed",
            VmiPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiInterfaceStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "ipAddress", skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    #[serde(rename = "ipAddresses", default, skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
}

/// Progress of the most recent live migration of this VMI.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_node: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_uid: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GuestOsInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_release: Option<String>,
}

impl VirtualMachineInstance {
    /// Phase from status, Unknown when status has not been populated yet.
    pub fn phase(&self) -> VmiPhase {
        self.status
            .as_ref()
            .and_then(|s| s.phase)
            .unwrap_or(VmiPhase::Unknown)
    }

    pub fn is_running(&self) -> bool {
        self.phase() == VmiPhase::Running
    }

    /// First pod-network IP reported by the guest agent or launcher.
    pub fn primary_ip(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .interfaces
            .iter()
            .find_map(|i| i.ip_address.as_deref())
    }
}
