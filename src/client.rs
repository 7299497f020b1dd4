//! Cluster access: client construction and capability probes.

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::Api;
use kube::{Client, Config};
use thiserror::Error;
use tracing::{debug, info};

/// Dial timeout for the API server.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-request read timeout. Long waits are handled by polling, not by
/// holding requests open, so this stays short.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to infer kubeconfig: {0}")]
    Config(#[from] kube::config::InferConfigError),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// Build a client from the usual sources (KUBECONFIG, ~/.kube/config,
/// in-cluster service account) with explicit timeouts.
pub async fn create_client() -> Result<Client, ClientError> {
    let mut config = Config::infer().await?;
    config.connect_timeout = Some(CONNECT_TIMEOUT);
    config.read_timeout = Some(READ_TIMEOUT);

    let client = Client::try_from(config)?;
    info!(
        default_namespace = %client.default_namespace(),
        "Kubernetes client ready"
    );
    Ok(client)
}

/// Check whether a CRD is installed, by its full name
/// (e.g. "virtualmachines.kubevirt.io").
pub async fn crd_exists(client: &Client, name: &str) -> Result<bool, ClientError> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let found = crds.get_opt(name).await?.is_some();
    debug!(crd = name, found, "CRD probe");
    Ok(found)
}

/// KubeVirt's core CRD is installed.
pub async fn kubevirt_installed(client: &Client) -> Result<bool, ClientError> {
    crd_exists(client, "virtualmachines.kubevirt.io").await
}

/// CDI's DataVolume CRD is installed.
pub async fn cdi_installed(client: &Client) -> Result<bool, ClientError> {
    crd_exists(client, "datavolumes.cdi.kubevirt.io").await
}

/// VM snapshot/restore CRDs are installed.
pub async fn vm_snapshots_installed(client: &Client) -> Result<bool, ClientError> {
    crd_exists(client, "virtualmachinesnapshots.snapshot.kubevirt.io").await
}

/// The external-snapshotter CRDs are installed.
pub async fn volume_snapshots_installed(client: &Client) -> Result<bool, ClientError> {
    crd_exists(client, "volumesnapshotclasses.snapshot.storage.k8s.io").await
}
