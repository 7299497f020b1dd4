//! Preflight: verify a cluster is ready for the e2e suite before
//! burning an hour finding out the hard way.
//!
//! Checks run in order and all of them run even after a failure, so one
//! report covers everything that needs fixing. Exit code 1 when any
//! required check fails.

use async_trait::async_trait;
use kube::Client;
use tracing::{error, info, warn};

use virtcheck::client;
use virtcheck::config::TestConfig;
use virtcheck::crd::hyperconverged::{HCO_NAME, HyperConverged};
use virtcheck::golden::GoldenImages;
use virtcheck::prometheus::PrometheusClient;
use virtcheck::storage;
use virtcheck::virtctl::Virtctl;

enum Outcome {
    Pass(String),
    Fail(String),
    /// Non-fatal: the suite degrades (skips) without this.
    Warn(String),
}

#[async_trait]
trait Check: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, client: &Client, config: &TestConfig) -> Outcome;
}

struct CrdsInstalled;

#[async_trait]
impl Check for CrdsInstalled {
    fn name(&self) -> &str {
        "virtualization CRDs"
    }

    async fn run(&self, client: &Client, _config: &TestConfig) -> Outcome {
        let kubevirt = match client::kubevirt_installed(client).await {
            Ok(found) => found,
            Err(e) => return Outcome::Fail(format!("API error: {}", e)),
        };
        if !kubevirt {
            return Outcome::Fail("virtualmachines.kubevirt.io missing; is CNV installed?".into());
        }
        match client::cdi_installed(client).await {
            Ok(true) => Outcome::Pass("kubevirt.io and cdi.kubevirt.io present".into()),
            Ok(false) => Outcome::Fail("datavolumes.cdi.kubevirt.io missing".into()),
            Err(e) => Outcome::Fail(format!("API error: {}", e)),
        }
    }
}

struct SnapshotCrdsInstalled;

#[async_trait]
impl Check for SnapshotCrdsInstalled {
    fn name(&self) -> &str {
        "snapshot CRDs"
    }

    async fn run(&self, client: &Client, _config: &TestConfig) -> Outcome {
        let vm_snapshots = match client::vm_snapshots_installed(client).await {
            Ok(found) => found,
            Err(e) => return Outcome::Warn(format!("API error: {}", e)),
        };
        let volume_snapshots = match client::volume_snapshots_installed(client).await {
            Ok(found) => found,
            Err(e) => return Outcome::Warn(format!("API error: {}", e)),
        };
        match (vm_snapshots, volume_snapshots) {
            (true, true) => Outcome::Pass("snapshot.kubevirt.io and external-snapshotter present".into()),
            (false, _) => Outcome::Warn(
                "virtualmachinesnapshots.snapshot.kubevirt.io missing; snapshot tests will skip"
                    .into(),
            ),
            (_, false) => Outcome::Warn(
                "volumesnapshotclasses.snapshot.storage.k8s.io missing; snapshot tests will skip"
                    .into(),
            ),
        }
    }
}

struct HcoHealthy;

#[async_trait]
impl Check for HcoHealthy {
    fn name(&self) -> &str {
        "HyperConverged health"
    }

    async fn run(&self, client: &Client, config: &TestConfig) -> Outcome {
        let api: kube::Api<HyperConverged> =
            kube::Api::namespaced(client.clone(), &config.cluster.hco_namespace);
        match api.get_opt(HCO_NAME).await {
            Ok(Some(hco)) if hco.is_healthy() => {
                let version = hco.operator_version().unwrap_or("unknown").to_string();
                Outcome::Pass(format!("healthy, operator version {}", version))
            }
            Ok(Some(_)) => Outcome::Fail("HCO exists but is not Available/settled".into()),
            Ok(None) => Outcome::Fail(format!(
                "no HyperConverged {} in {}",
                HCO_NAME, config.cluster.hco_namespace
            )),
            Err(e) => Outcome::Fail(format!("API error: {}", e)),
        }
    }
}

struct StorageReady;

#[async_trait]
impl Check for StorageReady {
    fn name(&self) -> &str {
        "storage classes"
    }

    async fn run(&self, client: &Client, config: &TestConfig) -> Outcome {
        match storage::resolve_storage_class(client, config.storage.default_class.as_deref())
            .await
        {
            Ok(class) => {
                let snapshots = storage::class_supports_snapshots(client, &class)
                    .await
                    .unwrap_or(false);
                if snapshots {
                    Outcome::Pass(format!("{} (snapshot capable)", class))
                } else {
                    Outcome::Warn(format!(
                        "{} has no VolumeSnapshotClass; snapshot tests will skip",
                        class
                    ))
                }
            }
            Err(e) => Outcome::Fail(e.to_string()),
        }
    }
}

struct GoldenImagesReady;

#[async_trait]
impl Check for GoldenImagesReady {
    fn name(&self) -> &str {
        "golden images"
    }

    async fn run(&self, client: &Client, config: &TestConfig) -> Outcome {
        let golden = GoldenImages::new(client, &config.cluster.golden_image_namespace);
        match golden.ready_data_sources().await {
            Ok(ready) if ready.is_empty() => {
                Outcome::Warn("no ready DataSources; golden-image tests will skip".into())
            }
            Ok(ready) => Outcome::Pass(format!("{} ready: {}", ready.len(), ready.join(", "))),
            Err(e) => Outcome::Warn(format!(
                "cannot list DataSources ({}); golden-image tests will skip",
                e
            )),
        }
    }
}

struct VirtctlPresent;

#[async_trait]
impl Check for VirtctlPresent {
    fn name(&self) -> &str {
        "virtctl binary"
    }

    async fn run(&self, _client: &Client, config: &TestConfig) -> Outcome {
        let virtctl = Virtctl::new(&config.virtctl);
        match virtctl.version().await {
            Ok(version) => Outcome::Pass(version.lines().next().unwrap_or("ok").to_string()),
            Err(e) => Outcome::Fail(format!("{}", e)),
        }
    }
}

struct PrometheusReachable;

#[async_trait]
impl Check for PrometheusReachable {
    fn name(&self) -> &str {
        "prometheus endpoint"
    }

    async fn run(&self, client: &Client, config: &TestConfig) -> Outcome {
        match PrometheusClient::discover(client, &config.prometheus).await {
            Ok(prom) => match prom.query("vector(1)").await {
                Ok(_) => Outcome::Pass("thanos-querier answers queries".into()),
                Err(e) => Outcome::Fail(format!("endpoint found but query failed: {}", e)),
            },
            Err(e) => Outcome::Warn(format!(
                "not reachable ({}); observability tests will skip",
                e
            )),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Running virtcheck preflight");

    let config = TestConfig::load_or_default()?;
    let client = client::create_client().await?;

    let checks: Vec<Box<dyn Check>> = vec![
        Box::new(CrdsInstalled),
        Box::new(SnapshotCrdsInstalled),
        Box::new(HcoHealthy),
        Box::new(StorageReady),
        Box::new(GoldenImagesReady),
        Box::new(VirtctlPresent),
        Box::new(PrometheusReachable),
    ];

    let mut failures = 0;
    for check in &checks {
        match check.run(&client, &config).await {
            Outcome::Pass(detail) => info!(check = check.name(), "PASS: {}", detail),
            Outcome::Warn(detail) => warn!(check = check.name(), "WARN: {}", detail),
            Outcome::Fail(detail) => {
                error!(check = check.name(), "FAIL: {}", detail);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        error!(failures, "Preflight failed");
        std::process::exit(1);
    }

    info!("Preflight passed");
    Ok(())
}
