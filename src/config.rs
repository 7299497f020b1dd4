//! Suite configuration loaded from config.toml.
//!
//! Everything has a default tuned for a stock CNV installation, so an
//! empty file (or none at all, via [`TestConfig::load_or_default`]) is
//! enough to run against a throwaway cluster. Real runs override the
//! storage matrix and image catalog for the environment under test.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "VIRTCHECK_CONFIG";

/// Default config path, relative to the crate root cargo runs tests from.
pub const DEFAULT_CONFIG_PATH: &str = "tests/config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    pub cluster: ClusterSettings,
    pub storage: StorageSettings,
    pub images: ImageCatalog,
    pub timeouts: Timeouts,
    pub prometheus: PrometheusSettings,
    pub virtctl: VirtctlSettings,
}

impl TestConfig {
    /// Load from VIRTCHECK_CONFIG or tests/config.toml.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Like [`TestConfig::load`], but a missing file falls back to
    /// defaults. Parse errors still fail: a broken file should never
    /// silently run with defaults.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        match Self::load() {
            Ok(config) => Ok(config),
            Err(ConfigError::Read { path, source })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                warn!(path, "No config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Namespace the HyperConverged operator runs in.
    pub hco_namespace: String,

    /// Namespace golden images and their DataSources live in.
    pub golden_image_namespace: String,

    /// Delete test namespaces after each test. Turn off to debug leftovers.
    pub teardown: bool,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings {
            hco_namespace: "openshift-cnv".to_string(),
            golden_image_namespace: "openshift-virtualization-os-images".to_string(),
            teardown: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Storage classes the matrix tests run against. Empty means
    /// "discover the cluster default and use only that".
    pub classes: Vec<StorageClassEntry>,

    /// Class used when a test needs exactly one; falls back to the
    /// cluster default when unset.
    pub default_class: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageClassEntry {
    pub name: String,

    /// Access modes to request. Empty lets the storage profile decide.
    pub access_modes: Vec<String>,

    pub volume_mode: Option<String>,
}

impl Default for StorageClassEntry {
    fn default() -> Self {
        StorageClassEntry {
            name: String::new(),
            access_modes: Vec::new(),
            volume_mode: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImageCatalog {
    /// Tiny ephemeral guest for lifecycle tests.
    pub cirros_container_disk: String,

    /// HTTP import source for DataVolume tests.
    pub cirros_http_url: String,

    /// Credentials for `virtctl ssh` into the cirros guest.
    pub cirros_username: String,
    pub cirros_password: String,

    /// Golden-image DataSources expected on the cluster.
    pub os_images: Vec<OsImage>,
}

impl Default for ImageCatalog {
    fn default() -> Self {
        ImageCatalog {
            cirros_container_disk: "quay.io/kubevirt/cirros-container-disk-demo:latest"
                .to_string(),
            cirros_http_url:
                "https://download.cirros-cloud.net/0.6.2/cirros-0.6.2-x86_64-disk.img"
                    .to_string(),
            cirros_username: "cirros".to_string(),
            cirros_password: "gocubsgo".to_string(),
            os_images: vec![OsImage {
                name: "fedora".to_string(),
                data_source: "fedora".to_string(),
                size: "30Gi".to_string(),
            }],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsImage {
    /// Short name used in test resource names.
    pub name: String,

    /// DataSource name in the golden-image namespace.
    pub data_source: String,

    /// Disk size for VMs cloned from this image.
    pub size: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub vm_ready_secs: u64,
    pub vmi_running_secs: u64,
    pub dv_succeeded_secs: u64,
    pub snapshot_ready_secs: u64,
    pub restore_complete_secs: u64,
    pub migration_secs: u64,
    pub alert_firing_secs: u64,
    pub metric_present_secs: u64,
    pub deletion_secs: u64,

    /// Budget for an externally-driven operator upgrade to land.
    pub upgrade_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            vm_ready_secs: 600,
            vmi_running_secs: 300,
            dv_succeeded_secs: 1800,
            snapshot_ready_secs: 300,
            restore_complete_secs: 300,
            migration_secs: 600,
            alert_firing_secs: 600,
            metric_present_secs: 300,
            deletion_secs: 120,
            upgrade_secs: 3600,
        }
    }
}

impl Timeouts {
    pub fn vm_ready(&self) -> Duration {
        Duration::from_secs(self.vm_ready_secs)
    }

    pub fn vmi_running(&self) -> Duration {
        Duration::from_secs(self.vmi_running_secs)
    }

    pub fn dv_succeeded(&self) -> Duration {
        Duration::from_secs(self.dv_succeeded_secs)
    }

    pub fn snapshot_ready(&self) -> Duration {
        Duration::from_secs(self.snapshot_ready_secs)
    }

    pub fn restore_complete(&self) -> Duration {
        Duration::from_secs(self.restore_complete_secs)
    }

    pub fn migration(&self) -> Duration {
        Duration::from_secs(self.migration_secs)
    }

    pub fn alert_firing(&self) -> Duration {
        Duration::from_secs(self.alert_firing_secs)
    }

    pub fn metric_present(&self) -> Duration {
        Duration::from_secs(self.metric_present_secs)
    }

    pub fn deletion(&self) -> Duration {
        Duration::from_secs(self.deletion_secs)
    }

    pub fn upgrade(&self) -> Duration {
        Duration::from_secs(self.upgrade_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrometheusSettings {
    /// Explicit query URL. Set it to skip route discovery, e.g. when
    /// port-forwarding to the querier.
    pub url: Option<String>,

    /// Route the query API is discovered from when no URL is set.
    pub route_namespace: String,
    pub route_name: String,

    /// Env var holding a bearer token. When the var is unset the
    /// observability tests skip rather than query unauthenticated.
    pub token_env: String,

    /// Test clusters usually run with self-signed certs.
    pub insecure_skip_tls_verify: bool,
}

impl Default for PrometheusSettings {
    fn default() -> Self {
        PrometheusSettings {
            url: None,
            route_namespace: "openshift-monitoring".to_string(),
            route_name: "thanos-querier".to_string(),
            token_env: "VIRTCHECK_PROM_TOKEN".to_string(),
            insecure_skip_tls_verify: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VirtctlSettings {
    /// Binary name or path; must be on PATH when not absolute.
    pub binary: String,

    pub command_timeout_secs: u64,

    /// Retries for commands that race VMI startup.
    pub retries: u32,
}

impl Default for VirtctlSettings {
    fn default() -> Self {
        VirtctlSettings {
            binary: "virtctl".to_string(),
            command_timeout_secs: 120,
            retries: 3,
        }
    }
}

impl VirtctlSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
