//! Test fixtures: uniquely named namespaces with explicit teardown.
//!
//! Namespaces are created up front and deleted by the test when it is
//! done. Teardown is deliberate rather than Drop-based so a failed test
//! can leave its namespace behind for inspection when
//! cluster.teardown=false.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::Client;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::sampler::{SamplerError, TimeoutSampler};

/// Label stamped on every namespace the suite creates, so leftovers
/// from crashed runs are easy to find and sweep.
pub const TEST_NAMESPACE_LABEL: &str = "virtcheck.io/test-namespace";

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Wait(#[from] SamplerError),
}

/// Unique DNS-safe name: prefix plus a short random suffix.
pub fn unique_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &suffix[..8])
}

/// A namespace owned by one test.
pub struct TestNamespace {
    client: Client,
    name: String,
}

impl TestNamespace {
    /// Create a fresh namespace. VM pods need the privileged
    /// pod-security profile, so the labels are set at creation.
    pub async fn create(client: &Client, prefix: &str) -> Result<Self, FixtureError> {
        let name = unique_name(prefix);

        let mut labels = BTreeMap::new();
        labels.insert(TEST_NAMESPACE_LABEL.to_string(), "true".to_string());
        labels.insert(
            "pod-security.kubernetes.io/enforce".to_string(),
            "privileged".to_string(),
        );
        labels.insert(
            "security.openshift.io/scc.podSecurityLabelSync".to_string(),
            "false".to_string(),
        );

        let mut annotations = BTreeMap::new();
        annotations.insert(
            "virtcheck.io/created-at".to_string(),
            chrono::Utc::now().to_rfc3339(),
        );

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(labels),
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        };

        let api: Api<Namespace> = Api::all(client.clone());
        api.create(&PostParams::default(), &namespace).await?;
        info!(namespace = %name, "Created test namespace");

        Ok(TestNamespace {
            client: client.clone(),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Request deletion. Already-gone namespaces are fine: teardown
    /// must be idempotent.
    pub async fn delete(&self) -> Result<(), FixtureError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(&self.name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(namespace = %self.name, "Deleting test namespace");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(namespace = %self.name, "Namespace already gone");
                Ok(())
            }
            Err(e) => Err(FixtureError::Kube(e)),
        }
    }

    /// Delete and block until the namespace is fully removed, which is
    /// what tests that re-check cluster-scoped state need. VM teardown
    /// can keep a namespace Terminating for a while.
    pub async fn delete_and_wait(
        &self,
        timeout: std::time::Duration,
    ) -> Result<(), FixtureError> {
        self.delete().await?;

        let api: Api<Namespace> = Api::all(self.client.clone());
        let name = self.name.clone();
        TimeoutSampler::new(format!("namespace {} removed", name), timeout)
            .run(|| {
                let api = api.clone();
                let name = name.clone();
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names_carry_prefix_and_differ() {
        let a = unique_name("vm-lifecycle");
        let b = unique_name("vm-lifecycle");

        assert!(a.starts_with("vm-lifecycle-"));
        assert_ne!(a, b);
        // DNS-1123: lowercase alphanumerics and hyphens only.
        assert!(a
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn unique_name_suffix_is_short() {
        let name = unique_name("dv");
        assert_eq!(name.len(), "dv".len() + 1 + 8);
    }
}
