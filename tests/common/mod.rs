//! Shared harness for the e2e suites.
//!
//! Every cluster-facing test is #[ignore]d and additionally gated on
//! VIRTCHECK_E2E, so a plain `cargo test` stays green on machines with
//! no cluster.

#![allow(dead_code)] // Shared across test targets; not every target uses every helper

use virtcheck::client;
use virtcheck::config::TestConfig;
use virtcheck::fixtures::TestNamespace;
use virtcheck::storage;

/// Cluster tests run only when VIRTCHECK_E2E is set.
pub fn e2e_enabled() -> bool {
    std::env::var("VIRTCHECK_E2E").is_ok()
}

pub fn upgrade_tests_enabled() -> bool {
    std::env::var("VIRTCHECK_RUN_UPGRADE_TESTS").is_ok()
}

pub fn stress_tests_enabled() -> bool {
    std::env::var("VIRTCHECK_RUN_STRESS_TESTS").is_ok()
}

/// Config plus a connected client, the two things every test needs.
pub struct Harness {
    pub client: kube::Client,
    pub config: TestConfig,
}

pub async fn harness() -> Harness {
    let config = TestConfig::load_or_default().expect("Failed to load test config");
    let client = client::create_client()
        .await
        .expect("Failed to connect to cluster");
    Harness { client, config }
}

impl Harness {
    pub async fn namespace(&self, prefix: &str) -> TestNamespace {
        TestNamespace::create(&self.client, prefix)
            .await
            .expect("Failed to create test namespace")
    }

    /// Delete the namespace unless the config says to keep leftovers
    /// for debugging. Deletion is requested, not awaited: VM teardown
    /// can hold a namespace Terminating for minutes.
    pub async fn teardown(&self, namespace: &TestNamespace) {
        if self.config.cluster.teardown {
            namespace
                .delete()
                .await
                .expect("Failed to delete test namespace");
        } else {
            println!("⏭️  Keeping namespace {} (teardown disabled)", namespace.name());
        }
    }

    /// The storage class tests should use: configured default first,
    /// cluster default otherwise.
    pub async fn storage_class(&self) -> String {
        storage::resolve_storage_class(&self.client, self.config.storage.default_class.as_deref())
            .await
            .expect("No usable storage class")
    }
}
