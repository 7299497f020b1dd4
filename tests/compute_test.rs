//! VM compute lifecycle tests.
//!
//! Run with: VIRTCHECK_E2E=1 cargo test --test compute_test -- --ignored --nocapture
//!
//! Requirements:
//! - A cluster with CNV/KubeVirt installed
//! - virtctl on PATH (for the virtctl-driven cases)
//! - Two schedulable nodes for the live migration case

#![allow(clippy::expect_used)] // e2e tests use expect for clarity

mod common;

use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use virtcheck::crd::virtualmachine::RunStrategy;
use virtcheck::crd::{condition_true, virtualmachineinstance::VmiPhase};
use virtcheck::fixtures::unique_name;
use virtcheck::sampler::TimeoutSampler;
use virtcheck::virtctl::Virtctl;
use virtcheck::vm::{VmBuilder, VmManager};

// =============================================================================
// HELPERS
// =============================================================================

async fn schedulable_nodes(client: &kube::Client) -> usize {
    let nodes: Api<Node> = Api::all(client.clone());
    nodes
        .list(&ListParams::default())
        .await
        .map(|list| {
            list.items
                .iter()
                .filter(|n| {
                    n.spec
                        .as_ref()
                        .map(|s| s.unschedulable != Some(true))
                        .unwrap_or(true)
                })
                .count()
        })
        .unwrap_or(0)
}

// =============================================================================
// LIFECYCLE
// =============================================================================

#[tokio::test]
#[ignore]
async fn test_vm_boots_stops_and_restarts() {
    if !common::e2e_enabled() {
        return;
    }

    let h = common::harness().await;
    let ns = h.namespace("compute-lifecycle").await;
    let vms = VmManager::new(&h.client, ns.name());

    let name = unique_name("cirros");
    println!("🚀 Booting {}", name);

    let vm = VmBuilder::new(&name)
        .container_disk(&h.config.images.cirros_container_disk)
        .memory("128Mi")
        .build();
    vms.create(&vm).await.expect("VM create");

    // Halted at creation: no VMI yet, printable status reflects it.
    let created = vms.get(&name).await.expect("VM get");
    assert!(!created.is_ready());

    vms.start(&name).await.expect("VM start");
    let ready = vms
        .wait_ready(&name, h.config.timeouts.vm_ready())
        .await
        .expect("VM ready");
    assert_eq!(ready.printable_status(), "Running");

    let vmi = vms
        .wait_vmi_running(&name, h.config.timeouts.vmi_running())
        .await
        .expect("VMI running");
    assert_eq!(vmi.phase(), VmiPhase::Running);

    let ip = vms
        .wait_for_ip(&name, h.config.timeouts.vmi_running())
        .await
        .expect("VMI IP");
    println!("  VMI up at {}", ip);

    println!("🔁 Restarting {}", name);
    vms.restart(&name, h.config.timeouts.vm_ready())
        .await
        .expect("VM restart");

    println!("🛑 Stopping {}", name);
    vms.stop(&name).await.expect("VM stop");
    vms.wait_stopped(&name, h.config.timeouts.vm_ready())
        .await
        .expect("VMI torn down");

    // The VM object survives a stop; only the VMI goes away.
    let stopped = vms.get(&name).await.expect("VM get after stop");
    assert!(!stopped.is_ready());

    vms.delete_and_wait(&name, h.config.timeouts.deletion())
        .await
        .expect("VM delete");
    h.teardown(&ns).await;
    println!("✅ Lifecycle complete for {}", name);
}

#[tokio::test]
#[ignore]
async fn test_manual_run_strategy_follows_virtctl() {
    if !common::e2e_enabled() {
        return;
    }

    let h = common::harness().await;
    let ns = h.namespace("compute-manual").await;
    let vms = VmManager::new(&h.client, ns.name());
    let virtctl = Virtctl::new(&h.config.virtctl);

    let name = unique_name("manual");
    let vm = VmBuilder::new(&name)
        .container_disk(&h.config.images.cirros_container_disk)
        .memory("128Mi")
        .run_strategy(RunStrategy::Manual)
        .build();
    vms.create(&vm).await.expect("VM create");

    println!("▶️  virtctl start {}", name);
    virtctl.start(ns.name(), &name).await.expect("virtctl start");
    vms.wait_vmi_running(&name, h.config.timeouts.vmi_running())
        .await
        .expect("VMI running after virtctl start");

    println!("⏹️  virtctl stop {}", name);
    virtctl.stop(ns.name(), &name).await.expect("virtctl stop");
    vms.wait_stopped(&name, h.config.timeouts.vm_ready())
        .await
        .expect("VMI gone after virtctl stop");

    h.teardown(&ns).await;
    println!("✅ Manual strategy honored virtctl start/stop");
}

#[tokio::test]
#[ignore]
async fn test_pause_sets_the_paused_condition() {
    if !common::e2e_enabled() {
        return;
    }

    let h = common::harness().await;
    let ns = h.namespace("compute-pause").await;
    let vms = VmManager::new(&h.client, ns.name());
    let virtctl = Virtctl::new(&h.config.virtctl);

    let name = unique_name("pausable");
    let vm = VmBuilder::new(&name)
        .container_disk(&h.config.images.cirros_container_disk)
        .memory("128Mi")
        .run_strategy(RunStrategy::Always)
        .build();
    vms.create(&vm).await.expect("VM create");
    vms.wait_vmi_running(&name, h.config.timeouts.vmi_running())
        .await
        .expect("VMI running");

    virtctl.pause(ns.name(), &name).await.expect("virtctl pause");

    let vmis = kube::Api::<virtcheck::crd::virtualmachineinstance::VirtualMachineInstance>::namespaced(
        h.client.clone(),
        ns.name(),
    );
    let vmi_name = name.clone();
    TimeoutSampler::new(format!("VMI {} Paused condition", name), h.config.timeouts.vmi_running())
        .run(|| {
            let api = vmis.clone();
            let name = vmi_name.clone();
            async move {
                match api.get(&name).await {
                    Ok(vmi) => {
                        let paused = vmi
                            .status
                            .as_ref()
                            .map(|s| condition_true(&s.conditions, "Paused"))
                            .unwrap_or(false);
                        Ok(paused.then_some(()))
                    }
                    Err(e) => Err(e),
                }
            }
        })
        .await
        .expect("Paused condition");

    virtctl.unpause(ns.name(), &name).await.expect("virtctl unpause");
    let vmi_name = name.clone();
    TimeoutSampler::new(format!("VMI {} unpaused", name), h.config.timeouts.vmi_running())
        .run(|| {
            let api = vmis.clone();
            let name = vmi_name.clone();
            async move {
                match api.get(&name).await {
                    Ok(vmi) => {
                        let paused = vmi
                            .status
                            .as_ref()
                            .map(|s| condition_true(&s.conditions, "Paused"))
                            .unwrap_or(false);
                        Ok((!paused).then_some(()))
                    }
                    Err(e) => Err(e),
                }
            }
        })
        .await
        .expect("Paused condition cleared");

    h.teardown(&ns).await;
    println!("✅ Pause/unpause round trip");
}

// =============================================================================
// MIGRATION
// =============================================================================

#[tokio::test]
#[ignore]
async fn test_vm_live_migrates_between_nodes() {
    if !common::e2e_enabled() {
        return;
    }

    let h = common::harness().await;
    if schedulable_nodes(&h.client).await < 2 {
        println!("⏭️  Skipping migration test: fewer than two schedulable nodes");
        return;
    }

    let ns = h.namespace("compute-migration").await;
    let vms = VmManager::new(&h.client, ns.name());

    let name = unique_name("migratable");
    let vm = VmBuilder::new(&name)
        .container_disk(&h.config.images.cirros_container_disk)
        .memory("128Mi")
        .run_strategy(RunStrategy::Always)
        .live_migratable()
        .build();
    vms.create(&vm).await.expect("VM create");

    let vmi = vms
        .wait_vmi_running(&name, h.config.timeouts.vmi_running())
        .await
        .expect("VMI running");
    let source_node = vmi
        .status
        .as_ref()
        .and_then(|s| s.node_name.clone())
        .expect("VMI has a node");
    println!("🚚 Migrating {} off {}", name, source_node);

    let migration = vms
        .migrate(&name, h.config.timeouts.migration())
        .await
        .expect("migration finished");

    let state = migration
        .status
        .as_ref()
        .and_then(|s| s.migration_state.as_ref())
        .expect("migration state present");
    assert_eq!(state.completed, Some(true));
    assert_ne!(state.failed, Some(true));

    // The guest kept running and moved.
    let after = vms.get_vmi(&name).await.expect("VMI after migration");
    assert_eq!(after.phase(), VmiPhase::Running);
    let target_node = after
        .status
        .as_ref()
        .and_then(|s| s.node_name.clone())
        .expect("VMI has a node after migration");
    assert_ne!(target_node, source_node, "VMI should have changed nodes");

    println!("  {} → {}", source_node, target_node);
    h.teardown(&ns).await;
    println!("✅ Live migration complete");
}

// =============================================================================
// GUEST ACCESS
// =============================================================================

/// Needs VIRTCHECK_SSH_KEY pointing at a private key whose .pub sibling
/// gets injected through cloud-init.
#[tokio::test]
#[ignore]
async fn test_guest_responds_over_ssh() {
    if !common::e2e_enabled() {
        return;
    }
    let Ok(key_path) = std::env::var("VIRTCHECK_SSH_KEY") else {
        println!("⏭️  Skipping ssh test: VIRTCHECK_SSH_KEY not set");
        return;
    };
    let public_key = std::fs::read_to_string(format!("{}.pub", key_path))
        .expect("public key next to VIRTCHECK_SSH_KEY");

    let h = common::harness().await;
    let ns = h.namespace("compute-ssh").await;
    let vms = VmManager::new(&h.client, ns.name());
    let virtctl = Virtctl::new(&h.config.virtctl);

    let name = unique_name("sshable");
    // Top-level key injection: the one cloud-init form cirros supports.
    let user_data = format!(
        "#cloud-config\nssh_authorized_keys:\n  - {}\n",
        public_key.trim()
    );
    let vm = VmBuilder::new(&name)
        .container_disk(&h.config.images.cirros_container_disk)
        .memory("128Mi")
        .run_strategy(RunStrategy::Always)
        .cloud_init(&user_data)
        .build();
    vms.create(&vm).await.expect("VM create");
    vms.wait_vmi_running(&name, h.config.timeouts.vmi_running())
        .await
        .expect("VMI running");

    let kernel = virtctl
        .ssh_exec(
            ns.name(),
            &name,
            &h.config.images.cirros_username,
            std::path::Path::new(&key_path),
            "uname -s",
        )
        .await
        .expect("guest command over ssh");

    assert_eq!(kernel, "Linux", "guest should answer from a Linux kernel");
    h.teardown(&ns).await;
    println!("✅ Guest answered over ssh");
}
