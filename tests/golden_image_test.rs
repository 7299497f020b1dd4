//! Golden image tests: DataSources, their import crons, and VMs cloned
//! from them.
//!
//! Run with: VIRTCHECK_E2E=1 cargo test --test golden_image_test -- --ignored --nocapture
//!
//! The image catalog under [[images.os_images]] must match what the
//! cluster actually imports; the stock catalog expects "fedora".

#![allow(clippy::expect_used)] // e2e tests use expect for clarity

mod common;

use virtcheck::fixtures::unique_name;
use virtcheck::golden::{golden_image_vm, GoldenImages};
use virtcheck::vm::VmManager;

#[tokio::test]
#[ignore]
async fn test_configured_data_sources_become_ready() {
    if !common::e2e_enabled() {
        return;
    }

    let h = common::harness().await;
    let golden = GoldenImages::new(&h.client, &h.config.cluster.golden_image_namespace);

    let ready = golden.ready_data_sources().await.expect("DataSource list");
    println!("🖼️  {} DataSources already ready: {:?}", ready.len(), ready);

    for image in &h.config.images.os_images {
        // First boot of a cluster still has the initial import running,
        // so this waits on the import budget rather than asserting.
        let ds = golden
            .wait_data_source_ready(&image.data_source, h.config.timeouts.dv_succeeded())
            .await
            .unwrap_or_else(|e| panic!("DataSource {} never became ready: {}", image.data_source, e));
        println!(
            "  ✅ {} → {}",
            image.data_source,
            ds.current_source_name().unwrap_or("<unnamed source>")
        );
    }
}

#[tokio::test]
#[ignore]
async fn test_import_crons_keep_data_sources_current() {
    if !common::e2e_enabled() {
        return;
    }

    let h = common::harness().await;
    let golden = GoldenImages::new(&h.client, &h.config.cluster.golden_image_namespace);

    for image in &h.config.images.os_images {
        let cron = golden
            .cron_for(&image.data_source)
            .await
            .unwrap_or_else(|e| panic!("no cron for {}: {}", image.data_source, e));
        let cron_name = cron.metadata.name.clone().expect("cron has a name");
        println!("⏰ {} managed by {} ({})", image.data_source, cron_name, cron.spec.schedule);

        let settled = golden
            .wait_cron_up_to_date(&cron_name, h.config.timeouts.dv_succeeded())
            .await
            .expect("cron up to date");
        let imported = settled
            .status
            .as_ref()
            .and_then(|s| s.last_imported_pvc.as_ref())
            .expect("an up-to-date cron names its last import");
        println!("  ✅ last import: {}/{}", imported.namespace, imported.name);
    }
}

#[tokio::test]
#[ignore]
async fn test_vm_boots_from_a_golden_image() {
    if !common::e2e_enabled() {
        return;
    }

    let h = common::harness().await;
    let image = h
        .config
        .images
        .os_images
        .first()
        .expect("at least one os_image configured");
    let golden = GoldenImages::new(&h.client, &h.config.cluster.golden_image_namespace);

    // Cloning an image that was never imported would park forever.
    golden
        .wait_data_source_ready(&image.data_source, h.config.timeouts.dv_succeeded())
        .await
        .expect("DataSource ready");

    let ns = h.namespace("golden-boot").await;
    let vms = VmManager::new(&h.client, ns.name());

    let name = unique_name(&image.name);
    let vm = golden_image_vm(&name, golden.namespace(), &image.data_source, &image.size);
    vms.create(&vm).await.expect("VM create");
    vms.start(&name).await.expect("VM start");

    println!("🖼️  Cloning {} and booting {}", image.data_source, name);
    // Clone time dominates, so the boot runs on the import budget.
    let vmi = vms
        .wait_vmi_running(&name, h.config.timeouts.dv_succeeded())
        .await
        .expect("VMI running from golden image");
    println!("  booted on {}", vmi.status.as_ref().and_then(|s| s.node_name.as_deref()).unwrap_or("<unknown>"));

    vms.delete_and_wait(&name, h.config.timeouts.deletion())
        .await
        .expect("VM delete");
    h.teardown(&ns).await;
    println!("✅ Golden-image VM boot complete");
}
