use std::path::PathBuf;

use super::*;
use crate::config::VirtctlSettings;

fn fast_settings(binary: &str) -> VirtctlSettings {
    VirtctlSettings {
        binary: binary.to_string(),
        command_timeout_secs: 5,
        retries: 2,
    }
}

#[test]
fn args_for_splits_multiword_targets() {
    let args = args_for("memory-dump", "vm-tests", "get vm-a", &[]);
    assert_eq!(args, vec!["memory-dump", "get", "vm-a", "--namespace", "vm-tests"]);

    let args = args_for("start", "vm-tests", "vm-a", &[]);
    assert_eq!(args, vec!["start", "vm-a", "--namespace", "vm-tests"]);
}

#[test]
fn args_for_appends_extras_after_namespace() {
    let extra = vec!["--volume-name".to_string(), "hotplug-disk".to_string()];
    let args = args_for("addvolume", "vm-tests", "vm-a", &extra);
    assert_eq!(
        args,
        vec![
            "addvolume",
            "vm-a",
            "--namespace",
            "vm-tests",
            "--volume-name",
            "hotplug-disk"
        ]
    );
}

#[tokio::test]
async fn missing_binary_surfaces_execution_failure() {
    let virtctl = Virtctl::new(&fast_settings("definitely-not-a-real-virtctl-binary"));

    let err = virtctl.version().await.unwrap_err();
    match err {
        VirtctlError::ExecutionFailed(message) => {
            assert!(message.contains("failed to execute"));
        }
        other => panic!("expected ExecutionFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn retried_commands_exhaust_attempts() {
    // `false` exits non-zero instantly, so both attempts burn fast.
    let virtctl =
        Virtctl::new(&fast_settings("false")).with_retry_delay(Duration::from_millis(5));

    let err = virtctl
        .remove_volume("vm-tests", "vm-a", "hotplug-disk")
        .await
        .unwrap_err();

    match err {
        VirtctlError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn single_shot_commands_do_not_retry() {
    let virtctl = Virtctl::new(&fast_settings("false"));

    let err = virtctl.start("vm-tests", "vm-a").await.unwrap_err();
    assert!(matches!(err, VirtctlError::ExecutionFailed(_)));
}

#[tokio::test]
async fn stdout_is_returned_and_trimmed_by_ssh_exec_shape() {
    // Use `echo` as a stand-in binary: the wrapper only cares about
    // exit status and stdout.
    let virtctl = Virtctl::new(&fast_settings("echo"));

    let out = virtctl
        .ssh_exec(
            "vm-tests",
            "vm-a",
            "cirros",
            &PathBuf::from("/tmp/id_test"),
            "uname -a",
        )
        .await
        .unwrap();

    assert!(out.contains("vmi/vm-a"));
    assert!(out.contains("--command"));
    assert!(!out.ends_with('\n'));
}
