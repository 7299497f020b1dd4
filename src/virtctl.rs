//! virtctl subprocess wrapper.
//!
//! Everything shells out with a timeout. Commands that race VMI startup
//! (ssh, volume hotplug) retry with a fixed delay; one-shot operations
//! surface their first failure.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::VirtctlSettings;

const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum VirtctlError {
    /// Spawn failure, timeout or non-zero exit.
    #[error("virtctl failed: {0}")]
    ExecutionFailed(String),

    #[error("virtctl failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

pub struct Virtctl {
    binary: String,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl Virtctl {
    pub fn new(settings: &VirtctlSettings) -> Self {
        Virtctl {
            binary: settings.binary.clone(),
            timeout: settings.command_timeout(),
            retries: settings.retries.max(1),
            retry_delay: RETRY_DELAY,
        }
    }

    #[cfg(test)]
    fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Run once with the configured timeout. Returns stdout; stderr
    /// becomes the error message.
    async fn run_once(&self, args: &[String], description: &str) -> Result<String, String> {
        debug!(binary = %self.binary, ?args, "{}", description);

        let mut cmd = Command::new(&self.binary);
        cmd.args(args);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                warn!("{} timed out after {:?}", description, self.timeout);
                format!("timed out after {:?}", self.timeout)
            })?
            .map_err(|e| {
                warn!("{} spawn failed: {}", description, e);
                format!("failed to execute {}: {}", self.binary, e)
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let err = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("{} failed: {}", description, err);
            Err(err)
        }
    }

    async fn run(&self, args: Vec<String>, description: &str) -> Result<String, VirtctlError> {
        self.run_once(&args, description)
            .await
            .map_err(VirtctlError::ExecutionFailed)
    }

    async fn run_with_retry(
        &self,
        args: Vec<String>,
        description: &str,
    ) -> Result<String, VirtctlError> {
        let mut last_error = String::new();

        for attempt in 1..=self.retries {
            match self.run_once(&args, description).await {
                Ok(stdout) => return Ok(stdout),
                Err(e) => {
                    last_error = e;
                    if attempt < self.retries {
                        warn!(
                            attempt,
                            error = %last_error,
                            "{} failed, retrying",
                            description
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(VirtctlError::RetriesExhausted {
            attempts: self.retries,
            last_error,
        })
    }

    /// `virtctl version --client`. The cheapest "is the binary there" probe.
    pub async fn version(&self) -> Result<String, VirtctlError> {
        self.run(
            vec!["version".to_string(), "--client".to_string()],
            "virtctl version",
        )
        .await
    }

    pub async fn start(&self, namespace: &str, vm: &str) -> Result<(), VirtctlError> {
        self.run(
            args_for("start", namespace, vm, &[]),
            &format!("virtctl start {}", vm),
        )
        .await?;
        info!(vm, "virtctl start issued");
        Ok(())
    }

    pub async fn stop(&self, namespace: &str, vm: &str) -> Result<(), VirtctlError> {
        self.run(
            args_for("stop", namespace, vm, &[]),
            &format!("virtctl stop {}", vm),
        )
        .await?;
        info!(vm, "virtctl stop issued");
        Ok(())
    }

    pub async fn restart(&self, namespace: &str, vm: &str) -> Result<(), VirtctlError> {
        self.run(
            args_for("restart", namespace, vm, &[]),
            &format!("virtctl restart {}", vm),
        )
        .await?;
        info!(vm, "virtctl restart issued");
        Ok(())
    }

    /// Pause the guest via the pause subresource.
    pub async fn pause(&self, namespace: &str, vm: &str) -> Result<(), VirtctlError> {
        self.run(
            args_for("pause", namespace, &format!("vm {}", vm), &[]),
            &format!("virtctl pause {}", vm),
        )
        .await?;
        Ok(())
    }

    pub async fn unpause(&self, namespace: &str, vm: &str) -> Result<(), VirtctlError> {
        self.run(
            args_for("unpause", namespace, &format!("vm {}", vm), &[]),
            &format!("virtctl unpause {}", vm),
        )
        .await?;
        Ok(())
    }

    /// Upload a local disk image into an upload DataVolume.
    /// `force_bind` maps to --force-bind for WFFC classes.
    pub async fn image_upload(
        &self,
        namespace: &str,
        dv_name: &str,
        image_path: &Path,
        size: &str,
        storage_class: Option<&str>,
        force_bind: bool,
    ) -> Result<(), VirtctlError> {
        let mut args = vec![
            "image-upload".to_string(),
            "dv".to_string(),
            dv_name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--image-path".to_string(),
            image_path.display().to_string(),
            "--size".to_string(),
            size.to_string(),
            "--insecure".to_string(),
        ];
        if let Some(class) = storage_class {
            args.push("--storage-class".to_string());
            args.push(class.to_string());
        }
        if force_bind {
            args.push("--force-bind".to_string());
        }

        self.run(args, &format!("virtctl image-upload dv {}", dv_name))
            .await?;
        info!(datavolume = dv_name, "Image upload complete");
        Ok(())
    }

    /// Hotplug a DataVolume-backed disk into a running VM. Retried:
    /// hotplug rejects requests while the VMI is still settling.
    pub async fn add_volume(
        &self,
        namespace: &str,
        vm: &str,
        volume_name: &str,
        persist: bool,
    ) -> Result<(), VirtctlError> {
        let mut extra = vec!["--volume-name".to_string(), volume_name.to_string()];
        if persist {
            extra.push("--persist".to_string());
        }

        self.run_with_retry(
            args_for("addvolume", namespace, vm, &extra),
            &format!("virtctl addvolume {} {}", vm, volume_name),
        )
        .await?;
        info!(vm, volume = volume_name, "Volume hotplugged");
        Ok(())
    }

    pub async fn remove_volume(
        &self,
        namespace: &str,
        vm: &str,
        volume_name: &str,
    ) -> Result<(), VirtctlError> {
        self.run_with_retry(
            args_for(
                "removevolume",
                namespace,
                vm,
                &["--volume-name".to_string(), volume_name.to_string()],
            ),
            &format!("virtctl removevolume {} {}", vm, volume_name),
        )
        .await?;
        info!(vm, volume = volume_name, "Volume unplugged");
        Ok(())
    }

    /// Dump guest memory into a fresh PVC.
    pub async fn memory_dump(
        &self,
        namespace: &str,
        vm: &str,
        claim_name: &str,
    ) -> Result<(), VirtctlError> {
        self.run(
            args_for(
                "memory-dump",
                namespace,
                &format!("get {}", vm),
                &[
                    "--claim-name".to_string(),
                    claim_name.to_string(),
                    "--create-claim".to_string(),
                ],
            ),
            &format!("virtctl memory-dump {}", vm),
        )
        .await?;
        Ok(())
    }

    /// Run a command in the guest over `virtctl ssh` and return stdout.
    /// Auth is key-based; tests inject the public key via cloud-init.
    /// Retried because sshd comes up well after the VMI reports Running.
    pub async fn ssh_exec(
        &self,
        namespace: &str,
        vm: &str,
        username: &str,
        identity_file: &Path,
        command: &str,
    ) -> Result<String, VirtctlError> {
        let args = vec![
            "ssh".to_string(),
            format!("vmi/{}", vm),
            "--namespace".to_string(),
            namespace.to_string(),
            "--username".to_string(),
            username.to_string(),
            "--identity-file".to_string(),
            identity_file.display().to_string(),
            "--local-ssh-opts".to_string(),
            "-o StrictHostKeyChecking=no".to_string(),
            "--local-ssh-opts".to_string(),
            "-o UserKnownHostsFile=/dev/null".to_string(),
            "--command".to_string(),
            command.to_string(),
        ];

        let stdout = self
            .run_with_retry(args, &format!("virtctl ssh {}@{}", username, vm))
            .await?;
        Ok(stdout.trim().to_string())
    }
}

/// Common arg shape: subcommand, target, --namespace, extras.
fn args_for(subcommand: &str, namespace: &str, target: &str, extra: &[String]) -> Vec<String> {
    let mut args = vec![subcommand.to_string()];
    args.extend(target.split_whitespace().map(str::to_string));
    args.push("--namespace".to_string());
    args.push(namespace.to_string());
    args.extend_from_slice(extra);
    args
}

#[cfg(test)]
#[path = "virtctl_test.rs"]
mod tests;
