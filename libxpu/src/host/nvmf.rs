//! Local NVMe-over-Fabrics initiator driven through `nvme-cli`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::{DeviceWatcher, NvmfInitiator};
use crate::config::NvmfTcpTarget;
use crate::error::{Result, XpuError};

/// Coordinates of one NVMe-oF subsystem as seen by the host initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvmfTarget {
    pub transport: String,
    pub addr: String,
    pub port: u16,
    pub nqn: String,
    /// Model string reported by the namespace, used to find the block device.
    pub model: String,
}

impl NvmfTarget {
    /// Target published by the xPU for volume `model`.
    pub fn for_volume(target: &NvmfTcpTarget, model: &str) -> Self {
        Self {
            transport: target.transport.clone(),
            addr: target.addr.clone(),
            port: target.port,
            nqn: target.nqn(model),
            model: model.to_owned(),
        }
    }
}

pub struct NvmeCliInitiator {
    binary: PathBuf,
    watcher: Arc<dyn DeviceWatcher>,
    device_timeout: Duration,
}

impl NvmeCliInitiator {
    pub fn new(watcher: Arc<dyn DeviceWatcher>, device_timeout: Duration) -> Self {
        Self {
            binary: PathBuf::from("nvme"),
            watcher,
            device_timeout,
        }
    }

    /// Use a different `nvme` executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        tokio::process::Command::new(&self.binary)
            .args(args)
            .output()
            .await
            .map_err(|e| XpuError::initiator(format!("{}: {e}", self.binary.display())))
    }
}

#[async_trait]
impl NvmfInitiator for NvmeCliInitiator {
    #[instrument(skip(self), fields(nqn = %target.nqn))]
    async fn connect(&self, target: &NvmfTarget) -> Result<PathBuf> {
        let port = target.port.to_string();
        let out = self
            .run(&[
                "connect",
                "-t",
                &target.transport,
                "-a",
                &target.addr,
                "-s",
                &port,
                "-n",
                &target.nqn,
            ])
            .await?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            if stderr.contains("already") {
                info!("subsystem already connected");
            } else {
                return Err(XpuError::initiator(format!(
                    "nvme connect {} failed ({:?}): {}",
                    target.nqn,
                    out.status.code(),
                    stderr.trim()
                )));
            }
        }

        match self
            .watcher
            .wait_for_device_by_model(&target.model, self.device_timeout)
            .await
        {
            Ok(path) => Ok(path),
            Err(e) => {
                if let Err(de) = self.disconnect(target).await {
                    warn!(error = %de, "failed to disconnect after device wait failed");
                }
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(nqn = %target.nqn))]
    async fn disconnect(&self, target: &NvmfTarget) -> Result<()> {
        let out = self.run(&["disconnect", "-n", &target.nqn]).await?;
        if out.status.success() {
            info!("nvme disconnect succeeded");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&out.stderr);
        if stderr.contains("not connected") || stderr.contains("disconnected 0") {
            warn!("subsystem was not connected");
            return Ok(());
        }
        Err(XpuError::initiator(format!(
            "nvme disconnect {} failed ({:?}): {}",
            target.nqn,
            out.status.code(),
            stderr.trim()
        )))
    }
}
