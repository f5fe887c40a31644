//! Block device discovery through sysfs.
//!
//! # sysfs layout
//!
//! ```text
//! <sysfs>/bus/pci/devices/<bdf>/nvme/nvme0/nvme0n1     # NVMe namespace
//! <sysfs>/bus/pci/devices/<bdf>/virtio3/block/vda      # virtio-blk disk
//! <sysfs>/block/<name>/device/model                    # model string
//! ```
//!
//! Device nodes are reported as `/dev/<name>`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use super::DeviceWatcher;
use crate::error::{Result, XpuError};

pub struct SysfsDeviceWatcher {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
    poll_interval: Duration,
}

/// Names of the entries directly under `dir`. A missing directory has none.
async fn entry_names(dir: &Path) -> Result<Vec<String>> {
    let mut rd = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    while let Some(entry) = rd.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_owned());
        }
    }
    names.sort();
    Ok(names)
}

impl SysfsDeviceWatcher {
    pub fn new(sysfs_root: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: PathBuf::from("/dev"),
            poll_interval,
        }
    }

    /// Report device nodes under `dev_root` instead of `/dev`.
    pub fn with_dev_root(mut self, dev_root: impl Into<PathBuf>) -> Self {
        self.dev_root = dev_root.into();
        self
    }

    async fn model_of(&self, block: &str) -> Option<String> {
        let path = self.sysfs_root.join("block").join(block).join("device/model");
        tokio::fs::read_to_string(path)
            .await
            .ok()
            .map(|m| m.trim().to_owned())
    }

    /// Block device names behind the PCI function at `bdf`.
    async fn blocks_for_bdf(&self, bdf: &str) -> Result<Vec<String>> {
        let pci_dir = self.sysfs_root.join("bus/pci/devices").join(bdf);
        let mut blocks = Vec::new();

        for ctrl in entry_names(&pci_dir.join("nvme")).await? {
            let prefix = format!("{ctrl}n");
            blocks.extend(
                entry_names(&pci_dir.join("nvme").join(&ctrl))
                    .await?
                    .into_iter()
                    .filter(|ns| ns.starts_with(&prefix)),
            );
        }
        for virtio in entry_names(&pci_dir).await? {
            if virtio.starts_with("virtio") {
                blocks.extend(entry_names(&pci_dir.join(&virtio).join("block")).await?);
            }
        }
        Ok(blocks)
    }

    async fn find_by_bdf(&self, bdf: &str, model: Option<&str>) -> Result<Option<PathBuf>> {
        for block in self.blocks_for_bdf(bdf).await? {
            if let Some(want) = model
                && self.model_of(&block).await.as_deref() != Some(want)
            {
                debug!(%bdf, %block, "model mismatch");
                continue;
            }
            return Ok(Some(self.dev_root.join(block)));
        }
        Ok(None)
    }

    async fn find_by_model(&self, model: &str) -> Result<Option<PathBuf>> {
        for block in entry_names(&self.sysfs_root.join("block")).await? {
            if self.model_of(&block).await.as_deref() == Some(model) {
                return Ok(Some(self.dev_root.join(block)));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl DeviceWatcher for SysfsDeviceWatcher {
    async fn check_existing_device(&self, model: &str) -> Result<Option<PathBuf>> {
        self.find_by_model(model).await
    }

    async fn lookup_device_by_bdf(&self, bdf: &str) -> Result<Option<PathBuf>> {
        self.find_by_bdf(bdf, None).await
    }

    async fn wait_for_device_by_bdf(
        &self,
        bdf: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<PathBuf> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(path) = self.find_by_bdf(bdf, model).await? {
                info!(%bdf, path = %path.display(), "device ready");
                return Ok(path);
            }
            if Instant::now() >= deadline {
                return Err(XpuError::DeviceTimeout {
                    target: bdf.to_owned(),
                    timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wait_for_device_by_model(&self, model: &str, timeout: Duration) -> Result<PathBuf> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(path) = self.find_by_model(model).await? {
                info!(%model, path = %path.display(), "device ready");
                return Ok(path);
            }
            if Instant::now() >= deadline {
                return Err(XpuError::DeviceTimeout {
                    target: model.to_owned(),
                    timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wait_for_device_gone(&self, path: &Path, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                debug!(path = %path.display(), "device gone");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(XpuError::DeviceNotGone {
                    path: path.to_owned(),
                    timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
