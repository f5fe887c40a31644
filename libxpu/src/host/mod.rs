//! Host-side collaborators of the dispatcher.
//!
//! | Trait | Default implementation |
//! |---|---|
//! | [`FunctionAllocator`] | [`SysfsFunctionAllocator`] |
//! | [`DeviceWatcher`] | [`SysfsDeviceWatcher`] |
//! | [`NvmfInitiator`] | [`NvmeCliInitiator`] |

pub mod device;
pub mod nvmf;
pub mod pci;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::XpuConfig;
use crate::error::Result;
use crate::types::PciSlot;

pub use device::SysfsDeviceWatcher;
pub use nvmf::{NvmeCliInitiator, NvmfTarget};
pub use pci::SysfsFunctionAllocator;

/// Hands out free PCI functions on the KVM bridges.
///
/// Allocation is atomic across concurrent callers. A function is not handed
/// out again until the attach that received it releases it, or while its
/// device is still present.
#[async_trait]
pub trait FunctionAllocator: Send + Sync {
    /// Fails with [`XpuError::FunctionsExhausted`](crate::XpuError::FunctionsExhausted)
    /// when every function on `bridges` bridges is taken.
    async fn allocate_function(&self, bridges: u32) -> Result<PciSlot>;

    /// Give `slot` back after an attach that did not produce a device.
    fn release_function(&self, slot: PciSlot);
}

/// A claimed PCI function that goes back to its allocator when dropped,
/// unless [`FunctionClaim::keep`] was called.
pub struct FunctionClaim {
    allocator: Arc<dyn FunctionAllocator>,
    slot: PciSlot,
    armed: bool,
}

impl FunctionClaim {
    pub async fn allocate(allocator: &Arc<dyn FunctionAllocator>, bridges: u32) -> Result<Self> {
        let slot = allocator.allocate_function(bridges).await?;
        Ok(Self {
            allocator: allocator.clone(),
            slot,
            armed: true,
        })
    }

    pub fn slot(&self) -> PciSlot {
        self.slot
    }

    /// The attach succeeded; from now on the allocator tracks the function
    /// through its device.
    pub fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for FunctionClaim {
    fn drop(&mut self) {
        if self.armed {
            self.allocator.release_function(self.slot);
        }
    }
}

/// Observes block devices appearing and disappearing on the host.
#[async_trait]
pub trait DeviceWatcher: Send + Sync {
    /// Block device whose model matches `model`, if one exists right now.
    async fn check_existing_device(&self, model: &str) -> Result<Option<PathBuf>>;

    /// Block device behind the PCI function at `bdf`, if one exists right now.
    async fn lookup_device_by_bdf(&self, bdf: &str) -> Result<Option<PathBuf>>;

    /// Wait for a block device behind `bdf` (and, when given, with model
    /// `model`) to appear.
    async fn wait_for_device_by_bdf(
        &self,
        bdf: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<PathBuf>;

    /// Wait for a block device with model `model` to appear.
    async fn wait_for_device_by_model(&self, model: &str, timeout: Duration) -> Result<PathBuf>;

    /// Wait for `path` to disappear.
    async fn wait_for_device_gone(&self, path: &Path, timeout: Duration) -> Result<()>;
}

/// Local kernel NVMe-over-Fabrics initiator.
#[async_trait]
pub trait NvmfInitiator: Send + Sync {
    /// Connect to `target` and return the resulting block device.
    async fn connect(&self, target: &NvmfTarget) -> Result<PathBuf>;

    async fn disconnect(&self, target: &NvmfTarget) -> Result<()>;
}

/// The set of host collaborators one dispatcher works with.
#[derive(Clone)]
pub struct HostServices {
    pub allocator: Arc<dyn FunctionAllocator>,
    pub watcher: Arc<dyn DeviceWatcher>,
    pub nvmf: Arc<dyn NvmfInitiator>,
}

impl HostServices {
    /// sysfs-backed allocator and watcher plus the `nvme` CLI initiator.
    ///
    /// The allocator is the process-wide one for `config.sysfs_root`, so
    /// every dispatcher built this way shares its claims.
    pub fn sysfs(config: &XpuConfig) -> Self {
        Self::with_allocator(
            config,
            SysfsFunctionAllocator::shared(&config.sysfs_root),
        )
    }

    pub fn with_allocator(config: &XpuConfig, allocator: Arc<dyn FunctionAllocator>) -> Self {
        let watcher: Arc<dyn DeviceWatcher> = Arc::new(SysfsDeviceWatcher::new(
            &config.sysfs_root,
            config.poll_interval(),
        ));
        let nvmf = Arc::new(NvmeCliInitiator::new(
            watcher.clone(),
            config.device_timeout(),
        ));
        Self {
            allocator,
            watcher,
            nvmf,
        }
    }
}
