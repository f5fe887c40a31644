//! PCI function allocation on KVM bridges.
//!
//! Bridge `pf` exposes functions `0000:<pf+1>:<vf>.0` for `vf` in `0..32`. A
//! function is free when sysfs has no device at that address and no attach
//! in this process has claimed it yet.
//!
//! Claims are recorded in a [`DashMap`]; claiming goes through the entry API
//! so two concurrent allocations never return the same slot. A claim lives
//! until the attach holding it releases it, or until its device has appeared
//! and disappeared again. Allocators are shared per sysfs root through
//! [`SysfsFunctionAllocator::shared`], so every dispatcher in the process
//! sees the same claims.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::FunctionAllocator;
use crate::error::{Result, XpuError};
use crate::types::{FUNCTIONS_PER_BRIDGE, PciSlot};

static SHARED: OnceLock<DashMap<PathBuf, Arc<SysfsFunctionAllocator>>> = OnceLock::new();

#[derive(Debug, Clone, Copy, Default)]
struct Claim {
    appeared: bool,
}

pub struct SysfsFunctionAllocator {
    pci_devices: PathBuf,
    claims: DashMap<PciSlot, Claim>,
}

impl SysfsFunctionAllocator {
    pub fn new(sysfs_root: impl AsRef<Path>) -> Self {
        Self {
            pci_devices: sysfs_root.as_ref().join("bus/pci/devices"),
            claims: DashMap::new(),
        }
    }

    /// The process-wide allocator for `sysfs_root`.
    pub fn shared(sysfs_root: impl AsRef<Path>) -> Arc<Self> {
        let root = sysfs_root.as_ref();
        SHARED
            .get_or_init(DashMap::new)
            .entry(root.to_path_buf())
            .or_insert_with(|| Arc::new(Self::new(root)))
            .clone()
    }

    async fn present(&self, slot: &PciSlot) -> bool {
        tokio::fs::try_exists(self.pci_devices.join(slot.bdf()))
            .await
            .unwrap_or(false)
    }

    /// Number of functions currently claimed by this process.
    pub fn claimed(&self) -> usize {
        self.claims.len()
    }

    async fn prune(&self) {
        let slots: Vec<PciSlot> = self.claims.iter().map(|c| *c.key()).collect();
        for slot in slots {
            if self.present(&slot).await {
                if let Some(mut claim) = self.claims.get_mut(&slot) {
                    claim.appeared = true;
                }
            } else if self.claims.remove_if(&slot, |_, c| c.appeared).is_some() {
                debug!(%slot, "device gone, releasing PCI function claim");
            }
        }
    }
}

#[async_trait]
impl FunctionAllocator for SysfsFunctionAllocator {
    async fn allocate_function(&self, bridges: u32) -> Result<PciSlot> {
        self.prune().await;

        for pf in 0..bridges {
            for vf in 0..FUNCTIONS_PER_BRIDGE {
                let slot = PciSlot::new(pf, vf);
                if self.present(&slot).await {
                    continue;
                }
                if let Entry::Vacant(entry) = self.claims.entry(slot) {
                    entry.insert(Claim::default());
                    info!(%slot, bdf = %slot.bdf(), "allocated PCI function");
                    return Ok(slot);
                }
            }
        }
        Err(XpuError::FunctionsExhausted { bridges })
    }

    fn release_function(&self, slot: PciSlot) {
        if self.claims.remove(&slot).is_some() {
            debug!(%slot, "released PCI function claim");
        }
    }
}
