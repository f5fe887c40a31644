//! xPU initiator configuration.
//!
//! [`XpuConfig`] can be deserialized from YAML or JSON; every field has a
//! default so an empty document is valid.
//!
//! Environment variables (applied by [`XpuConfig::apply_env`]):
//! - `XPU_CALL_TIMEOUT_SECS`: deadline for each remote call.
//! - `XPU_DEVICE_TIMEOUT_SECS`: bound for device appear / gone waits.
//! - `XPU_KVM_PCI_BRIDGES`: number of PCI bridges to allocate functions on,
//!   at most [`MAX_KVM_PCI_BRIDGES`].
//! - `XPU_SYSFS_ROOT`: sysfs mount point, `/sys` unless overridden.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XpuError};

/// Upper bound for `kvm_pci_bridges`.
pub const MAX_KVM_PCI_BRIDGES: u32 = 256;

/// Top-level configuration shared by the dispatcher and the backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct XpuConfig {
    /// Deadline applied to every individual remote call.
    pub call_timeout_secs: u64,
    /// Bound for waiting on a device node to appear or disappear.
    pub device_timeout_secs: u64,
    /// Device watcher poll period.
    pub poll_interval_ms: u64,
    /// Number of KVM PCI bridges available for function allocation.
    pub kvm_pci_bridges: u32,
    /// sysfs mount point.
    pub sysfs_root: PathBuf,
    /// Remote identifier prefixes.
    pub naming: Naming,
    /// Local NVMe/TCP target used by the `nvmftcp` transport.
    pub nvmf_tcp: NvmfTcpTarget,
}

impl Default for XpuConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: 60,
            device_timeout_secs: 20,
            poll_interval_ms: 200,
            kvm_pci_bridges: 1,
            sysfs_root: PathBuf::from("/sys"),
            naming: Naming::default(),
            nvmf_tcp: NvmfTcpTarget::default(),
        }
    }
}

impl XpuConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.device_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reject values the allocator cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.kvm_pci_bridges > MAX_KVM_PCI_BRIDGES {
            return Err(XpuError::Config(format!(
                "kvm_pci_bridges {} exceeds {MAX_KVM_PCI_BRIDGES}",
                self.kvm_pci_bridges
            )));
        }
        Ok(())
    }

    /// Load a configuration file. Files ending in `.json` are parsed as JSON,
    /// anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| XpuError::Config(format!("read {}: {e}", path.display())))?;
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        let config: Self = if is_json {
            serde_json::from_str(&raw)
                .map_err(|e| XpuError::Config(format!("parse {}: {e}", path.display())))?
        } else {
            serde_yaml::from_str(&raw)
                .map_err(|e| XpuError::Config(format!("parse {}: {e}", path.display())))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `XPU_*` environment variables.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        fn number<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| XpuError::Config(format!("{key}={raw:?} is not a number")))
        }

        if let Some(v) = var("XPU_CALL_TIMEOUT_SECS") {
            self.call_timeout_secs = number("XPU_CALL_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = var("XPU_DEVICE_TIMEOUT_SECS") {
            self.device_timeout_secs = number("XPU_DEVICE_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = var("XPU_KVM_PCI_BRIDGES") {
            self.kvm_pci_bridges = number("XPU_KVM_PCI_BRIDGES", v)?;
        }
        if let Some(v) = var("XPU_SYSFS_ROOT") {
            self.sysfs_root = PathBuf::from(v);
        }
        self.validate()?;
        Ok(self)
    }
}

/// Prefixes for the deterministic identifiers of remote resources.
///
/// Ids are `<prefix><volume model>` or `<prefix><vpf>`, so a retried connect
/// for the same volume targets the same remote objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Naming {
    pub remote_controller_prefix: String,
    pub remote_controller_hostnqn_prefix: String,
    pub subsystem_prefix: String,
    pub subsystem_nqn_prefix: String,
    pub controller_prefix: String,
    pub namespace_prefix: String,
    pub virtio_blk_prefix: String,
}

impl Default for Naming {
    fn default() -> Self {
        Self {
            remote_controller_prefix: "spckcsi-".to_owned(),
            remote_controller_hostnqn_prefix: "nqn.2023-04.io.spdk.csi:remote.controller:uuid:"
                .to_owned(),
            subsystem_prefix: "spdkcsi-".to_owned(),
            subsystem_nqn_prefix: "nqn.2016-06.io.spdk.csi:subsystem:uuid:".to_owned(),
            controller_prefix: "spdkcsi-".to_owned(),
            namespace_prefix: "spdcksi-".to_owned(),
            virtio_blk_prefix: "virtioBlk.".to_owned(),
        }
    }
}

impl Naming {
    pub fn remote_controller_id(&self, model: &str) -> String {
        format!("{}{model}", self.remote_controller_prefix)
    }

    pub fn remote_controller_hostnqn(&self, model: &str) -> String {
        format!("{}{model}", self.remote_controller_hostnqn_prefix)
    }

    pub fn subsystem_id(&self, model: &str) -> String {
        format!("{}{model}", self.subsystem_prefix)
    }

    pub fn subsystem_nqn(&self, model: &str) -> String {
        format!("{}{model}", self.subsystem_nqn_prefix)
    }

    pub fn controller_id(&self, vpf: u32) -> String {
        format!("{}{vpf}", self.controller_prefix)
    }

    pub fn namespace_id(&self, model: &str) -> String {
        format!("{}{model}", self.namespace_prefix)
    }

    pub fn virtio_blk_id(&self, vpf: u32) -> String {
        format!("{}{vpf}", self.virtio_blk_prefix)
    }
}

/// Coordinates of the NVMe/TCP target the xPU publishes for the `nvmftcp`
/// transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NvmfTcpTarget {
    pub transport: String,
    pub addr: String,
    pub port: u16,
    pub nqn_prefix: String,
}

impl Default for NvmfTcpTarget {
    fn default() -> Self {
        Self {
            transport: "tcp".to_owned(),
            addr: "127.0.0.1".to_owned(),
            port: 4421,
            nqn_prefix: "nqn.2022-04.io.spdk.csi:cnode0:uuid:".to_owned(),
        }
    }
}

impl NvmfTcpTarget {
    pub fn nqn(&self, model: &str) -> String {
        format!("{}{model}", self.nqn_prefix)
    }
}
