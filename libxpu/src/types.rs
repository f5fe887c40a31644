//! Core xPU types: volume context, target type, connect parameters and PCI
//! slots.
//!
//! These types are shared by the dispatcher, the backends and the host
//! collaborators.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, XpuError};

// ---------------------------------------------------------------------------
// Volume context
// ---------------------------------------------------------------------------

/// Volume context key holding the stable volume identifier.
pub const CTX_MODEL: &str = "model";
/// Volume context key holding the storage target address.
pub const CTX_TARGET_ADDR: &str = "targetAddr";
/// Volume context key holding the storage target port.
pub const CTX_TARGET_PORT: &str = "targetPort";
/// Volume context key holding the storage target subsystem NQN.
pub const CTX_NQN: &str = "nqn";

/// Read-only key/value description of a volume, as handed over by the CSI
/// layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct VolumeContext(HashMap<String, String>);

impl VolumeContext {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self(map)
    }

    /// Raw lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Lookup that fails with [`XpuError::InvalidArgument`] when the key is
    /// missing or empty.
    pub fn require(&self, key: &str) -> Result<&str> {
        match self.get(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(XpuError::InvalidArgument(format!(
                "volume context is missing {key:?}"
            ))),
        }
    }

    /// The volume's model identifier.
    pub fn model(&self) -> Result<&str> {
        self.require(CTX_MODEL)
    }
}

impl From<HashMap<String, String>> for VolumeContext {
    fn from(map: HashMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VolumeContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Target type
// ---------------------------------------------------------------------------

/// Remote control-plane protocol used to manage the xPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendFamily {
    /// OPI storage API.
    Opi,
    /// SPDK Storage Management Agent.
    Sma,
}

impl BackendFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opi => "opi",
            Self::Sma => "sma",
        }
    }
}

impl FromStr for BackendFamily {
    type Err = XpuError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "opi" => Ok(Self::Opi),
            "sma" => Ok(Self::Sma),
            other => Err(XpuError::UnknownBackend(other.to_owned())),
        }
    }
}

impl fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the provisioned block device is exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Kernel NVMe-over-TCP initiator against a target published by the xPU.
    NvmfTcp,
    /// NVMe function passed through to the host.
    Nvme,
    /// virtio-blk function passed through to the host.
    VirtioBlk,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NvmfTcp => "nvmftcp",
            Self::Nvme => "nvme",
            Self::VirtioBlk => "virtioblk",
        }
    }

    /// `true` for transports that consume a PCI function on the host.
    pub fn is_pci(&self) -> bool {
        matches!(self, Self::Nvme | Self::VirtioBlk)
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed `xpu-<backend>-<transport>` target type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSpec {
    pub backend: BackendFamily,
    pub transport: TransportType,
}

impl FromStr for TargetSpec {
    type Err = XpuError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 || parts[0] != "xpu" {
            return Err(XpuError::InvalidTargetType(s.to_owned()));
        }
        let backend: BackendFamily = parts[1].parse()?;
        let transport = match parts[2] {
            "nvmftcp" => TransportType::NvmfTcp,
            "nvme" => TransportType::Nvme,
            "virtioblk" => TransportType::VirtioBlk,
            other => {
                return Err(XpuError::UnsupportedTransport {
                    backend: backend.to_string(),
                    transport: other.to_owned(),
                });
            }
        };
        Ok(Self { backend, transport })
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xpu-{}-{}", self.backend, self.transport)
    }
}

// ---------------------------------------------------------------------------
// Connect parameters & PCI slots
// ---------------------------------------------------------------------------

/// Parameters for a single [`XpuBackend::connect`](crate::backend::XpuBackend::connect) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectParams {
    /// Publish the volume on a local NVMe/TCP target port.
    NvmfTcp { target_port: u16 },
    /// Expose the volume on a PCI function. `vpf` is the control-plane
    /// encoding of the slot, see [`PciSlot::vpf`].
    Pci { vpf: u32 },
}

/// Functions per bridge in the control-plane slot encoding.
pub const FUNCTIONS_PER_BRIDGE: u32 = 32;

/// A (physical function, virtual function) pair handed out by the function
/// allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PciSlot {
    pub pf: u32,
    pub vf: u32,
}

impl PciSlot {
    pub fn new(pf: u32, vf: u32) -> Self {
        Self { pf, vf }
    }

    /// Slot encoding expected by the control plane: the bus is derived from
    /// the physical function id alone.
    pub fn vpf(&self) -> u32 {
        self.pf * FUNCTIONS_PER_BRIDGE + self.vf
    }

    /// Host bus-device-function address of the slot.
    pub fn bdf(&self) -> String {
        format!("0000:{:02x}:{:02x}.0", self.pf + 1, self.vf)
    }
}

impl fmt::Display for PciSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pf{}/vf{}", self.pf, self.vf)
    }
}
