//! xPU initiator error types.
//!
//! All errors in the `libxpu` crate are represented by the [`XpuError`] enum.
//! The variants follow the failure classes of an attach workflow: bad
//! configuration (raised before anything remote happens), failed remote calls
//! (raised after compensation has run), PCI function exhaustion, and device
//! nodes that never appear or never go away.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = XpuError> = std::result::Result<T, E>;

/// Unified error type for xPU attach / detach operations.
#[derive(Debug, Error)]
pub enum XpuError {
    /// The target type string is not of the form `xpu-<backend>-<transport>`.
    #[error("invalid xpu target type {0:?}")]
    InvalidTargetType(String),

    /// The backend family named in the target type is not known.
    #[error("unknown xpu backend {0:?}")]
    UnknownBackend(String),

    /// The backend family does not support the requested transport.
    #[error("backend {backend:?} does not support transport {transport:?}")]
    UnsupportedTransport {
        /// Backend family, e.g. `opi`.
        backend: String,
        /// Transport type, e.g. `nvmftcp`.
        transport: String,
    },

    /// The caller supplied an invalid argument (missing volume context key,
    /// unparsable port, mismatched connect parameters, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A remote control-plane call failed or ran past its deadline.
    #[error("{op} failed for {resource:?}: {status}")]
    Rpc {
        /// Remote operation, e.g. `CreateNvmeNamespace`.
        op: &'static str,
        /// Deterministic resource id or recorded resource name.
        resource: String,
        /// Status returned by the control plane.
        status: tonic::Status,
    },

    /// No free PCI function is left on the configured bridges.
    #[error("no free PCI function on {bridges} bridge(s)")]
    FunctionsExhausted {
        /// Number of bridges that were scanned.
        bridges: u32,
    },

    /// A block device did not appear in time.
    #[error("timed out after {timeout:?} waiting for device {target}")]
    DeviceTimeout {
        /// bdf or model that was waited on.
        target: String,
        /// Wait bound that elapsed.
        timeout: Duration,
    },

    /// No block device matches the volume.
    #[error("no block device found for {0}")]
    DeviceNotFound(String),

    /// A block device was still present after detaching.
    #[error("device {} still present after {timeout:?}", path.display())]
    DeviceNotGone {
        /// Device node that was expected to disappear.
        path: PathBuf,
        /// Wait bound that elapsed.
        timeout: Duration,
    },

    /// The local kernel NVMe/TCP initiator failed.
    #[error("nvmf initiator error: {0}")]
    Initiator(String),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),

    /// Filesystem or process I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XpuError {
    /// Build an [`XpuError::Rpc`] for a failed remote call.
    pub fn rpc(op: &'static str, resource: impl Into<String>, status: tonic::Status) -> Self {
        Self::Rpc {
            op,
            resource: resource.into(),
            status,
        }
    }

    /// Create an [`XpuError::InvalidArgument`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn invalid<E: std::fmt::Display>(e: E) -> Self {
        Self::InvalidArgument(e.to_string())
    }

    /// Create an [`XpuError::Config`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    /// Create an [`XpuError::Initiator`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn initiator<E: std::fmt::Display>(e: E) -> Self {
        Self::Initiator(e.to_string())
    }

    /// `true` for errors raised before any remote or host side effect.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidTargetType(_)
                | Self::UnknownBackend(_)
                | Self::UnsupportedTransport { .. }
                | Self::InvalidArgument(_)
                | Self::Config(_)
        )
    }

    /// The remote status code, if this error came from the control plane.
    pub fn rpc_code(&self) -> Option<tonic::Code> {
        match self {
            Self::Rpc { status, .. } => Some(status.code()),
            _ => None,
        }
    }
}
