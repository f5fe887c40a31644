//! xPU backends.
//!
//! A backend drives one remote control-plane protocol through the resource
//! chain that exposes a volume to the host. Each backend instance serves a
//! single connect / disconnect pair.
//!
//! | Module | Chain |
//! |---|---|
//! | [`opi_nvme`] | subsystem → controller → remote controller → namespace |
//! | [`opi_virtio_blk`] | remote controller → virtio-blk device |
//! | [`remote_controller`] | remote controller lifecycle shared by both |

pub mod opi_nvme;
pub mod opi_virtio_blk;
pub mod remote_controller;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::Status;

use crate::config::Naming;
use crate::error::{Result, XpuError};
use crate::opi::OpiClient;
use crate::types::{ConnectParams, TransportType, VolumeContext};

pub use opi_nvme::OpiNvmeBackend;
pub use opi_virtio_blk::OpiVirtioBlkBackend;
pub use remote_controller::RemoteController;

/// Provisioning contract implemented by every backend family.
///
/// `connect` either leaves the whole resource chain in place or removes what
/// it created before returning the error. `disconnect` is idempotent: handles
/// that are already empty are skipped, so a second call succeeds.
///
/// Callers serialize `connect` and `disconnect` per instance; `&mut self`
/// enforces that statically.
#[async_trait]
pub trait XpuBackend: Send + Sync {
    async fn connect(&mut self, params: ConnectParams) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// Build the OPI backend for `transport` on top of `client`.
pub fn opi_backend(
    transport: TransportType,
    client: OpiClient,
    volume: VolumeContext,
    naming: Naming,
    call_timeout: Duration,
) -> Result<Box<dyn XpuBackend>> {
    let remote = RemoteController::new(Arc::new(client.clone()), naming.clone(), call_timeout);
    match transport {
        TransportType::Nvme => Ok(Box::new(OpiNvmeBackend::new(
            Arc::new(client),
            remote,
            volume,
            naming,
            call_timeout,
        ))),
        TransportType::VirtioBlk => Ok(Box::new(OpiVirtioBlkBackend::new(
            Arc::new(client),
            remote,
            volume,
            naming,
            call_timeout,
        ))),
        TransportType::NvmfTcp => Err(XpuError::UnsupportedTransport {
            backend: "opi".to_owned(),
            transport: transport.to_string(),
        }),
    }
}

/// Run one remote call under its own deadline.
pub(crate) async fn with_deadline<T, F>(timeout: Duration, call: F) -> Result<T, Status>
where
    F: Future<Output = Result<T, Status>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(res) => res,
        Err(_) => Err(Status::deadline_exceeded(format!(
            "no response within {timeout:?}"
        ))),
    }
}

/// Name to record for a created resource. Falls back to the requested id
/// when the control plane echoes no name, so the resource stays deletable.
pub(crate) fn recorded_name(returned: String, id: &str) -> String {
    if returned.is_empty() {
        id.to_owned()
    } else {
        returned
    }
}

/// Extract the PCI slot encoding from connect parameters.
pub(crate) fn pci_vpf(params: ConnectParams) -> Result<u32> {
    match params {
        ConnectParams::Pci { vpf } => Ok(vpf),
        ConnectParams::NvmfTcp { .. } => Err(XpuError::InvalidArgument(
            "PCI backend requires a PCI function, got a TCP target port".to_owned(),
        )),
    }
}
