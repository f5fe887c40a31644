//! OPI virtio-blk backend.
//!
//! Two remote resources: the remote controller to the storage target, then a
//! virtio-blk device on the allocated PCI function backed by the volume.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, instrument};

use super::{RemoteController, XpuBackend, pci_vpf, recorded_name, with_deadline};
use crate::config::Naming;
use crate::error::{Result, XpuError};
use crate::opi::FrontendVirtioBlkService;
use crate::opi::proto::{
    CreateVirtioBlkRequest, DeleteVirtioBlkRequest, ObjectKey, PciEndpoint, VirtioBlk,
};
use crate::types::{ConnectParams, VolumeContext};

pub struct OpiVirtioBlkBackend {
    frontend: Arc<dyn FrontendVirtioBlkService>,
    remote: RemoteController,
    volume: VolumeContext,
    naming: Naming,
    timeout: Duration,
    virtio_blk: Option<String>,
}

impl OpiVirtioBlkBackend {
    pub fn new(
        frontend: Arc<dyn FrontendVirtioBlkService>,
        remote: RemoteController,
        volume: VolumeContext,
        naming: Naming,
        timeout: Duration,
    ) -> Self {
        Self {
            frontend,
            remote,
            volume,
            naming,
            timeout,
            virtio_blk: None,
        }
    }

    /// Name of the live virtio-blk device, if any.
    pub fn virtio_blk(&self) -> Option<&str> {
        self.virtio_blk.as_deref()
    }

    /// Name of the live remote controller, if any.
    pub fn remote_controller(&self) -> Option<&str> {
        self.remote.name()
    }

    async fn create_virtio_blk(&mut self, vpf: u32) -> Result<()> {
        let model = self.volume.model()?;
        let id = self.naming.virtio_blk_id(vpf);
        let physical_function = i32::try_from(vpf)
            .map_err(|_| XpuError::InvalidArgument(format!("PCI function {vpf} out of range")))?;
        let req = CreateVirtioBlkRequest {
            virtio_blk: Some(VirtioBlk {
                name: String::new(),
                pcie_id: Some(PciEndpoint {
                    port_id: 0,
                    physical_function,
                    virtual_function: 0,
                }),
                volume_id: Some(ObjectKey {
                    value: model.to_owned(),
                }),
                max_io_qps: 0,
            }),
            virtio_blk_id: id.clone(),
        };
        info!(?req, "OPI.CreateVirtioBlk");

        let resp = with_deadline(self.timeout, self.frontend.create_virtio_blk(req))
            .await
            .map_err(|status| XpuError::rpc("CreateVirtioBlk", &id, status))?;

        info!(name = %resp.name, vpf, "OPI.CreateVirtioBlk succeeded");
        self.virtio_blk = Some(recorded_name(resp.name, &id));
        Ok(())
    }

    async fn delete_virtio_blk(&mut self) -> Result<()> {
        let Some(name) = self.virtio_blk.clone() else {
            return Ok(());
        };
        let req = DeleteVirtioBlkRequest {
            name: name.clone(),
            allow_missing: true,
        };
        info!(?req, "OPI.DeleteVirtioBlk");

        with_deadline(self.timeout, self.frontend.delete_virtio_blk(req))
            .await
            .map_err(|status| XpuError::rpc("DeleteVirtioBlk", &name, status))?;

        info!("OPI.DeleteVirtioBlk succeeded");
        self.virtio_blk = None;
        Ok(())
    }
}

#[async_trait]
impl XpuBackend for OpiVirtioBlkBackend {
    #[instrument(skip(self))]
    async fn connect(&mut self, params: ConnectParams) -> Result<()> {
        let vpf = pci_vpf(params)?;

        self.remote.create(&self.volume).await?;
        if let Err(e) = self.create_virtio_blk(vpf).await {
            if let Err(del) = self.remote.delete().await {
                error!(error = %del, "failed to clean up NVMf remote controller");
            }
            return Err(e);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn disconnect(&mut self) -> Result<()> {
        if self.virtio_blk.is_none() {
            info!("no virtio-blk device recorded");
        }
        self.delete_virtio_blk().await?;
        self.remote.delete().await
    }
}
