//! OPI NVMe backend.
//!
//! Exposes a volume to the host as an NVMe function through four remote
//! resources, created in this order:
//!
//! 1. **subsystem** keyed by the volume model;
//! 2. **controller** on the allocated PCI function, attached to the subsystem;
//! 3. **remote controller** linking the xPU to the storage target;
//! 4. **namespace** binding the volume's bdev to the subsystem.
//!
//! A failure in steps 2-4 deletes everything recorded so far before the
//! error is returned. Disconnect deletes the remote controller, the
//! controller and the subsystem; namespaces go away with their subsystem.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{RemoteController, XpuBackend, pci_vpf, recorded_name, with_deadline};
use crate::config::Naming;
use crate::error::{Result, XpuError};
use crate::opi::FrontendNvmeService;
use crate::opi::proto::{
    CreateNvmeControllerRequest, CreateNvmeNamespaceRequest, CreateNvmeSubsystemRequest,
    DeleteNvmeControllerRequest, DeleteNvmeNamespaceRequest, DeleteNvmeSubsystemRequest,
    NvmeController, NvmeControllerSpec, NvmeNamespace, NvmeNamespaceSpec, NvmeSubsystem,
    NvmeSubsystemSpec, ObjectKey, PciEndpoint,
};
use crate::types::{ConnectParams, VolumeContext};

/// Snapshot of the remote resources an [`OpiNvmeBackend`] currently owns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NvmeHandles {
    pub subsystem: Option<String>,
    pub controller: Option<String>,
    pub remote_controller: Option<String>,
    pub namespace: Option<String>,
}

impl NvmeHandles {
    pub fn is_empty(&self) -> bool {
        self.subsystem.is_none()
            && self.controller.is_none()
            && self.remote_controller.is_none()
            && self.namespace.is_none()
    }
}

pub struct OpiNvmeBackend {
    frontend: Arc<dyn FrontendNvmeService>,
    remote: RemoteController,
    volume: VolumeContext,
    naming: Naming,
    timeout: Duration,
    subsystem: Option<String>,
    controller: Option<String>,
    namespace: Option<String>,
}

impl OpiNvmeBackend {
    pub fn new(
        frontend: Arc<dyn FrontendNvmeService>,
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
            subsystem: None,
            controller: None,
            namespace: None,
        }
    }

    pub fn handles(&self) -> NvmeHandles {
        NvmeHandles {
            subsystem: self.subsystem.clone(),
            controller: self.controller.clone(),
            remote_controller: self.remote.name().map(str::to_owned),
            namespace: self.namespace.clone(),
        }
    }

    fn subsystem_key(&self) -> Option<ObjectKey> {
        self.subsystem.clone().map(|value| ObjectKey { value })
    }

    async fn create_subsystem(&mut self) -> Result<()> {
        let model = self.volume.model()?;
        let id = self.naming.subsystem_id(model);
        let req = CreateNvmeSubsystemRequest {
            nvme_subsystem: Some(NvmeSubsystem {
                name: String::new(),
                spec: Some(NvmeSubsystemSpec {
                    nqn: self.naming.subsystem_nqn(model),
                    ..Default::default()
                }),
            }),
            nvme_subsystem_id: id.clone(),
        };
        info!(?req, "OPI.CreateNvmeSubsystem");

        let resp = with_deadline(self.timeout, self.frontend.create_nvme_subsystem(req))
            .await
            .map_err(|status| XpuError::rpc("CreateNvmeSubsystem", &id, status))?;

        info!(name = %resp.name, "OPI.CreateNvmeSubsystem succeeded");
        self.subsystem = Some(recorded_name(resp.name, &id));
        Ok(())
    }

    async fn delete_subsystem(&mut self) -> Result<()> {
        let Some(name) = self.subsystem.clone() else {
            return Ok(());
        };
        let req = DeleteNvmeSubsystemRequest {
            name: name.clone(),
            allow_missing: true,
        };
        info!(?req, "OPI.DeleteNvmeSubsystem");

        with_deadline(self.timeout, self.frontend.delete_nvme_subsystem(req))
            .await
            .map_err(|status| XpuError::rpc("DeleteNvmeSubsystem", &name, status))?;

        info!("OPI.DeleteNvmeSubsystem succeeded");
        self.subsystem = None;
        Ok(())
    }

    /// The control plane derives the bus from the physical function id, so
    /// the slot encoding goes there and the virtual function is always 0.
    async fn create_controller(&mut self, vpf: u32) -> Result<()> {
        let id = self.naming.controller_id(vpf);
        let physical_function = i32::try_from(vpf)
            .map_err(|_| XpuError::InvalidArgument(format!("PCI function {vpf} out of range")))?;
        let req = CreateNvmeControllerRequest {
            nvme_controller: Some(NvmeController {
                name: String::new(),
                spec: Some(NvmeControllerSpec {
                    nvme_controller_id: 0,
                    subsystem_id: self.subsystem_key(),
                    pcie_id: Some(PciEndpoint {
                        port_id: 0,
                        physical_function,
                        virtual_function: 0,
                    }),
                }),
            }),
            nvme_controller_id: id.clone(),
        };
        info!(?req, "OPI.CreateNvmeController");

        let resp = with_deadline(self.timeout, self.frontend.create_nvme_controller(req))
            .await
            .map_err(|status| XpuError::rpc("CreateNvmeController", &id, status))?;

        info!(name = %resp.name, vpf, "OPI.CreateNvmeController succeeded");
        self.controller = Some(recorded_name(resp.name, &id));
        Ok(())
    }

    async fn delete_controller(&mut self) -> Result<()> {
        let Some(name) = self.controller.clone() else {
            return Ok(());
        };
        let req = DeleteNvmeControllerRequest {
            name: name.clone(),
            allow_missing: true,
        };
        info!(?req, "OPI.DeleteNvmeController");

        with_deadline(self.timeout, self.frontend.delete_nvme_controller(req))
            .await
            .map_err(|status| XpuError::rpc("DeleteNvmeController", &name, status))?;

        info!("OPI.DeleteNvmeController succeeded");
        self.controller = None;
        Ok(())
    }

    async fn create_namespace(&mut self) -> Result<()> {
        let model = self.volume.model()?;
        let id = self.naming.namespace_id(model);
        let req = CreateNvmeNamespaceRequest {
            nvme_namespace: Some(NvmeNamespace {
                name: String::new(),
                spec: Some(NvmeNamespaceSpec {
                    subsystem_id: self.subsystem_key(),
                    host_nsid: 0,
                    volume_id: Some(ObjectKey {
                        value: model.to_owned(),
                    }),
                }),
            }),
            nvme_namespace_id: id.clone(),
        };
        info!(?req, "OPI.CreateNvmeNamespace");

        let resp = with_deadline(self.timeout, self.frontend.create_nvme_namespace(req))
            .await
            .map_err(|status| XpuError::rpc("CreateNvmeNamespace", &id, status))?;

        info!(name = %resp.name, "OPI.CreateNvmeNamespace succeeded");
        self.namespace = Some(recorded_name(resp.name, &id));
        Ok(())
    }

    async fn delete_namespace(&mut self) -> Result<()> {
        let Some(name) = self.namespace.clone() else {
            return Ok(());
        };
        let req = DeleteNvmeNamespaceRequest {
            name: name.clone(),
            allow_missing: true,
        };
        info!(?req, "OPI.DeleteNvmeNamespace");

        with_deadline(self.timeout, self.frontend.delete_nvme_namespace(req))
            .await
            .map_err(|status| XpuError::rpc("DeleteNvmeNamespace", &name, status))?;

        info!("OPI.DeleteNvmeNamespace succeeded");
        self.namespace = None;
        Ok(())
    }

    /// Steps 2-4 of the connect sequence.
    async fn provision(&mut self, vpf: u32) -> Result<()> {
        self.create_controller(vpf).await?;
        self.remote.create(&self.volume).await?;
        self.create_namespace().await
    }

    /// Best-effort removal of everything recorded by a partial connect.
    ///
    /// Every delete carries `allow_missing`, so the fixed order is safe even
    /// when the subsystem delete already took its namespace along. Failures
    /// are logged; the error that triggered the cleanup is what the caller
    /// sees.
    async fn cleanup(&mut self) {
        if let Err(e) = self.delete_subsystem().await {
            warn!(error = %e, "cleanup: failed to delete NVMe subsystem");
        }
        if let Err(e) = self.delete_controller().await {
            warn!(error = %e, "cleanup: failed to delete NVMe controller");
        }
        if let Err(e) = self.remote.delete().await {
            warn!(error = %e, "cleanup: failed to delete NVMf remote controller");
        }
        if let Err(e) = self.delete_namespace().await {
            warn!(error = %e, "cleanup: failed to delete NVMe namespace");
        }
    }
}

#[async_trait]
impl XpuBackend for OpiNvmeBackend {
    #[instrument(skip(self))]
    async fn connect(&mut self, params: ConnectParams) -> Result<()> {
        let vpf = pci_vpf(params)?;
        self.volume.model()?;

        self.create_subsystem().await?;
        if let Err(e) = self.provision(vpf).await {
            info!(error = %e, "cleaning up incomplete NVMe creation");
            self.cleanup().await;
            return Err(e);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn disconnect(&mut self) -> Result<()> {
        self.remote.delete().await?;
        self.delete_controller().await?;
        self.delete_subsystem().await?;
        if let Some(ns) = self.namespace.take() {
            debug!(namespace = %ns, "namespace removed with its subsystem");
        }
        Ok(())
    }
}
