//! xPU backend dispatcher.
//!
//! [`XpuInitiator`] owns one [`XpuBackend`] and turns the transport of an
//! `xpu-<backend>-<transport>` target type into the right sequence of
//! allocator, backend and device watcher calls.
//!
//! | Transport | Connect | Disconnect |
//! |---|---|---|
//! | `nvmftcp` | backend on the TCP port, then local `nvme connect` | local `nvme disconnect`, then backend |
//! | `nvme`, `virtioblk` | existing device check, allocate a PCI function, backend, wait for the device | resolve the device, backend, wait until it is gone |
//!
//! Whenever the host side fails after the backend succeeded, the backend is
//! disconnected again before the error is returned.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Channel;
use tracing::{error, info, instrument, warn};

use crate::backend::{XpuBackend, opi_backend};
use crate::config::{NvmfTcpTarget, XpuConfig};
use crate::error::{Result, XpuError};
use crate::host::{FunctionClaim, HostServices, NvmfTarget};
use crate::initiator::VolumeInitiator;
use crate::opi::OpiClient;
use crate::types::{BackendFamily, ConnectParams, TargetSpec, TransportType, VolumeContext};

pub struct XpuInitiator {
    target: TargetSpec,
    volume: VolumeContext,
    backend: Box<dyn XpuBackend>,
    host: HostServices,
    kvm_pci_bridges: u32,
    device_timeout: Duration,
    nvmf_tcp: NvmfTcpTarget,
    /// PCI address of the function this instance attached, if any.
    bdf: Option<String>,
    device_path: Option<PathBuf>,
}

impl XpuInitiator {
    /// Build a dispatcher for `target_type` with the built-in OPI client and
    /// the sysfs / `nvme-cli` host collaborators. All dispatchers built this
    /// way on the same sysfs root share one function allocator.
    pub fn new(
        target_type: &str,
        volume: VolumeContext,
        channel: Channel,
        config: &XpuConfig,
    ) -> Result<Self> {
        Self::with_host(
            target_type,
            volume,
            channel,
            HostServices::sysfs(config),
            config,
        )
    }

    pub fn with_host(
        target_type: &str,
        volume: VolumeContext,
        channel: Channel,
        host: HostServices,
        config: &XpuConfig,
    ) -> Result<Self> {
        let target: TargetSpec = target_type.parse()?;
        let backend = match target.backend {
            BackendFamily::Opi => opi_backend(
                target.transport,
                OpiClient::new(channel),
                volume.clone(),
                config.naming.clone(),
                config.call_timeout(),
            )?,
            BackendFamily::Sma => {
                return Err(XpuError::InvalidArgument(format!(
                    "{target} has no built-in client, inject a backend with XpuInitiator::with_backend"
                )));
            }
        };
        Self::with_backend(target, volume, backend, host, config)
    }

    /// Build a dispatcher around an already constructed backend.
    pub fn with_backend(
        target: TargetSpec,
        volume: VolumeContext,
        backend: Box<dyn XpuBackend>,
        host: HostServices,
        config: &XpuConfig,
    ) -> Result<Self> {
        config.validate()?;
        volume.model()?;
        Ok(Self {
            target,
            volume,
            backend,
            host,
            kvm_pci_bridges: config.kvm_pci_bridges,
            device_timeout: config.device_timeout(),
            nvmf_tcp: config.nvmf_tcp.clone(),
            bdf: None,
            device_path: None,
        })
    }

    pub fn target(&self) -> TargetSpec {
        self.target
    }

    pub fn bdf(&self) -> Option<&str> {
        self.bdf.as_deref()
    }

    /// Block device returned by the last successful connect.
    pub fn device_path(&self) -> Option<&PathBuf> {
        self.device_path.as_ref()
    }

    fn model(&self) -> Result<String> {
        self.volume.model().map(str::to_owned)
    }

    /// Undo the backend side of a connect whose host side failed.
    async fn compensate(&mut self) {
        if let Err(e) = self.backend.disconnect().await {
            error!(error = %e, "failed to disconnect backend after failed attach");
        }
    }

    async fn connect_nvmf_tcp(&mut self) -> Result<PathBuf> {
        let model = self.model()?;
        self.backend
            .connect(ConnectParams::NvmfTcp {
                target_port: self.nvmf_tcp.port,
            })
            .await?;

        let target = NvmfTarget::for_volume(&self.nvmf_tcp, &model);
        match self.host.nvmf.connect(&target).await {
            Ok(path) => Ok(path),
            Err(e) => {
                self.compensate().await;
                Err(e)
            }
        }
    }

    async fn connect_pci(&mut self) -> Result<PathBuf> {
        let model = self.model()?;
        match self.host.watcher.check_existing_device(&model).await {
            Ok(Some(path)) => {
                info!(%model, path = %path.display(), "found existing device");
                return Ok(path);
            }
            Ok(None) => {}
            Err(e) => warn!(%model, error = %e, "failed to look for an existing device"),
        }

        // Dropping the claim on any early return gives the function back.
        let claim = FunctionClaim::allocate(&self.host.allocator, self.kvm_pci_bridges).await?;
        let slot = claim.slot();
        info!(%slot, vpf = slot.vpf(), "using next available function");
        self.backend
            .connect(ConnectParams::Pci { vpf: slot.vpf() })
            .await?;

        let bdf = slot.bdf();
        // Only NVMe namespaces report the volume model.
        let want_model = (self.target.transport == TransportType::Nvme).then_some(model.as_str());
        info!(%model, %bdf, "waiting for device");
        match self
            .host
            .watcher
            .wait_for_device_by_bdf(&bdf, want_model, self.device_timeout)
            .await
        {
            Ok(path) => {
                claim.keep();
                self.bdf = Some(bdf);
                Ok(path)
            }
            Err(e) => {
                error!(%bdf, error = %e, "device did not show up");
                self.compensate().await;
                Err(e)
            }
        }
    }

    async fn disconnect_nvmf_tcp(&mut self) -> Result<()> {
        let model = self.model()?;
        let target = NvmfTarget::for_volume(&self.nvmf_tcp, &model);
        self.host.nvmf.disconnect(&target).await?;
        self.backend.disconnect().await
    }

    async fn disconnect_pci(&mut self) -> Result<()> {
        let model = self.model()?;
        let found = match (&self.bdf, self.target.transport) {
            (Some(bdf), TransportType::VirtioBlk) => {
                self.host.watcher.lookup_device_by_bdf(bdf).await?
            }
            _ => self.host.watcher.check_existing_device(&model).await?,
        };
        let Some(path) = found else {
            return Err(XpuError::DeviceNotFound(
                self.bdf.clone().unwrap_or(model),
            ));
        };

        self.backend.disconnect().await?;
        self.host
            .watcher
            .wait_for_device_gone(&path, self.device_timeout)
            .await?;
        info!(path = %path.display(), "device removed");
        self.bdf = None;
        Ok(())
    }
}

#[async_trait]
impl VolumeInitiator for XpuInitiator {
    #[instrument(skip(self), fields(target = %self.target))]
    async fn connect(&mut self) -> Result<PathBuf> {
        let path = match self.target.transport {
            TransportType::NvmfTcp => self.connect_nvmf_tcp().await?,
            TransportType::Nvme | TransportType::VirtioBlk => self.connect_pci().await?,
        };
        self.device_path = Some(path.clone());
        Ok(path)
    }

    #[instrument(skip(self), fields(target = %self.target))]
    async fn disconnect(&mut self) -> Result<()> {
        match self.target.transport {
            TransportType::NvmfTcp => self.disconnect_nvmf_tcp().await?,
            TransportType::Nvme | TransportType::VirtioBlk => self.disconnect_pci().await?,
        }
        self.device_path = None;
        Ok(())
    }
}
