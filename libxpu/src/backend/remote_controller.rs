//! NVMf remote controller lifecycle.
//!
//! Both OPI backends link the xPU to the storage target through a remote
//! controller before exposing anything to the host. [`RemoteController`] owns
//! that link: it creates it from the volume context and deletes it with
//! `allow_missing`. The recorded name is cleared only after the delete call
//! succeeds, so a failed delete can be retried by a later cleanup pass.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use super::{recorded_name, with_deadline};
use crate::config::Naming;
use crate::error::{Result, XpuError};
use crate::opi::RemoteControllerService;
use crate::opi::proto::{
    CreateNvmfRemoteControllerRequest, DeleteNvmfRemoteControllerRequest, NvmeAddressFamily,
    NvmeTransportType, NvmfRemoteController,
};
use crate::types::{CTX_NQN, CTX_TARGET_ADDR, CTX_TARGET_PORT, VolumeContext};

pub struct RemoteController {
    client: Arc<dyn RemoteControllerService>,
    naming: Naming,
    timeout: Duration,
    name: Option<String>,
}

impl RemoteController {
    pub fn new(
        client: Arc<dyn RemoteControllerService>,
        naming: Naming,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            naming,
            timeout,
            name: None,
        }
    }

    /// Name returned by the control plane, `None` when no remote controller
    /// is live.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Build the create request. Fails without any remote call when the
    /// volume context lacks target coordinates or the port is not a positive
    /// integer.
    fn create_request(&self, volume: &VolumeContext) -> Result<CreateNvmfRemoteControllerRequest> {
        let model = volume.model()?;
        let id = self.naming.remote_controller_id(model);
        let raw_port = volume.require(CTX_TARGET_PORT)?;
        let port = match raw_port.parse::<i64>() {
            Ok(p) if p > 0 => p,
            _ => {
                return Err(XpuError::InvalidArgument(format!(
                    "failed to create remote NVMf controller for {id:?}: invalid targetPort {raw_port:?}"
                )));
            }
        };

        Ok(CreateNvmfRemoteControllerRequest {
            nv_mf_remote_controller: Some(NvmfRemoteController {
                name: String::new(),
                trtype: NvmeTransportType::Tcp as i32,
                adrfam: NvmeAddressFamily::Ipv4 as i32,
                traddr: volume.require(CTX_TARGET_ADDR)?.to_owned(),
                trsvcid: port,
                subnqn: volume.require(CTX_NQN)?.to_owned(),
                hostnqn: self.naming.remote_controller_hostnqn(model),
            }),
            nv_mf_remote_controller_id: id,
        })
    }

    #[instrument(skip_all)]
    pub async fn create(&mut self, volume: &VolumeContext) -> Result<()> {
        let req = self.create_request(volume)?;
        let id = req.nv_mf_remote_controller_id.clone();
        info!(?req, "OPI.CreateNvmfRemoteController");

        let resp = with_deadline(
            self.timeout,
            self.client.create_nvmf_remote_controller(req),
        )
        .await
        .map_err(|status| XpuError::rpc("CreateNvmfRemoteController", &id, status))?;

        info!(name = %resp.name, "OPI.CreateNvmfRemoteController succeeded");
        self.name = Some(recorded_name(resp.name, &id));
        Ok(())
    }

    #[instrument(skip_all, fields(name = ?self.name))]
    pub async fn delete(&mut self) -> Result<()> {
        let Some(name) = self.name.clone() else {
            return Ok(());
        };
        let req = DeleteNvmfRemoteControllerRequest {
            name: name.clone(),
            allow_missing: true,
        };
        info!(?req, "OPI.DeleteNvmfRemoteController");

        with_deadline(self.timeout, self.client.delete_nvmf_remote_controller(req))
            .await
            .map_err(|status| XpuError::rpc("DeleteNvmfRemoteController", &name, status))?;

        info!("OPI.DeleteNvmfRemoteController succeeded");
        self.name = None;
        Ok(())
    }
}
