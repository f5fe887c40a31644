//! gRPC client for the OPI storage services.
//!
//! One [`OpiClient`] multiplexes the remote-controller, NVMe front-end and
//! virtio-blk front-end services over a single [`Channel`].

use std::time::Duration;

use async_trait::async_trait;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;
use tracing::debug;

use super::proto::*;
use super::{FrontendNvmeService, FrontendVirtioBlkService, RemoteControllerService};
use crate::error::{Result, XpuError};

const CREATE_REMOTE_CONTROLLER: &str =
    "/opi_api.storage.v1.NVMfRemoteControllerService/CreateNVMfRemoteController";
const DELETE_REMOTE_CONTROLLER: &str =
    "/opi_api.storage.v1.NVMfRemoteControllerService/DeleteNVMfRemoteController";
const CREATE_SUBSYSTEM: &str = "/opi_api.storage.v1.FrontendNvmeService/CreateNvmeSubsystem";
const DELETE_SUBSYSTEM: &str = "/opi_api.storage.v1.FrontendNvmeService/DeleteNvmeSubsystem";
const CREATE_CONTROLLER: &str = "/opi_api.storage.v1.FrontendNvmeService/CreateNvmeController";
const DELETE_CONTROLLER: &str = "/opi_api.storage.v1.FrontendNvmeService/DeleteNvmeController";
const CREATE_NAMESPACE: &str = "/opi_api.storage.v1.FrontendNvmeService/CreateNvmeNamespace";
const DELETE_NAMESPACE: &str = "/opi_api.storage.v1.FrontendNvmeService/DeleteNvmeNamespace";
const CREATE_VIRTIO_BLK: &str = "/opi_api.storage.v1.FrontendVirtioBlkService/CreateVirtioBlk";
const DELETE_VIRTIO_BLK: &str = "/opi_api.storage.v1.FrontendVirtioBlkService/DeleteVirtioBlk";

/// Open a channel to the xPU control plane at `endpoint`
/// (e.g. `http://127.0.0.1:50051`).
pub async fn connect(endpoint: &str, connect_timeout: Duration) -> Result<Channel> {
    let channel = Endpoint::from_shared(endpoint.to_owned())
        .map_err(|e| XpuError::Config(format!("invalid endpoint {endpoint:?}: {e}")))?
        .connect_timeout(connect_timeout)
        .tcp_nodelay(true)
        .connect()
        .await
        .map_err(|e| XpuError::Config(format!("connect {endpoint}: {e}")))?;
    debug!(%endpoint, "connected to xPU control plane");
    Ok(channel)
}

/// OPI storage client over a shared channel.
#[derive(Debug, Clone)]
pub struct OpiClient {
    grpc: Grpc<Channel>,
}

impl OpiClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            grpc: Grpc::new(channel),
        }
    }

    async fn unary<Req, Resp>(&self, path: &'static str, req: Req) -> Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| Status::unknown(format!("service was not ready: {e}")))?;
        let codec = ProstCodec::<Req, Resp>::default();
        grpc.unary(tonic::Request::new(req), PathAndQuery::from_static(path), codec)
            .await
            .map(tonic::Response::into_inner)
    }
}

#[async_trait]
impl RemoteControllerService for OpiClient {
    async fn create_nvmf_remote_controller(
        &self,
        req: CreateNvmfRemoteControllerRequest,
    ) -> Result<NvmfRemoteController, Status> {
        self.unary(CREATE_REMOTE_CONTROLLER, req).await
    }

    async fn delete_nvmf_remote_controller(
        &self,
        req: DeleteNvmfRemoteControllerRequest,
    ) -> Result<(), Status> {
        self.unary::<_, Empty>(DELETE_REMOTE_CONTROLLER, req)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl FrontendNvmeService for OpiClient {
    async fn create_nvme_subsystem(
        &self,
        req: CreateNvmeSubsystemRequest,
    ) -> Result<NvmeSubsystem, Status> {
        self.unary(CREATE_SUBSYSTEM, req).await
    }

    async fn delete_nvme_subsystem(&self, req: DeleteNvmeSubsystemRequest) -> Result<(), Status> {
        self.unary::<_, Empty>(DELETE_SUBSYSTEM, req).await.map(|_| ())
    }

    async fn create_nvme_controller(
        &self,
        req: CreateNvmeControllerRequest,
    ) -> Result<NvmeController, Status> {
        self.unary(CREATE_CONTROLLER, req).await
    }

    async fn delete_nvme_controller(
        &self,
        req: DeleteNvmeControllerRequest,
    ) -> Result<(), Status> {
        self.unary::<_, Empty>(DELETE_CONTROLLER, req).await.map(|_| ())
    }

    async fn create_nvme_namespace(
        &self,
        req: CreateNvmeNamespaceRequest,
    ) -> Result<NvmeNamespace, Status> {
        self.unary(CREATE_NAMESPACE, req).await
    }

    async fn delete_nvme_namespace(&self, req: DeleteNvmeNamespaceRequest) -> Result<(), Status> {
        self.unary::<_, Empty>(DELETE_NAMESPACE, req).await.map(|_| ())
    }
}

#[async_trait]
impl FrontendVirtioBlkService for OpiClient {
    async fn create_virtio_blk(&self, req: CreateVirtioBlkRequest) -> Result<VirtioBlk, Status> {
        self.unary(CREATE_VIRTIO_BLK, req).await
    }

    async fn delete_virtio_blk(&self, req: DeleteVirtioBlkRequest) -> Result<(), Status> {
        self.unary::<_, Empty>(DELETE_VIRTIO_BLK, req).await.map(|_| ())
    }
}
