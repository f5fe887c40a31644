//! OPI storage control plane.
//!
//! The backends talk to the xPU through the three service traits below.
//! [`OpiClient`] implements all of them over gRPC; tests substitute
//! in-memory control planes.
//!
//! Every `Delete*` request the backends issue sets `allow_missing`, so
//! deleting an absent resource is a success on the remote side.

pub mod client;
pub mod proto;

use async_trait::async_trait;
use tonic::Status;

pub use client::{OpiClient, connect};
use proto::*;

/// `NVMfRemoteControllerService`: links the xPU to a remote storage target.
#[async_trait]
pub trait RemoteControllerService: Send + Sync {
    async fn create_nvmf_remote_controller(
        &self,
        req: CreateNvmfRemoteControllerRequest,
    ) -> Result<NvmfRemoteController, Status>;

    async fn delete_nvmf_remote_controller(
        &self,
        req: DeleteNvmfRemoteControllerRequest,
    ) -> Result<(), Status>;
}

/// `FrontendNvmeService`: NVMe subsystems, controllers and namespaces
/// exposed to the host.
#[async_trait]
pub trait FrontendNvmeService: Send + Sync {
    async fn create_nvme_subsystem(
        &self,
        req: CreateNvmeSubsystemRequest,
    ) -> Result<NvmeSubsystem, Status>;

    async fn delete_nvme_subsystem(&self, req: DeleteNvmeSubsystemRequest) -> Result<(), Status>;

    async fn create_nvme_controller(
        &self,
        req: CreateNvmeControllerRequest,
    ) -> Result<NvmeController, Status>;

    async fn delete_nvme_controller(&self, req: DeleteNvmeControllerRequest)
    -> Result<(), Status>;

    async fn create_nvme_namespace(
        &self,
        req: CreateNvmeNamespaceRequest,
    ) -> Result<NvmeNamespace, Status>;

    async fn delete_nvme_namespace(&self, req: DeleteNvmeNamespaceRequest) -> Result<(), Status>;
}

/// `FrontendVirtioBlkService`: virtio-blk devices exposed to the host.
#[async_trait]
pub trait FrontendVirtioBlkService: Send + Sync {
    async fn create_virtio_blk(&self, req: CreateVirtioBlkRequest) -> Result<VirtioBlk, Status>;

    async fn delete_virtio_blk(&self, req: DeleteVirtioBlkRequest) -> Result<(), Status>;
}
