//! OPI storage messages used by the attach workflows.
//!
//! This is the subset of `opi_api.storage.v1` needed to create and delete
//! remote controllers, NVMe subsystems / controllers / namespaces and
//! virtio-blk devices. Field tags follow the upstream `.proto` files.

/// Reference to another OPI object by name.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ObjectKey {
    #[prost(string, tag = "1")]
    pub value: ::prost::alloc::string::String,
}

/// PCI endpoint a front-end device is exposed on.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct PciEndpoint {
    #[prost(int32, tag = "1")]
    pub port_id: i32,
    #[prost(int32, tag = "2")]
    pub physical_function: i32,
    #[prost(int32, tag = "3")]
    pub virtual_function: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum NvmeTransportType {
    Unspecified = 0,
    Fc = 1,
    Pcie = 2,
    Rdma = 3,
    Tcp = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum NvmeAddressFamily {
    Unspecified = 0,
    Ipv4 = 1,
    Ipv6 = 2,
}

// ---------------------------------------------------------------------------
// NVMf remote controller
// ---------------------------------------------------------------------------

/// Connection from the xPU to a remote NVMe-oF storage target.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NvmfRemoteController {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(enumeration = "NvmeTransportType", tag = "2")]
    pub trtype: i32,
    #[prost(enumeration = "NvmeAddressFamily", tag = "3")]
    pub adrfam: i32,
    #[prost(string, tag = "4")]
    pub traddr: ::prost::alloc::string::String,
    #[prost(int64, tag = "5")]
    pub trsvcid: i64,
    #[prost(string, tag = "6")]
    pub subnqn: ::prost::alloc::string::String,
    #[prost(string, tag = "12")]
    pub hostnqn: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateNvmfRemoteControllerRequest {
    #[prost(message, optional, tag = "1")]
    pub nv_mf_remote_controller: ::core::option::Option<NvmfRemoteController>,
    #[prost(string, tag = "2")]
    pub nv_mf_remote_controller_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteNvmfRemoteControllerRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub allow_missing: bool,
}

// ---------------------------------------------------------------------------
// NVMe front end
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NvmeSubsystemSpec {
    #[prost(string, tag = "2")]
    pub nqn: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub serial_number: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub model_number: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NvmeSubsystem {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub spec: ::core::option::Option<NvmeSubsystemSpec>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateNvmeSubsystemRequest {
    #[prost(message, optional, tag = "1")]
    pub nvme_subsystem: ::core::option::Option<NvmeSubsystem>,
    #[prost(string, tag = "2")]
    pub nvme_subsystem_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteNvmeSubsystemRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub allow_missing: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NvmeControllerSpec {
    #[prost(int32, tag = "2")]
    pub nvme_controller_id: i32,
    #[prost(message, optional, tag = "3")]
    pub subsystem_id: ::core::option::Option<ObjectKey>,
    #[prost(message, optional, tag = "4")]
    pub pcie_id: ::core::option::Option<PciEndpoint>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NvmeController {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub spec: ::core::option::Option<NvmeControllerSpec>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateNvmeControllerRequest {
    #[prost(message, optional, tag = "1")]
    pub nvme_controller: ::core::option::Option<NvmeController>,
    #[prost(string, tag = "2")]
    pub nvme_controller_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteNvmeControllerRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub allow_missing: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NvmeNamespaceSpec {
    #[prost(message, optional, tag = "2")]
    pub subsystem_id: ::core::option::Option<ObjectKey>,
    #[prost(int32, tag = "3")]
    pub host_nsid: i32,
    #[prost(message, optional, tag = "4")]
    pub volume_id: ::core::option::Option<ObjectKey>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NvmeNamespace {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub spec: ::core::option::Option<NvmeNamespaceSpec>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateNvmeNamespaceRequest {
    #[prost(message, optional, tag = "1")]
    pub nvme_namespace: ::core::option::Option<NvmeNamespace>,
    #[prost(string, tag = "2")]
    pub nvme_namespace_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteNvmeNamespaceRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub allow_missing: bool,
}

// ---------------------------------------------------------------------------
// virtio-blk front end
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VirtioBlk {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub pcie_id: ::core::option::Option<PciEndpoint>,
    #[prost(message, optional, tag = "3")]
    pub volume_id: ::core::option::Option<ObjectKey>,
    #[prost(int64, tag = "4")]
    pub max_io_qps: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateVirtioBlkRequest {
    #[prost(message, optional, tag = "1")]
    pub virtio_blk: ::core::option::Option<VirtioBlk>,
    #[prost(string, tag = "2")]
    pub virtio_blk_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteVirtioBlkRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub allow_missing: bool,
}

/// `google.protobuf.Empty`.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}
