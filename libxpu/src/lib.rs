//! # libxpu: xPU volume attach engine
//!
//! `libxpu` attaches remote volumes to a node through an xPU (DPU / IPU)
//! card. The card is driven over its storage control plane ([OPI][opi]) to
//! build the chain of remote resources that exposes a volume to the host,
//! either as a PCI function (NVMe or virtio-blk) or as an NVMe/TCP target the
//! kernel initiator connects to.
//!
//! Every connect either completes or removes the resources it created, and
//! every disconnect can be repeated safely.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Volume context, target type, connect parameters, PCI slots. |
//! | [`error`] | [`XpuError`] enum covering all failure modes. |
//! | [`config`] | [`XpuConfig`]: timeouts, identifier prefixes, NVMe/TCP target. |
//! | [`opi`] | OPI storage messages, service traits and gRPC client. |
//! | [`backend`] | [`XpuBackend`] trait with the NVMe and virtio-blk backends. |
//! | [`host`] | PCI function allocator, device watcher, NVMe/TCP initiator. |
//! | [`initiator`] | [`VolumeInitiator`] trait: attach / detach one volume. |
//! | [`xpu`] | [`XpuInitiator`] dispatcher. |
//!
//! [opi]: https://github.com/opiproject/opi-api

pub mod backend;
pub mod config;
pub mod error;
pub mod host;
pub mod initiator;
pub mod opi;
pub mod types;
pub mod xpu;

pub use backend::XpuBackend;
pub use config::XpuConfig;
pub use error::{Result, XpuError};
pub use host::HostServices;
pub use initiator::VolumeInitiator;
pub use types::*;
pub use xpu::XpuInitiator;
