//! Volume initiator trait.
//!
//! An initiator makes one volume available as a block device on this node:
//!
//! 1. **Connect** provisions whatever is needed and returns the device path.
//! 2. **Disconnect** removes the device and releases the remote resources.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::XpuError;

/// Attach / detach of a single volume.
///
/// Implementations are not expected to tolerate concurrent `connect` and
/// `disconnect` on the same instance.
#[async_trait]
pub trait VolumeInitiator: Send {
    /// Attach the volume and return its block device path.
    ///
    /// On error nothing created by this call is left behind.
    async fn connect(&mut self) -> Result<PathBuf, XpuError>;

    /// Detach the volume and wait for its block device to go away.
    async fn disconnect(&mut self) -> Result<(), XpuError>;
}
