use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::device::types::{LinkEvent, PermissionState, ScanBatch};
use crate::error::DeviceError;
use crate::session::types::{DiscoveredDevice, Pin};

/// The Bluetooth stack that owns discovery, pairing and telemetry streaming.
#[async_trait]
pub trait PeripheralStack: Send + Sync + 'static {
    /// Asks the OS for Bluetooth access. May show a permission prompt.
    async fn request_permission(&self) -> Result<PermissionState, DeviceError>;

    async fn bluetooth_is_on(&self) -> bool;

    /// Starts discovery. The stream yields batches of newly found devices and ends
    /// when the scan is over or `cancel` fires.
    fn scan(&self, cancel: CancellationToken) -> BoxStream<'static, ScanBatch>;

    /// Opens a link to `device`. The stream ends once the link is gone; it should
    /// yield a final `Disconnected` status before ending.
    fn connect(&self, device: DiscoveredDevice, pin: Pin, cancel: CancellationToken) -> BoxStream<'static, LinkEvent>;
}
