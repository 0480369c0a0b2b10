use crate::error::{ScanError, TelemetryError};
use crate::session::types::{ActivitySummary, DeviceStatus, DiscoveredDevice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
}

/// Devices found since the previous batch of the same scan, or an in-band scan error.
pub type ScanBatch = Result<Vec<DiscoveredDevice>, ScanError>;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Status(DeviceStatus),
    /// The device refused the pin it was given.
    PinRejected,
    HeartRate(Result<u16, TelemetryError>), // beats per minute
    Activity(ActivitySummary),
}
