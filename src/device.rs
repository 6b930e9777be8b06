//! The transport seam: one trait over the HTTP/XML and telnet control
//! surfaces. Setpoints are integers in [0, 1000]; callers clamp before
//! invoking. Connections are opened per operation: the fixture tolerates
//! at most one control conversation at a time.

use async_trait::async_trait;
use thiserror::Error;

use crate::status::StatusSnapshot;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// Network unreachable, dial failure, HTTP non-2xx. Retryable.
    #[error("transport: {0}")]
    Transport(String),
    /// The device answered, but not with what we wanted. Retryable.
    #[error("protocol: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for DeviceError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<reqwest::Error> for DeviceError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// How the publisher names this device's measurement and its intensity
/// fields. The telnet surface predates the XML one and keeps its legacy
/// measurement name and label-keyed intensity fields.
#[derive(Debug, Clone, Copy)]
pub struct MetricStyle {
    pub measurement: &'static str,
    pub labeled_intensities: bool,
}

#[async_trait]
pub trait LightDevice: Send + Sync {
    /// Fetch and decode the device's current status.
    async fn read_status(&self) -> Result<StatusSnapshot, DeviceError>;

    /// Write every channel at once, in channel order.
    async fn set_all(&self, values: &[i64]) -> Result<(), DeviceError>;

    /// Write a single channel, addressed by wavelength.
    async fn set_one(&self, wavelength_nm: i64, value: i64) -> Result<(), DeviceError>;

    fn metric_style(&self) -> MetricStyle;
}
