//! Capability traits for the instruments taking part in a transmission scan.
//!
//! The scan controller only talks to hardware through these traits. Each
//! method maps to a single query or set against the device and validates or
//! converts its value at that boundary; drivers report failures as
//! [`DaqError::InstrumentCommunication`](crate::error::DaqError::InstrumentCommunication).
//!
//! All state is polled. None of the traits push notifications.

use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Per-channel sample arrays returned by an [`AnalogSampler`], keyed by channel id.
pub type RawChannelData = BTreeMap<String, Vec<f64>>;

/// Tunable laser with a built-in wavelength sweep.
///
/// Wavelengths are in nm, speeds in nm/s.
#[async_trait]
pub trait SweptLaser: Send + Sync {
    /// Current wavelength readback.
    async fn wavelength(&self) -> AppResult<f64>;

    /// Command the laser to move to `nm`. Returns once the command is accepted;
    /// use [`SweptLaser::is_changing_wavelength`] to follow the move.
    async fn set_wavelength(&self, nm: f64) -> AppResult<()>;

    /// Sweep limits as `(start, stop)`.
    async fn scan_limits(&self) -> AppResult<(f64, f64)>;

    async fn set_scan_limits(&self, start_nm: f64, stop_nm: f64) -> AppResult<()>;

    /// Sweep speeds as `(forward, backward)`.
    async fn scan_speeds(&self) -> AppResult<(f64, f64)>;

    async fn set_scan_speeds(&self, forward: f64, backward: f64) -> AppResult<()>;

    /// Whether a sweep has been requested.
    async fn scan_active(&self) -> AppResult<bool>;

    /// Start (`true`) or abort (`false`) the sweep between the configured limits.
    async fn set_scan_active(&self, active: bool) -> AppResult<()>;

    /// True while the laser is still travelling to a commanded wavelength.
    async fn is_changing_wavelength(&self) -> AppResult<bool>;

    /// True while a sweep is in progress.
    async fn is_scanning(&self) -> AppResult<bool>;

    /// Live wavelength reported during a sweep.
    async fn scan_wavelength(&self) -> AppResult<f64>;
}

/// Wavemeter exposure control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExposureMode {
    /// Instrument picks the exposure
    #[default]
    Auto,
    /// Fixed exposure in milliseconds
    Manual(u32),
}

/// Optical wavemeter giving an absolute wavelength reference.
#[async_trait]
pub trait Wavemeter: Send + Sync {
    async fn is_connected(&self) -> AppResult<bool>;

    /// Open the connection to the wavemeter server.
    async fn connect(&self) -> AppResult<()>;

    /// Close the connection. Closing a closed connection is not an error.
    async fn disconnect(&self) -> AppResult<()>;

    async fn set_pulse_mode(&self, enabled: bool) -> AppResult<()>;

    async fn set_wide_mode(&self, enabled: bool) -> AppResult<()>;

    async fn set_fast_mode(&self, enabled: bool) -> AppResult<()>;

    /// Select the switch channel the laser is fibered to.
    async fn set_channel(&self, channel: u8) -> AppResult<()>;

    async fn set_exposure(&self, mode: ExposureMode) -> AppResult<()>;

    /// Enable or disable continuous acquisition.
    async fn set_acquire(&self, enabled: bool) -> AppResult<()>;

    /// Last measured wavelength in nm. Only meaningful while acquiring.
    async fn wavelength(&self) -> AppResult<f64>;
}

/// Hardware-timed analog input.
///
/// The acquisition runs inside the device once started; the host only
/// arms, stops and reads it back.
#[async_trait]
pub trait AnalogSampler: Send + Sync {
    /// Prepare a finite acquisition of `duration` on `channels` of `device`.
    async fn configure(&self, device: &str, channels: &[String], duration: Duration)
        -> AppResult<()>;

    /// Sample clock of the configured acquisition in Hz.
    async fn sample_rate(&self) -> AppResult<f64>;

    /// Arm and start the acquisition without waiting for it to finish.
    async fn start(&self) -> AppResult<()>;

    /// Stop the acquisition. Stopping an idle sampler is not an error.
    async fn stop(&self) -> AppResult<()>;

    /// Read up to `samples_per_channel` buffered samples for every configured channel.
    async fn read(&self, samples_per_channel: usize) -> AppResult<RawChannelData>;
}
