//! Transmission scan orchestration.
//!
//! A scan parks the laser at the start wavelength, arms the sampler, sweeps the
//! laser to the end wavelength while logging `(time, wavelength)` pairs, then
//! maps those pairs onto the sampler's time base.
//!
//! - [`ScanController`]: runs one scan cycle against a laser, an optional
//!   wavemeter and a sampler
//! - [`ProgressEvent`] / [`ProgressSink`]: phase and progress reporting
//! - [`ScanParameters`], [`WavemeterParameters`], [`SamplerParameters`]: the
//!   caller-supplied description of a scan

pub mod acquisition;
pub mod controller;
pub mod progress;

pub use controller::ScanController;
pub use progress::{NullSink, ProgressEvent, ProgressSink, ScanPhase};

use crate::error::{AppResult, DaqError};
use crate::instrument::ExposureMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Laser sweep description. Wavelengths in nm, speeds in nm/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanParameters {
    pub start_wavelength: f64,
    pub end_wavelength: f64,
    pub forward_speed: f64,
    pub backward_speed: f64,
}

impl ScanParameters {
    pub fn new(start_wavelength: f64, end_wavelength: f64, forward_speed: f64) -> Self {
        Self {
            start_wavelength,
            end_wavelength,
            forward_speed,
            backward_speed: forward_speed,
        }
    }

    pub fn with_backward_speed(mut self, backward_speed: f64) -> Self {
        self.backward_speed = backward_speed;
        self
    }

    /// Signed sweep span `end - start`.
    pub fn span(&self) -> f64 {
        self.end_wavelength - self.start_wavelength
    }

    /// Time the forward sweep takes: `|end - start| / forward_speed`.
    ///
    /// Saturates at [`Duration::MAX`] for parameters [`ScanParameters::validate`] rejects.
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.span().abs() / self.forward_speed).unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> AppResult<()> {
        let values = [
            self.start_wavelength,
            self.end_wavelength,
            self.forward_speed,
            self.backward_speed,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DaqError::InvalidParameters(format!(
                "all scan parameters must be finite: {self:?}"
            )));
        }
        if self.start_wavelength == self.end_wavelength {
            return Err(DaqError::InvalidParameters(format!(
                "start and end wavelength are both {} nm",
                self.start_wavelength
            )));
        }
        if self.forward_speed <= 0.0 || self.backward_speed <= 0.0 {
            return Err(DaqError::InvalidParameters(format!(
                "scan speeds must be positive, got forward {} and backward {}",
                self.forward_speed, self.backward_speed
            )));
        }
        let seconds = self.span().abs() / self.forward_speed;
        if Duration::try_from_secs_f64(seconds).is_err() {
            return Err(DaqError::InvalidParameters(format!(
                "sweep of {} nm at {} nm/s does not fit in a duration",
                self.span().abs(),
                self.forward_speed
            )));
        }
        Ok(())
    }

    /// Fraction of the sweep covered at `wavelength`, in whole percent.
    ///
    /// Clamped to `[0, 100]` so readings overshooting either limit stay in range.
    pub fn percent_at(&self, wavelength: f64) -> u8 {
        let fraction = (wavelength - self.start_wavelength) / self.span();
        (100.0 * fraction).floor().clamp(0.0, 100.0) as u8
    }
}

/// Wavemeter setup for the duration of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WavemeterParameters {
    /// Fiber switch channel
    pub channel: u8,
    #[serde(default)]
    pub exposure: ExposureMode,
}

impl Default for WavemeterParameters {
    fn default() -> Self {
        Self {
            channel: 1,
            exposure: ExposureMode::Auto,
        }
    }
}

/// Sampler setup. The acquisition window comes from [`ScanParameters::duration`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerParameters {
    /// Device identifier, e.g. `Dev1`
    pub device: String,
    /// Analog input channels, in acquisition order
    pub read_channels: Vec<String>,
}

impl SamplerParameters {
    pub fn new<I, S>(device: impl Into<String>, read_channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            device: device.into(),
            read_channels: read_channels.into_iter().map(Into::into).collect(),
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.read_channels.is_empty() {
            return Err(DaqError::InvalidParameters(
                "at least one read channel is required".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for channel in &self.read_channels {
            if !seen.insert(channel) {
                return Err(DaqError::InvalidParameters(format!(
                    "read channel '{channel}' listed twice"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_from_span_and_speed() {
        let params = ScanParameters::new(1520.0, 1530.0, 5.0);
        assert_eq!(params.duration(), Duration::from_secs(2));

        let reverse = ScanParameters::new(1530.0, 1520.0, 5.0);
        assert_eq!(reverse.duration(), Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_degenerate_scan() {
        let params = ScanParameters::new(1520.0, 1520.0, 5.0);
        assert!(matches!(
            params.validate(),
            Err(DaqError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_rejects_non_positive_speed() {
        let params = ScanParameters::new(1520.0, 1530.0, 5.0).with_backward_speed(0.0);
        assert!(params.validate().is_err());

        let params = ScanParameters::new(1520.0, 1530.0, -1.0);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_rejects_unrepresentable_duration() {
        let params = ScanParameters::new(1520.0, 1530.0, 1e-300);
        assert!(matches!(
            params.validate(),
            Err(DaqError::InvalidParameters(_))
        ));
        assert_eq!(params.duration(), Duration::MAX);
    }

    #[test]
    fn test_percent_is_clamped() {
        let params = ScanParameters::new(1520.0, 1530.0, 5.0);
        assert_eq!(params.percent_at(1519.0), 0);
        assert_eq!(params.percent_at(1520.0), 0);
        assert_eq!(params.percent_at(1525.05), 50);
        assert_eq!(params.percent_at(1530.0), 100);
        assert_eq!(params.percent_at(1531.0), 100);
    }

    #[test]
    fn test_percent_for_downward_scan() {
        let params = ScanParameters::new(1530.0, 1520.0, 5.0);
        assert_eq!(params.percent_at(1530.0), 0);
        assert_eq!(params.percent_at(1522.5), 75);
        assert_eq!(params.percent_at(1520.0), 100);
    }

    #[test]
    fn test_sampler_parameters_validation() {
        assert!(SamplerParameters::new("Dev1", ["ai0", "ai1"]).validate().is_ok());
        assert!(SamplerParameters::new("Dev1", Vec::<String>::new())
            .validate()
            .is_err());
        assert!(SamplerParameters::new("Dev1", ["ai0", "ai0"])
            .validate()
            .is_err());
    }
}
