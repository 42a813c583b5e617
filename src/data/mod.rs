//! Scan output: time alignment and export.

pub mod alignment;
pub mod storage;

pub use alignment::{align, CubicSpline, WavelengthSample};

use crate::error::{AppResult, DaqError};
use crate::instrument::RawChannelData;
use serde::{Deserialize, Serialize};

/// Result of one transmission scan.
///
/// `time`, `wavelength` and every channel hold one value per sampler tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedDataset {
    /// Seconds since the sampler was armed, uniformly spaced from 0
    pub time: Vec<f64>,
    /// Laser wavelength in nm at each sample time
    pub wavelength: Vec<f64>,
    /// Sampled voltages per channel
    pub channels: RawChannelData,
    /// Settled wavelength before the sweep
    pub start_wavelength: f64,
    /// Settled wavelength after the sweep
    pub end_wavelength: f64,
}

impl AlignedDataset {
    /// Number of samples per sequence.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Check that `wavelength` and every channel have one value per time point.
    pub fn validate(&self) -> AppResult<()> {
        let expected = self.time.len();
        if self.wavelength.len() != expected {
            return Err(DaqError::InvalidDataset(format!(
                "{} wavelength values for {} time points",
                self.wavelength.len(),
                expected
            )));
        }
        for (id, samples) in &self.channels {
            if samples.len() != expected {
                return Err(DaqError::InvalidDataset(format!(
                    "channel '{id}' has {} samples for {} time points",
                    samples.len(),
                    expected
                )));
            }
        }
        Ok(())
    }

    /// Samples of one channel.
    pub fn channel(&self, id: &str) -> Option<&[f64]> {
        self.channels.get(id).map(Vec::as_slice)
    }
}

/// `count` evenly spaced points from 0 to `span` inclusive.
pub fn uniform_time_axis(count: usize, span: f64) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => {
            let step = span / (count - 1) as f64;
            (0..count).map(|i| i as f64 * step).collect()
        }
    }
}
