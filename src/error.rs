//! Custom error types for the transmission scanner.
//!
//! This module defines the primary error type, `DaqError`, shared by the scan
//! controller, the time-alignment step and the instrument capability traits.
//! Using the `thiserror` crate keeps every failure mode of a scan in one place so
//! callers can match on exactly what went wrong.
//!
//! ## Error Hierarchy
//!
//! - **`InstrumentCommunication`**: a query or set against the laser, wavemeter or
//!   sampler failed. Carries the instrument name and the driver's message.
//! - **`AcquisitionRead`**: the sampler returned a different number of samples than
//!   the configured acquisition window implies, or dropped a channel.
//! - **`InsufficientSamples`**: fewer than four distinct wavelength timestamps were
//!   collected, so no cubic spline can be fitted.
//! - **`SettlingTimeout`**: the laser kept reporting "changing wavelength" past the
//!   configured bound.
//! - **`ConcurrentScanRejected`**: a scan is already running on the same controller.
//! - **`Cancelled`**: an external stop request interrupted the scan.
//! - **`InvalidParameters`**: scan or sampler parameters violate their invariants.
//! - **`InvalidDataset`**: a dataset handed to export has sequences of unequal length.
//! - **`Config`** / **`Configuration`**: loading or validating [`crate::config::ScanSettings`].
//! - **`FeatureNotEnabled`**: functionality compiled out via feature flags.
//!
//! Every variant aborts the scan in progress; none is retried automatically.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Communication with {instrument} failed: {message}")]
    InstrumentCommunication { instrument: String, message: String },

    #[error("Acquisition read error on channel '{channel}': expected {expected} samples, got {received}")]
    AcquisitionRead {
        channel: String,
        expected: usize,
        received: usize,
    },

    #[error("Insufficient wavelength samples: need at least {required} distinct timestamps, got {found}")]
    InsufficientSamples { required: usize, found: usize },

    #[error("Laser did not settle within {0:?}")]
    SettlingTimeout(Duration),

    #[error("A scan is already running on this controller")]
    ConcurrentScanRejected,

    #[error("Scan cancelled by stop request")]
    Cancelled,

    #[error("Invalid scan parameters: {0}")]
    InvalidParameters(String),

    #[error("Inconsistent dataset: {0}")]
    InvalidDataset(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// Builds an [`DaqError::InstrumentCommunication`] for the named instrument.
    pub fn communication(instrument: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InstrumentCommunication {
            instrument: instrument.into(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}
