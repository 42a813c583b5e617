//! Core library for the transmission_daq application.
//!
//! This library sweeps a tunable laser, records an optical transmission signal
//! with a hardware-timed sampler, and reconstructs the wavelength of every
//! sample from sparse laser and wavemeter readings. It is used by the
//! `transmission_scan` binary and can be driven directly by other front ends.
//!
//! - [`scan::ScanController`]: one scan cycle across laser, wavemeter and sampler
//! - [`data::align`]: wavelength-vs-time reconstruction on the sampler clock
//! - [`instrument`]: capability traits and simulated instruments
//! - [`config`]: Figment-based settings

pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod scan;

pub use data::AlignedDataset;
pub use error::{AppResult, DaqError};
pub use scan::{
    ProgressEvent, ProgressSink, SamplerParameters, ScanController, ScanParameters, ScanPhase,
    WavemeterParameters,
};
