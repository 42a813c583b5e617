//! Instrument capabilities and simulated implementations.

pub mod capabilities;
pub mod mock;

pub use capabilities::{AnalogSampler, ExposureMode, RawChannelData, SweptLaser, Wavemeter};
pub use mock::{SimulatedLaser, SimulatedSampler, SimulatedWavemeter, TransmissionModel};
