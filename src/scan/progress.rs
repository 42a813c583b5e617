//! Progress reporting for a running scan.
//!
//! The controller emits one [`ProgressEvent`] per state change and per poll.
//! Events are handed synchronously to a single [`ProgressSink`]; sinks must not
//! block and never acknowledge.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{broadcast, mpsc};

/// Where a scan cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    /// No scan running
    Idle,
    /// Laser travelling to the start wavelength
    Settling,
    /// Sweep in progress
    Scanning,
    /// Settled start wavelength captured
    StartCapture,
    /// Settled end wavelength captured
    EndCapture,
    /// Scan finished, dataset produced
    Done,
}

impl ScanPhase {
    /// Numeric status code understood by the legacy acquisition front end.
    pub fn code(&self) -> i8 {
        match self {
            ScanPhase::Idle | ScanPhase::Done => -1,
            ScanPhase::Settling => 0,
            ScanPhase::Scanning => 1,
            ScanPhase::StartCapture => 2,
            ScanPhase::EndCapture => 3,
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Settling => "settling",
            ScanPhase::Scanning => "scanning",
            ScanPhase::StartCapture => "start_capture",
            ScanPhase::EndCapture => "end_capture",
            ScanPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Snapshot of scan progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: ScanPhase,
    /// Current wavelength in nm, `-1.0` once the scan is done
    pub wavelength: f64,
    /// Sweep completion in percent, only meaningful while scanning
    pub percent: u8,
}

impl ProgressEvent {
    pub fn new(phase: ScanPhase, wavelength: f64, percent: u8) -> Self {
        Self {
            phase,
            wavelength,
            percent,
        }
    }

    pub fn settling(wavelength: f64) -> Self {
        Self::new(ScanPhase::Settling, wavelength, 0)
    }

    pub fn scanning(wavelength: f64, percent: u8) -> Self {
        Self::new(ScanPhase::Scanning, wavelength, percent)
    }

    pub fn start_capture(wavelength: f64) -> Self {
        Self::new(ScanPhase::StartCapture, wavelength, 0)
    }

    pub fn end_capture(wavelength: f64) -> Self {
        Self::new(ScanPhase::EndCapture, wavelength, 0)
    }

    /// Terminal sentinel: wavelength `-1`, zero percent.
    pub fn done() -> Self {
        Self::new(ScanPhase::Done, -1.0, 0)
    }
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events to a closure.
pub struct CallbackSink<F>(pub F);

impl<F> ProgressSink for CallbackSink<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        (self.0)(event)
    }
}

impl ProgressSink for mpsc::UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is watching anymore.
        let _ = self.send(event);
    }
}

impl ProgressSink for broadcast::Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.send(event);
    }
}
