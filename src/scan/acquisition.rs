//! Scoped sampler acquisition.
//!
//! Once a sampler is started it must be stopped on every exit path of the
//! scan, including errors and cancellation. Async code cannot stop hardware
//! from `Drop`, so the controller runs the armed part of the scan between
//! [`Acquisition::start`] and [`Acquisition::release`], and only inspects the
//! outcome of that part after the release:
//!
//! ```rust,ignore
//! let mut acquisition = Acquisition::start(sampler, "Dev1", &channels, duration).await?;
//! let outcome = sweep(&mut acquisition).await;
//! acquisition.release().await;
//! let collected = outcome?;
//! ```
//!
//! An `Acquisition` dropped without being released (for example when the
//! scan future itself is dropped) logs an error; the sampler is then left
//! running.

use crate::error::AppResult;
use crate::instrument::AnalogSampler;
use std::time::Duration;
use tokio::time::Instant;

/// A started sampler acquisition.
pub struct Acquisition<'a> {
    sampler: &'a dyn AnalogSampler,
    device: String,
    started_at: Instant,
    stopped_at: Option<Instant>,
    released: bool,
}

impl<'a> Acquisition<'a> {
    /// Configure and start `sampler`.
    ///
    /// A failed configure or start returns an error and leaves nothing to
    /// release; a sampler that never started is not stopped.
    pub async fn start(
        sampler: &'a dyn AnalogSampler,
        device: &str,
        channels: &[String],
        duration: Duration,
    ) -> AppResult<Acquisition<'a>> {
        sampler.configure(device, channels, duration).await?;
        sampler.start().await?;
        tracing::debug!("Sampler armed on {} for {:?}", device, duration);
        Ok(Self {
            sampler,
            device: device.to_string(),
            started_at: Instant::now(),
            stopped_at: None,
            released: false,
        })
    }

    /// Instant the sampler was started.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Time since the sampler was started.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Stop the sampler and return the length of the armed window.
    ///
    /// A second call returns the same window without touching the sampler.
    pub async fn stop(&mut self) -> AppResult<Duration> {
        if let Some(stopped_at) = self.stopped_at {
            return Ok(stopped_at.duration_since(self.started_at));
        }
        self.sampler.stop().await?;
        let stopped_at = Instant::now();
        self.stopped_at = Some(stopped_at);
        Ok(stopped_at.duration_since(self.started_at))
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped_at.is_some()
    }

    /// End the scope, stopping the sampler if [`Acquisition::stop`] never succeeded.
    ///
    /// Failures here are logged rather than returned so they cannot mask the
    /// error that aborted the scan.
    pub async fn release(mut self) {
        self.released = true;
        if self.stopped_at.is_some() {
            return;
        }
        match self.sampler.stop().await {
            Ok(()) => tracing::info!("Sampler on {} stopped after aborted acquisition", self.device),
            Err(e) => tracing::warn!(
                "Failed to stop sampler on {} after aborted acquisition: {}",
                self.device,
                e
            ),
        }
    }
}

impl Drop for Acquisition<'_> {
    fn drop(&mut self) {
        if !self.released && self.stopped_at.is_none() {
            tracing::error!(
                "Acquisition on {} dropped while the sampler was still running",
                self.device
            );
        }
    }
}
