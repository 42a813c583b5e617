//! Scan controller: one transmission scan cycle across laser, wavemeter and sampler.
//!
//! # Scan Cycle
//!
//! ```text
//! configure laser ─► configure wavemeter ─► park at start (Settling)
//!        ─► capture start λ (StartCapture) ─► arm sampler ─► sweep (Scanning)
//!        ─► stop sampler ─► capture end λ (EndCapture) ─► read sampler
//!        ─► align λ(t) onto sampler clock ─► Done
//! ```
//!
//! The three instruments run on independent clocks. The only link between the
//! laser polls and the sampler data is the host clock, read right after the
//! sampler is armed and right after it is stopped; [`align`] absorbs the
//! remaining jitter.
//!
//! # Guarantees
//!
//! - Only one scan runs per controller at a time; a second `run_scan` fails
//!   with [`DaqError::ConcurrentScanRejected`] and leaves the first alone.
//! - Poll loops sleep [`ScanSettings::poll_interval`] between queries and the
//!   settling loop gives up after [`ScanSettings::settling_timeout`].
//! - A started sampler is stopped on every exit path.
//! - [`ScanController::stop`] is honored at every poll iteration.

use crate::config::ScanSettings;
use crate::data::{align, uniform_time_axis, AlignedDataset, WavelengthSample};
use crate::error::{AppResult, DaqError};
use crate::instrument::{AnalogSampler, RawChannelData, SweptLaser, Wavemeter};
use crate::scan::acquisition::Acquisition;
use crate::scan::progress::{NullSink, ProgressEvent, ProgressSink};
use crate::scan::{SamplerParameters, ScanParameters, WavemeterParameters};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Laser limits read back within this tolerance count as accepted (nm).
const LIMIT_TOLERANCE_NM: f64 = 1e-3;

/// Marks a scan as running for as long as it is alive.
///
/// Releasing the token also clears any pending stop request, so a request
/// made at any point of a scan is seen by that scan and by no later one.
struct ScanToken<'a> {
    running: &'a AtomicBool,
    stop_requested: &'a AtomicBool,
}

impl<'a> ScanToken<'a> {
    fn acquire(running: &'a AtomicBool, stop_requested: &'a AtomicBool) -> AppResult<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DaqError::ConcurrentScanRejected)?;
        Ok(Self {
            running,
            stop_requested,
        })
    }
}

impl Drop for ScanToken<'_> {
    fn drop(&mut self) {
        self.stop_requested.store(false, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }
}

/// Data gathered while the sampler was armed.
struct SweepRecord {
    samples: Vec<WavelengthSample>,
    window: Duration,
    end_wavelength: f64,
    channels: RawChannelData,
    samples_per_channel: usize,
}

/// Drives transmission scans on one set of instruments.
///
/// # Example
///
/// ```rust,ignore
/// let controller = ScanController::new(laser, sampler)
///     .with_wavemeter(wavemeter)
///     .with_progress_sink(Arc::new(progress_tx));
///
/// let scan = ScanParameters::new(1520.0, 1530.0, 5.0).with_backward_speed(0.1);
/// let sampler_params = SamplerParameters::new("Dev1", ["ai0", "ai1"]);
/// let dataset = controller
///     .run_scan(&scan, Some(&WavemeterParameters::default()), &sampler_params)
///     .await?;
/// ```
pub struct ScanController {
    laser: Arc<dyn SweptLaser>,
    wavemeter: Option<Arc<dyn Wavemeter>>,
    sampler: Arc<dyn AnalogSampler>,
    settings: ScanSettings,
    sink: Arc<dyn ProgressSink>,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl ScanController {
    pub fn new(laser: Arc<dyn SweptLaser>, sampler: Arc<dyn AnalogSampler>) -> Self {
        Self {
            laser,
            wavemeter: None,
            sampler,
            settings: ScanSettings::default(),
            sink: Arc::new(NullSink),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Read start and end wavelengths from `wavemeter` instead of the laser.
    pub fn with_wavemeter(mut self, wavemeter: Arc<dyn Wavemeter>) -> Self {
        self.wavemeter = Some(wavemeter);
        self
    }

    pub fn with_settings(mut self, settings: ScanSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    /// Whether a scan is in progress on this controller.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the running scan to abort at its next poll.
    ///
    /// The scan returns [`DaqError::Cancelled`]. Has no effect when idle; the
    /// request is cleared when the scan ends.
    pub fn stop(&self) {
        if self.is_running() {
            info!("Stop requested for running scan");
            self.stop_requested.store(true, Ordering::Release);
        }
    }

    /// Run one complete scan cycle and return the aligned dataset.
    ///
    /// `wavemeter_params` is only used when a wavemeter is attached; `None`
    /// then means [`WavemeterParameters::default`]. On error no dataset is
    /// produced and the last emitted progress event stands.
    pub async fn run_scan(
        &self,
        scan: &ScanParameters,
        wavemeter_params: Option<&WavemeterParameters>,
        sampler_params: &SamplerParameters,
    ) -> AppResult<AlignedDataset> {
        let _token = ScanToken::acquire(&self.running, &self.stop_requested)?;

        scan.validate()?;
        sampler_params.validate()?;
        self.settings.validate()?;

        info!(
            "Starting scan {:.4} -> {:.4} nm at {} nm/s ({:?}) on {} {:?}",
            scan.start_wavelength,
            scan.end_wavelength,
            scan.forward_speed,
            scan.duration(),
            sampler_params.device,
            sampler_params.read_channels
        );

        self.configure_laser(scan).await?;
        if let Some(wavemeter) = &self.wavemeter {
            let params = wavemeter_params.copied().unwrap_or_default();
            self.configure_wavemeter(wavemeter.as_ref(), &params).await?;
        }

        self.settle_at(scan.start_wavelength).await?;
        let start_wavelength = self.capture_wavelength().await?;
        debug!("Start wavelength {:.5} nm", start_wavelength);
        self.sink.emit(ProgressEvent::start_capture(start_wavelength));

        let mut acquisition = Acquisition::start(
            self.sampler.as_ref(),
            &sampler_params.device,
            &sampler_params.read_channels,
            scan.duration(),
        )
        .await?;
        let outcome = self.sweep(&mut acquisition, scan, sampler_params).await;
        acquisition.release().await;
        let record = outcome?;

        let time = uniform_time_axis(record.samples_per_channel, record.window.as_secs_f64());
        let wavelength = align(&record.samples, &time)?;

        info!(
            "Scan complete: {} samples per channel, {} wavelength polls over {:?}",
            record.samples_per_channel,
            record.samples.len(),
            record.window
        );
        self.sink.emit(ProgressEvent::done());

        Ok(AlignedDataset {
            time,
            wavelength,
            channels: record.channels,
            start_wavelength,
            end_wavelength: record.end_wavelength,
        })
    }

    async fn configure_laser(&self, scan: &ScanParameters) -> AppResult<()> {
        self.laser
            .set_scan_limits(scan.start_wavelength, scan.end_wavelength)
            .await?;
        self.laser
            .set_scan_speeds(scan.forward_speed, scan.backward_speed)
            .await?;

        let (start, stop) = self.laser.scan_limits().await?;
        if (start - scan.start_wavelength).abs() > LIMIT_TOLERANCE_NM
            || (stop - scan.end_wavelength).abs() > LIMIT_TOLERANCE_NM
        {
            return Err(DaqError::communication(
                "laser",
                format!(
                    "scan limits read back as ({start}, {stop}) nm, requested ({}, {}) nm",
                    scan.start_wavelength, scan.end_wavelength
                ),
            ));
        }
        let (forward, backward) = self.laser.scan_speeds().await?;
        if forward != scan.forward_speed || backward != scan.backward_speed {
            // Lasers round speeds to their own resolution.
            warn!(
                "Laser accepted scan speeds ({}, {}) nm/s for requested ({}, {}) nm/s",
                forward, backward, scan.forward_speed, scan.backward_speed
            );
        }
        Ok(())
    }

    async fn configure_wavemeter(
        &self,
        wavemeter: &dyn Wavemeter,
        params: &WavemeterParameters,
    ) -> AppResult<()> {
        if !wavemeter.is_connected().await? {
            info!("Wavemeter not connected, opening connection");
            wavemeter.connect().await?;
            sleep(self.settings.connect_retry_delay()).await;
            if !wavemeter.is_connected().await? {
                return Err(DaqError::communication(
                    "wavemeter",
                    "connection could not be opened",
                ));
            }
        }

        wavemeter.set_pulse_mode(false).await?;
        wavemeter.set_wide_mode(false).await?;
        wavemeter.set_fast_mode(false).await?;
        wavemeter.set_channel(params.channel).await?;
        wavemeter.set_exposure(params.exposure).await?;
        debug!(
            "Wavemeter on channel {} with {:?} exposure",
            params.channel, params.exposure
        );
        Ok(())
    }

    /// Park the laser at `target`, reporting progress until it stops moving.
    async fn settle_at(&self, target: f64) -> AppResult<()> {
        self.laser.set_wavelength(target).await?;
        let timeout = self.settings.settling_timeout();
        let deadline = Instant::now() + timeout;
        sleep(self.settings.command_delay()).await;

        loop {
            self.check_stop()?;
            if !self.laser.is_changing_wavelength().await? {
                break;
            }
            if Instant::now() >= deadline {
                warn!("Laser still moving to {:.4} nm after {:?}", target, timeout);
                return Err(DaqError::SettlingTimeout(timeout));
            }
            let current = self.laser.wavelength().await?;
            self.sink.emit(ProgressEvent::settling(current));
            sleep(self.settings.poll_interval()).await;
        }
        debug!("Laser settled at {:.4} nm", target);
        Ok(())
    }

    /// Settled wavelength from the wavemeter if attached, else from the laser.
    async fn capture_wavelength(&self) -> AppResult<f64> {
        let Some(wavemeter) = &self.wavemeter else {
            return self.laser.wavelength().await;
        };

        wavemeter.set_acquire(true).await?;
        sleep(self.settings.wavemeter_settle()).await;
        let reading = wavemeter.wavelength().await;
        let disabled = wavemeter.set_acquire(false).await;
        let wavelength = reading?;
        disabled?;
        Ok(wavelength)
    }

    /// Everything that happens while the sampler is armed.
    async fn sweep(
        &self,
        acquisition: &mut Acquisition<'_>,
        scan: &ScanParameters,
        sampler_params: &SamplerParameters,
    ) -> AppResult<SweepRecord> {
        self.laser.set_scan_active(true).await?;
        let samples = match self.track_sweep(acquisition, scan).await {
            Ok(samples) => samples,
            Err(e) => {
                self.abort_laser_sweep().await;
                return Err(e);
            }
        };

        let window = acquisition.stop().await?;
        debug!("Sampler stopped after {:?}", window);

        let end_wavelength = self.capture_wavelength().await?;
        debug!("End wavelength {:.5} nm", end_wavelength);
        self.sink.emit(ProgressEvent::end_capture(end_wavelength));

        let rate = self.sampler.sample_rate().await?;
        if !rate.is_finite() || rate <= 0.0 {
            return Err(DaqError::communication(
                "sampler",
                format!("reported sample rate {rate} Hz"),
            ));
        }
        let samples_per_channel = (scan.duration().as_secs_f64() * rate).round() as usize;
        let channels = self.read_channels(samples_per_channel, sampler_params).await?;

        Ok(SweepRecord {
            samples,
            window,
            end_wavelength,
            channels,
            samples_per_channel,
        })
    }

    /// Switch the laser sweep off if it is still requested. Failures are only logged.
    async fn abort_laser_sweep(&self) {
        match self.laser.scan_active().await {
            Ok(false) => debug!("Laser sweep already inactive"),
            Ok(true) | Err(_) => {
                if let Err(e) = self.laser.set_scan_active(false).await {
                    warn!("Failed to abort laser sweep: {}", e);
                }
            }
        }
    }

    /// Poll the sweeping laser until it reports the sweep finished.
    async fn track_sweep(
        &self,
        acquisition: &Acquisition<'_>,
        scan: &ScanParameters,
    ) -> AppResult<Vec<WavelengthSample>> {
        let mut samples = Vec::new();
        let mut percent = 0u8;

        loop {
            self.check_stop()?;
            if !self.laser.is_scanning().await? {
                break;
            }
            let wavelength = self.laser.scan_wavelength().await?;
            let timestamp = acquisition.elapsed().as_secs_f64();
            samples.push(WavelengthSample::new(timestamp, wavelength));

            // Polling jitter can report a slightly earlier wavelength; progress never goes back.
            percent = percent.max(scan.percent_at(wavelength));
            self.sink.emit(ProgressEvent::scanning(wavelength, percent));
            sleep(self.settings.poll_interval()).await;
        }

        debug!("Sweep finished after {} polls", samples.len());
        Ok(samples)
    }

    async fn read_channels(
        &self,
        expected: usize,
        sampler_params: &SamplerParameters,
    ) -> AppResult<RawChannelData> {
        let mut data = self.sampler.read(expected).await?;
        let mut channels = RawChannelData::new();
        for id in &sampler_params.read_channels {
            let samples = data.remove(id).unwrap_or_default();
            if samples.len() != expected {
                return Err(DaqError::AcquisitionRead {
                    channel: id.clone(),
                    expected,
                    received: samples.len(),
                });
            }
            channels.insert(id.clone(), samples);
        }
        Ok(channels)
    }

    fn check_stop(&self) -> AppResult<()> {
        if self.stop_requested.load(Ordering::Acquire) {
            return Err(DaqError::Cancelled);
        }
        Ok(())
    }
}
