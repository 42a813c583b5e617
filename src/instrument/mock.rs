//! Simulated instruments for running scans without hardware.
//!
//! All mocks derive their state from `tokio::time::Instant`, so a test running
//! on a paused clock (`#[tokio::test(start_paused = true)]`) sees deterministic
//! motion and sweep timing.
//!
//! # Available Mocks
//!
//! - `SimulatedLaser` - swept laser with finite slew rate and a one-way sweep
//! - `SimulatedWavemeter` - reads the wavelength of a `SimulatedLaser`
//! - `SimulatedSampler` - finite hardware-timed acquisition with a synthetic
//!   transmission signal
//!
//! Each mock can inject the faults the scan controller has to survive.

use crate::config::SimulationConfig;
use crate::error::{AppResult, DaqError};
use crate::instrument::capabilities::{
    AnalogSampler, ExposureMode, RawChannelData, SweptLaser, Wavemeter,
};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

// =============================================================================
// SimulatedLaser
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Motion {
    from: f64,
    to: f64,
    started: Instant,
}

#[derive(Debug)]
struct LaserState {
    wavelength: f64,
    motion: Option<Motion>,
    limits: (f64, f64),
    speeds: (f64, f64),
    sweep_started: Option<Instant>,
    scan_commands: Vec<bool>,
    scan_reads: usize,
}

impl LaserState {
    /// Advance motion and sweep to `now`.
    fn resolve(&mut self, now: Instant, slew_rate: f64, stuck: bool) {
        if let Some(motion) = self.motion {
            if stuck {
                return;
            }
            let travelled = slew_rate * now.duration_since(motion.started).as_secs_f64();
            let distance = motion.to - motion.from;
            if travelled >= distance.abs() {
                self.wavelength = motion.to;
                self.motion = None;
            } else {
                self.wavelength = motion.from + travelled.copysign(distance);
            }
        }

        if let Some(started) = self.sweep_started {
            let (start, stop) = self.limits;
            let span = stop - start;
            let travelled = self.speeds.0 * now.duration_since(started).as_secs_f64();
            if travelled >= span.abs() {
                self.wavelength = stop;
                self.sweep_started = None;
            } else {
                self.wavelength = start + travelled.copysign(span);
            }
        }
    }
}

#[derive(Debug, Default)]
struct LaserFaults {
    stuck_settling: bool,
    fail_scan_read_after: Option<usize>,
    ignore_scan_limits: bool,
}

/// Simulated swept laser.
///
/// Moves to commanded wavelengths at `slew_rate` nm/s and sweeps from the
/// start limit to the stop limit at the forward speed once scanning is
/// enabled.
///
/// # Example
///
/// ```rust,ignore
/// let laser = SimulatedLaser::new(1550.0);
/// laser.set_wavelength(1520.0).await?;
/// while laser.is_changing_wavelength().await? {
///     tokio::time::sleep(Duration::from_millis(20)).await;
/// }
/// ```
pub struct SimulatedLaser {
    state: Arc<RwLock<LaserState>>,
    faults: Arc<RwLock<LaserFaults>>,
    slew_rate: f64,
}

impl SimulatedLaser {
    /// Create a laser parked at `wavelength` nm with a 20 nm/s slew rate.
    pub fn new(wavelength: f64) -> Self {
        Self::with_slew_rate(wavelength, 20.0)
    }

    pub fn with_slew_rate(wavelength: f64, slew_rate: f64) -> Self {
        Self {
            state: Arc::new(RwLock::new(LaserState {
                wavelength,
                motion: None,
                limits: (wavelength, wavelength),
                speeds: (1.0, 1.0),
                sweep_started: None,
                scan_commands: Vec::new(),
                scan_reads: 0,
            })),
            faults: Arc::new(RwLock::new(LaserFaults::default())),
            slew_rate,
        }
    }

    /// Never finish travelling to a commanded wavelength.
    pub async fn stick_settling(&self) {
        self.faults.write().await.stuck_settling = true;
    }

    /// Fail every live scan wavelength query after `count` successful ones.
    pub async fn fail_scan_reads_after(&self, count: usize) {
        self.faults.write().await.fail_scan_read_after = Some(count);
    }

    /// Accept `set_scan_limits` without applying it.
    pub async fn ignore_scan_limits(&self) {
        self.faults.write().await.ignore_scan_limits = true;
    }

    /// History of `set_scan_active` commands.
    pub async fn scan_commands(&self) -> Vec<bool> {
        self.state.read().await.scan_commands.clone()
    }

    async fn resolved(&self) -> tokio::sync::RwLockWriteGuard<'_, LaserState> {
        let stuck = self.faults.read().await.stuck_settling;
        let mut state = self.state.write().await;
        state.resolve(Instant::now(), self.slew_rate, stuck);
        state
    }
}

#[async_trait]
impl SweptLaser for SimulatedLaser {
    async fn wavelength(&self) -> AppResult<f64> {
        Ok(self.resolved().await.wavelength)
    }

    async fn set_wavelength(&self, nm: f64) -> AppResult<()> {
        if !nm.is_finite() {
            return Err(DaqError::communication(
                "SimulatedLaser",
                format!("invalid wavelength {nm}"),
            ));
        }
        let mut state = self.resolved().await;
        let from = state.wavelength;
        state.sweep_started = None;
        state.motion = Some(Motion {
            from,
            to: nm,
            started: Instant::now(),
        });
        tracing::debug!("SimulatedLaser: moving from {:.4} nm to {:.4} nm", from, nm);
        Ok(())
    }

    async fn scan_limits(&self) -> AppResult<(f64, f64)> {
        Ok(self.state.read().await.limits)
    }

    async fn set_scan_limits(&self, start_nm: f64, stop_nm: f64) -> AppResult<()> {
        if self.faults.read().await.ignore_scan_limits {
            tracing::debug!("SimulatedLaser: ignoring scan limits ({start_nm}, {stop_nm})");
            return Ok(());
        }
        self.state.write().await.limits = (start_nm, stop_nm);
        Ok(())
    }

    async fn scan_speeds(&self) -> AppResult<(f64, f64)> {
        Ok(self.state.read().await.speeds)
    }

    async fn set_scan_speeds(&self, forward: f64, backward: f64) -> AppResult<()> {
        if forward <= 0.0 || backward <= 0.0 {
            return Err(DaqError::communication(
                "SimulatedLaser",
                format!("scan speeds must be positive, got ({forward}, {backward})"),
            ));
        }
        self.state.write().await.speeds = (forward, backward);
        Ok(())
    }

    async fn scan_active(&self) -> AppResult<bool> {
        Ok(self.resolved().await.sweep_started.is_some())
    }

    async fn set_scan_active(&self, active: bool) -> AppResult<()> {
        let mut state = self.resolved().await;
        state.scan_commands.push(active);
        if active {
            let start = state.limits.0;
            state.motion = None;
            state.wavelength = start;
            state.sweep_started = Some(Instant::now());
        } else {
            state.sweep_started = None;
        }
        Ok(())
    }

    async fn is_changing_wavelength(&self) -> AppResult<bool> {
        Ok(self.resolved().await.motion.is_some())
    }

    async fn is_scanning(&self) -> AppResult<bool> {
        Ok(self.resolved().await.sweep_started.is_some())
    }

    async fn scan_wavelength(&self) -> AppResult<f64> {
        let fail_after = self.faults.read().await.fail_scan_read_after;
        let mut state = self.resolved().await;
        if let Some(limit) = fail_after {
            if state.scan_reads >= limit {
                return Err(DaqError::communication(
                    "SimulatedLaser",
                    "no response to SENSe:WAVElength?",
                ));
            }
        }
        state.scan_reads += 1;
        Ok(state.wavelength)
    }
}

// =============================================================================
// SimulatedWavemeter
// =============================================================================

#[derive(Debug)]
struct WavemeterState {
    connected: bool,
    refuse_connection: bool,
    connect_attempts: usize,
    pulse_mode: bool,
    wide_mode: bool,
    fast_mode: bool,
    channel: u8,
    exposure: ExposureMode,
    acquiring: bool,
}

/// Simulated wavemeter observing a [`SimulatedLaser`].
///
/// Readings are the laser wavelength plus a fixed calibration offset.
pub struct SimulatedWavemeter {
    laser: Arc<SimulatedLaser>,
    offset_nm: f64,
    state: RwLock<WavemeterState>,
}

impl SimulatedWavemeter {
    /// Create a disconnected wavemeter watching `laser`.
    pub fn new(laser: Arc<SimulatedLaser>) -> Self {
        Self {
            laser,
            offset_nm: 0.0,
            state: RwLock::new(WavemeterState {
                connected: false,
                refuse_connection: false,
                connect_attempts: 0,
                pulse_mode: true,
                wide_mode: true,
                fast_mode: true,
                channel: 1,
                exposure: ExposureMode::Manual(10),
                acquiring: false,
            }),
        }
    }

    /// Add a constant offset to every reading.
    pub fn with_offset(mut self, offset_nm: f64) -> Self {
        self.offset_nm = offset_nm;
        self
    }

    /// Make every connection attempt fail.
    pub async fn refuse_connection(&self) {
        self.state.write().await.refuse_connection = true;
    }

    pub async fn connect_attempts(&self) -> usize {
        self.state.read().await.connect_attempts
    }

    pub async fn channel(&self) -> u8 {
        self.state.read().await.channel
    }

    pub async fn exposure(&self) -> ExposureMode {
        self.state.read().await.exposure
    }

    /// `(pulse, wide, fast)` mode switches.
    pub async fn modes(&self) -> (bool, bool, bool) {
        let state = self.state.read().await;
        (state.pulse_mode, state.wide_mode, state.fast_mode)
    }

    pub async fn is_acquiring(&self) -> bool {
        self.state.read().await.acquiring
    }
}

#[async_trait]
impl Wavemeter for SimulatedWavemeter {
    async fn is_connected(&self) -> AppResult<bool> {
        Ok(self.state.read().await.connected)
    }

    async fn connect(&self) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.connect_attempts += 1;
        if !state.refuse_connection {
            state.connected = true;
        }
        Ok(())
    }

    async fn disconnect(&self) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.connected = false;
        state.acquiring = false;
        Ok(())
    }

    async fn set_pulse_mode(&self, enabled: bool) -> AppResult<()> {
        self.state.write().await.pulse_mode = enabled;
        Ok(())
    }

    async fn set_wide_mode(&self, enabled: bool) -> AppResult<()> {
        self.state.write().await.wide_mode = enabled;
        Ok(())
    }

    async fn set_fast_mode(&self, enabled: bool) -> AppResult<()> {
        self.state.write().await.fast_mode = enabled;
        Ok(())
    }

    async fn set_channel(&self, channel: u8) -> AppResult<()> {
        if channel == 0 || channel > 8 {
            return Err(DaqError::communication(
                "SimulatedWavemeter",
                format!("channel {channel} out of range 1-8"),
            ));
        }
        self.state.write().await.channel = channel;
        Ok(())
    }

    async fn set_exposure(&self, mode: ExposureMode) -> AppResult<()> {
        self.state.write().await.exposure = mode;
        Ok(())
    }

    async fn set_acquire(&self, enabled: bool) -> AppResult<()> {
        self.state.write().await.acquiring = enabled;
        Ok(())
    }

    async fn wavelength(&self) -> AppResult<f64> {
        if !self.state.read().await.acquiring {
            return Err(DaqError::communication(
                "SimulatedWavemeter",
                "wavelength requested while acquisition is disabled",
            ));
        }
        Ok(self.laser.wavelength().await? + self.offset_nm)
    }
}

// =============================================================================
// SimulatedSampler
// =============================================================================

/// Synthetic transmission signal for a linear sweep.
///
/// The first configured channel carries a Lorentzian resonance dip, the
/// second a Mach-Zehnder fringe, any further channel only noise.
#[derive(Debug, Clone)]
pub struct TransmissionModel {
    start_nm: f64,
    speed_nm_per_s: f64,
    resonance_nm: f64,
    linewidth_nm: f64,
    mz_fsr_nm: f64,
    noise_v: f64,
}

impl TransmissionModel {
    /// Model a sweep starting at `start_nm` with signed speed `speed_nm_per_s`.
    pub fn new(sim: &SimulationConfig, start_nm: f64, speed_nm_per_s: f64) -> Self {
        Self {
            start_nm,
            speed_nm_per_s,
            resonance_nm: sim.resonance_nm,
            linewidth_nm: sim.linewidth_nm,
            mz_fsr_nm: sim.mz_fsr_nm,
            noise_v: sim.noise_v,
        }
    }

    fn value(&self, channel_index: usize, t: f64, rng: &mut StdRng) -> f64 {
        let lambda = self.start_nm + self.speed_nm_per_s * t;
        let noise = self.noise_v * (2.0 * rng.gen::<f64>() - 1.0);
        match channel_index {
            0 => {
                let half_width = 0.5 * self.linewidth_nm;
                let detuning = lambda - self.resonance_nm;
                let dip = 0.8 * half_width.powi(2) / (detuning.powi(2) + half_width.powi(2));
                1.0 - dip + noise
            }
            1 => {
                let phase = 2.0 * std::f64::consts::PI * lambda / self.mz_fsr_nm;
                0.5 + 0.5 * phase.cos() + noise
            }
            _ => noise,
        }
    }
}

#[derive(Debug, Clone)]
struct SamplerConfig {
    device: String,
    channels: Vec<String>,
    duration: Duration,
}

#[derive(Debug, Default)]
struct SamplerState {
    config: Option<SamplerConfig>,
    running: bool,
    start_count: usize,
    stop_count: usize,
    shortfall: usize,
    fail_start: bool,
}

/// Simulated finite analog acquisition.
///
/// A configured acquisition buffers `round(duration × rate)` samples per
/// channel; `read` hands back at most that many.
pub struct SimulatedSampler {
    rate_hz: f64,
    model: Option<TransmissionModel>,
    state: Arc<RwLock<SamplerState>>,
}

impl SimulatedSampler {
    pub fn new(rate_hz: f64) -> Self {
        Self {
            rate_hz,
            model: None,
            state: Arc::new(RwLock::new(SamplerState::default())),
        }
    }

    /// Fill the buffers from `model` instead of zeros.
    pub fn with_model(mut self, model: TransmissionModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Deliver `missing` fewer samples per channel than configured.
    pub async fn drop_samples(&self, missing: usize) {
        self.state.write().await.shortfall = missing;
    }

    /// Fail the next `start`.
    pub async fn fail_start(&self) {
        self.state.write().await.fail_start = true;
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.running
    }

    pub async fn start_count(&self) -> usize {
        self.state.read().await.start_count
    }

    pub async fn stop_count(&self) -> usize {
        self.state.read().await.stop_count
    }

    /// Device name of the last configuration.
    pub async fn device(&self) -> Option<String> {
        self.state
            .read()
            .await
            .config
            .as_ref()
            .map(|config| config.device.clone())
    }
}

#[async_trait]
impl AnalogSampler for SimulatedSampler {
    async fn configure(
        &self,
        device: &str,
        channels: &[String],
        duration: Duration,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.running {
            return Err(DaqError::communication(
                "SimulatedSampler",
                "cannot reconfigure a running task",
            ));
        }
        state.config = Some(SamplerConfig {
            device: device.to_string(),
            channels: channels.to_vec(),
            duration,
        });
        Ok(())
    }

    async fn sample_rate(&self) -> AppResult<f64> {
        Ok(self.rate_hz)
    }

    async fn start(&self) -> AppResult<()> {
        let mut state = self.state.write().await;
        if state.fail_start {
            state.fail_start = false;
            return Err(DaqError::communication("SimulatedSampler", "task failed to start"));
        }
        if state.config.is_none() {
            return Err(DaqError::communication(
                "SimulatedSampler",
                "start called before configure",
            ));
        }
        state.running = true;
        state.start_count += 1;
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        let mut state = self.state.write().await;
        state.running = false;
        state.stop_count += 1;
        Ok(())
    }

    async fn read(&self, samples_per_channel: usize) -> AppResult<RawChannelData> {
        let state = self.state.read().await;
        let config = state.config.as_ref().ok_or_else(|| {
            DaqError::communication("SimulatedSampler", "read called before configure")
        })?;

        let buffered = (config.duration.as_secs_f64() * self.rate_hz).round() as usize;
        let available = buffered.saturating_sub(state.shortfall).min(samples_per_channel);
        let mut rng = StdRng::seed_from_u64(0x5eed);

        let data = config
            .channels
            .iter()
            .enumerate()
            .map(|(index, channel)| {
                let samples = (0..available)
                    .map(|i| {
                        let t = i as f64 / self.rate_hz;
                        self.model
                            .as_ref()
                            .map_or(0.0, |model| model.value(index, t, &mut rng))
                    })
                    .collect();
                (channel.clone(), samples)
            })
            .collect();
        Ok(data)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
