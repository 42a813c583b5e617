//! Configuration loading using Figment.
//!
//! Settings are merged from three layers, lowest precedence first:
//! 1. Built-in defaults ([`Config::default`])
//! 2. A TOML file (`config/transmission.toml` unless another path is given)
//! 3. Environment variables prefixed with `TRANSMISSION_`; nested keys are
//!    separated by a double underscore
//!
//! ```text
//! TRANSMISSION_APPLICATION__LOG_LEVEL=debug
//! TRANSMISSION_TIMING__POLL_INTERVAL_MS=10
//! TRANSMISSION_TIMING__SETTLING_TIMEOUT_SECS=60
//! ```
//!
//! A missing TOML file is not an error; the defaults are used instead.

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/transmission.toml";

/// Minimum wait between enabling wavemeter acquisition and reading it.
pub const MIN_WAVEMETER_SETTLE_MS: u64 = 500;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Application settings
    pub application: ApplicationConfig,
    /// Poll and settle timing used by the scan controller
    pub timing: ScanSettings,
    /// Parameters of the simulated rig driven by the CLI
    pub simulation: SimulationConfig,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Directory receiving exported datasets
    pub output_dir: PathBuf,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            output_dir: PathBuf::from("data"),
        }
    }
}

/// Timing knobs of one scan cycle.
///
/// All values are plain integers so they can be overridden from the
/// environment; use the accessor methods to get [`Duration`]s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanSettings {
    /// Interval between two instrument polls while settling or scanning
    pub poll_interval_ms: u64,
    /// Upper bound for the laser to reach the start wavelength
    pub settling_timeout_secs: u64,
    /// Delay after a wavelength command before the first settling poll
    pub command_delay_ms: u64,
    /// Wavemeter acquisition time before a settled reading is taken
    pub wavemeter_settle_ms: u64,
    /// Wait after re-opening a disconnected wavemeter
    pub connect_retry_delay_ms: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            settling_timeout_secs: 30,
            command_delay_ms: 100,
            wavemeter_settle_ms: MIN_WAVEMETER_SETTLE_MS,
            connect_retry_delay_ms: 1000,
        }
    }
}

impl ScanSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settling_timeout(&self) -> Duration {
        Duration::from_secs(self.settling_timeout_secs)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    pub fn wavemeter_settle(&self) -> Duration {
        Duration::from_millis(self.wavemeter_settle_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    /// Checks the invariants the controller relies on.
    pub fn validate(&self) -> AppResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.settling_timeout_secs == 0 {
            return Err(DaqError::Configuration(
                "settling_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.wavemeter_settle_ms < MIN_WAVEMETER_SETTLE_MS {
            return Err(DaqError::Configuration(format!(
                "wavemeter_settle_ms {} is below the minimum of {} ms",
                self.wavemeter_settle_ms, MIN_WAVEMETER_SETTLE_MS
            )));
        }
        Ok(())
    }
}

/// Simulated rig used by the `transmission_scan` binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Sampler rate in Hz
    pub sample_rate_hz: f64,
    /// Laser slew rate when moving to a target wavelength (nm/s)
    pub slew_rate_nm_per_s: f64,
    /// Center of the simulated resonance dip (nm)
    pub resonance_nm: f64,
    /// Full width at half maximum of the dip (nm)
    pub linewidth_nm: f64,
    /// Free spectral range of the simulated Mach-Zehnder reference (nm)
    pub mz_fsr_nm: f64,
    /// Peak amplitude of uniform additive detector noise (V)
    pub noise_v: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1000.0,
            slew_rate_nm_per_s: 20.0,
            resonance_nm: 1525.0,
            linewidth_nm: 0.05,
            mz_fsr_nm: 0.2,
            noise_v: 0.002,
        }
    }
}

impl Config {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path, then validate it.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TRANSMISSION_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.timing.validate()?;

        let sim = &self.simulation;
        if !sim.sample_rate_hz.is_finite() || sim.sample_rate_hz <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "sample_rate_hz must be positive, got {}",
                sim.sample_rate_hz
            )));
        }
        if !sim.slew_rate_nm_per_s.is_finite() || sim.slew_rate_nm_per_s <= 0.0 {
            return Err(DaqError::Configuration(format!(
                "slew_rate_nm_per_s must be positive, got {}",
                sim.slew_rate_nm_per_s
            )));
        }
        Ok(())
    }
}
