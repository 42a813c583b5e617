//! Run one transmission scan on the simulated rig and export it as CSV.
//!
//! ```text
//! transmission_scan --start 1520 --end 1530 --speed 5 --channels ai0,ai1 --wavemeter
//! ```
//!
//! Logging honors `RUST_LOG`, falling back to the configured log level.
//! Ctrl-C stops the running scan.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use transmission_daq::config::Config;
use transmission_daq::data::storage::{CsvWriter, ScanMetadata};
use transmission_daq::instrument::{
    ExposureMode, SimulatedLaser, SimulatedSampler, SimulatedWavemeter, TransmissionModel,
    Wavemeter,
};
use transmission_daq::{
    ProgressEvent, SamplerParameters, ScanController, ScanParameters, ScanPhase,
    WavemeterParameters,
};

#[derive(Parser, Debug)]
#[command(name = "transmission_scan", version, about = "Swept-laser transmission scan")]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = transmission_daq::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Start wavelength in nm
    #[arg(long, default_value_t = 1520.0)]
    start: f64,

    /// End wavelength in nm
    #[arg(long, default_value_t = 1530.0)]
    end: f64,

    /// Forward sweep speed in nm/s
    #[arg(long, default_value_t = 5.0)]
    speed: f64,

    /// Return speed in nm/s
    #[arg(long, default_value_t = 0.1)]
    backward_speed: f64,

    /// Sampler device
    #[arg(long, default_value = "Dev1")]
    device: String,

    /// Analog input channels
    #[arg(long, value_delimiter = ',', default_value = "ai0,ai1")]
    channels: Vec<String>,

    /// Capture start and end wavelengths with the wavemeter
    #[arg(long)]
    wavemeter: bool,

    /// Wavemeter switch channel
    #[arg(long, default_value_t = 1)]
    wavemeter_channel: u8,

    /// Output directory, overrides the configured one
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip writing the dataset
    #[arg(long)]
    no_save: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.application.log_level)),
        )
        .init();

    let scan = ScanParameters::new(cli.start, cli.end, cli.speed).with_backward_speed(cli.backward_speed);
    let sampler_params = SamplerParameters::new(cli.device.clone(), cli.channels.clone());
    let wavemeter_params = WavemeterParameters {
        channel: cli.wavemeter_channel,
        exposure: ExposureMode::Auto,
    };

    let sim = &config.simulation;
    let laser = Arc::new(SimulatedLaser::with_slew_rate(1550.0, sim.slew_rate_nm_per_s));
    let model = TransmissionModel::new(sim, scan.start_wavelength, scan.forward_speed * scan.span().signum());
    let sampler = Arc::new(SimulatedSampler::new(sim.sample_rate_hz).with_model(model));

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    let mut controller = ScanController::new(laser.clone(), sampler)
        .with_settings(config.timing.clone())
        .with_progress_sink(Arc::new(progress_tx));
    let wavemeter = cli
        .wavemeter
        .then(|| Arc::new(SimulatedWavemeter::new(laser)));
    if let Some(wavemeter) = &wavemeter {
        controller = controller.with_wavemeter(wavemeter.clone());
    }
    let controller = Arc::new(controller);

    let reporter = tokio::spawn(report_progress(progress_rx));
    let interrupt = {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                controller.stop();
            }
        })
    };

    let result = controller
        .run_scan(&scan, Some(&wavemeter_params), &sampler_params)
        .await;
    interrupt.abort();
    let _ = interrupt.await;
    // Dropping the last controller closes the progress channel.
    drop(controller);
    let _ = reporter.await;

    if let Some(wavemeter) = &wavemeter {
        if let Err(e) = wavemeter.disconnect().await {
            warn!("Failed to disconnect wavemeter: {}", e);
        }
    }

    let dataset = match result {
        Ok(dataset) => dataset,
        Err(e) => {
            error!("Scan failed: {}", e);
            return Err(e.into());
        }
    };
    info!(
        "Captured {} samples, {:.4} -> {:.4} nm",
        dataset.len(),
        dataset.start_wavelength,
        dataset.end_wavelength
    );

    if !cli.no_save {
        let output_dir = cli.output.unwrap_or_else(|| config.application.output_dir.clone());
        let metadata = ScanMetadata::new(&scan, &sampler_params, &dataset);
        let path = CsvWriter::new(output_dir)
            .write(&dataset, &metadata)
            .context("Failed to write dataset")?;
        println!("{}", path.display());
    }
    Ok(())
}

/// Log phase changes and every tenth percent of sweep progress.
async fn report_progress(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    let mut last_phase = ScanPhase::Idle;
    let mut last_percent = 0u8;
    while let Some(event) = rx.recv().await {
        if event.phase != last_phase {
            info!("{} at {:.4} nm", event.phase, event.wavelength);
            last_phase = event.phase;
        } else if event.phase == ScanPhase::Scanning && event.percent / 10 > last_percent / 10 {
            info!("{:>3}% ({:.4} nm)", event.percent, event.wavelength);
        }
        last_percent = event.percent;
    }
}
