//! Dataset export with clean feature flag handling.
//!
//! The CSV layout is one row per sampler tick:
//!
//! ```text
//! # { "start_wavelength": 1520.001, ... }
//! time_s,wavelength_nm,ai0,ai1
//! 0,1519.998,0.993,0.51
//! ```
//!
//! Scan metadata is written as JSON in `#`-prefixed comment lines above the header.

use crate::data::AlignedDataset;
use crate::error::{AppResult, DaqError};
use crate::scan::{SamplerParameters, ScanParameters};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Context stored next to an exported dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanMetadata {
    pub created: DateTime<Utc>,
    pub scan: ScanParameters,
    pub device: String,
    pub start_wavelength: f64,
    pub end_wavelength: f64,
    pub samples: usize,
    pub software_version: String,
}

impl ScanMetadata {
    pub fn new(scan: &ScanParameters, sampler: &SamplerParameters, dataset: &AlignedDataset) -> Self {
        Self {
            created: Utc::now(),
            scan: *scan,
            device: sampler.device.clone(),
            start_wavelength: dataset.start_wavelength,
            end_wavelength: dataset.end_wavelength,
            samples: dataset.len(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// ============================================================================
// CSV Writer
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    /// Writes datasets as CSV files into a directory.
    pub struct CsvWriter {
        output_dir: PathBuf,
    }

    impl CsvWriter {
        pub fn new(output_dir: impl Into<PathBuf>) -> Self {
            Self {
                output_dir: output_dir.into(),
            }
        }

        /// Write `dataset` to a timestamped file in the output directory.
        pub fn write(&self, dataset: &AlignedDataset, metadata: &ScanMetadata) -> AppResult<PathBuf> {
            if !self.output_dir.exists() {
                std::fs::create_dir_all(&self.output_dir)?;
            }
            let file_name = format!(
                "transmission_{}.csv",
                metadata.created.format("%Y%m%d_%H%M%S")
            );
            let path = self.output_dir.join(file_name);
            write_csv(&path, dataset, metadata)?;
            Ok(path)
        }
    }

    /// Write `dataset` to `path`, replacing any existing file.
    ///
    /// Fails with [`DaqError::InvalidDataset`] before touching `path` when the
    /// sequences of `dataset` differ in length.
    pub fn write_csv(path: &Path, dataset: &AlignedDataset, metadata: &ScanMetadata) -> AppResult<()> {
        dataset.validate()?;
        let mut file = File::create(path)?;

        let json_string = serde_json::to_string_pretty(metadata)
            .map_err(|e| DaqError::Io(std::io::Error::other(e)))?;
        for line in json_string.lines() {
            file.write_all(b"# ")
                .and_then(|_| file.write_all(line.as_bytes()))
                .and_then(|_| file.write_all(b"\n"))?;
        }

        let mut writer = csv::Writer::from_writer(file);
        let mut header = vec!["time_s".to_string(), "wavelength_nm".to_string()];
        header.extend(dataset.channels.keys().cloned());
        writer.write_record(&header)?;

        for i in 0..dataset.len() {
            let mut record = Vec::with_capacity(header.len());
            record.push(dataset.time[i].to_string());
            record.push(dataset.wavelength[i].to_string());
            record.extend(dataset.channels.values().map(|samples| samples[i].to_string()));
            writer.write_record(&record)?;
        }

        writer.flush()?;
        tracing::info!("Wrote {} samples to '{}'", dataset.len(), path.display());
        Ok(())
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    pub struct CsvWriter;

    impl CsvWriter {
        pub fn new(_output_dir: impl Into<PathBuf>) -> Self {
            Self
        }

        pub fn write(&self, _dataset: &AlignedDataset, _metadata: &ScanMetadata) -> AppResult<PathBuf> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }
    }

    pub fn write_csv(_path: &Path, _dataset: &AlignedDataset, _metadata: &ScanMetadata) -> AppResult<()> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::{write_csv, CsvWriter};

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::{write_csv, CsvWriter};
