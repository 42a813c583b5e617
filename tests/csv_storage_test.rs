//! CSV export of aligned datasets.
#![cfg(feature = "storage_csv")]

use std::collections::BTreeMap;
use tempfile::tempdir;
use transmission_daq::data::storage::{write_csv, CsvWriter, ScanMetadata};
use transmission_daq::{AlignedDataset, DaqError, SamplerParameters, ScanParameters};

fn dataset() -> AlignedDataset {
    let mut channels = BTreeMap::new();
    channels.insert("ai0".to_string(), vec![0.99, 0.41, 0.98]);
    channels.insert("ai1".to_string(), vec![0.5, 0.75, 0.25]);
    AlignedDataset {
        time: vec![0.0, 0.5, 1.0],
        wavelength: vec![1520.0, 1522.5, 1525.0],
        channels,
        start_wavelength: 1520.0,
        end_wavelength: 1525.0,
    }
}

fn metadata(dataset: &AlignedDataset) -> ScanMetadata {
    let scan = ScanParameters::new(1520.0, 1525.0, 5.0);
    let sampler = SamplerParameters::new("Dev1", ["ai0", "ai1"]);
    ScanMetadata::new(&scan, &sampler, dataset)
}

#[test]
fn test_csv_layout() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("scan.csv");
    let data = dataset();
    write_csv(&path, &data, &metadata(&data)).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let (comments, body): (Vec<&str>, Vec<&str>) =
        content.lines().partition(|line| line.starts_with("# "));

    let json: String = comments.iter().map(|line| &line[2..]).collect::<Vec<_>>().join("\n");
    let restored: ScanMetadata = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.device, "Dev1");
    assert_eq!(restored.samples, 3);
    assert_eq!(restored.scan.end_wavelength, 1525.0);

    assert_eq!(body[0], "time_s,wavelength_nm,ai0,ai1");
    assert_eq!(body[1], "0,1520,0.99,0.5");
    assert_eq!(body[3], "1,1525,0.98,0.25");
    assert_eq!(body.len(), 4);
}

#[test]
fn test_unequal_lengths_are_rejected_without_writing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("scan.csv");
    let mut data = dataset();
    let meta = metadata(&data);
    data.channels.get_mut("ai1").unwrap().truncate(2);

    let err = write_csv(&path, &data, &meta).unwrap_err();
    assert!(matches!(err, DaqError::InvalidDataset(_)));
    assert!(!path.exists());
}

#[test]
fn test_writer_creates_output_directory() {
    let dir = tempdir().unwrap();
    let output = dir.path().join("nested").join("runs");
    let data = dataset();

    let path = CsvWriter::new(&output).write(&data, &metadata(&data)).unwrap();

    assert!(path.starts_with(&output));
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("transmission_") && name.ends_with(".csv"));
    assert!(path.exists());
}
