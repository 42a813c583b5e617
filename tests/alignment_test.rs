//! Wavelength reconstruction through the public API.

use transmission_daq::data::{align, uniform_time_axis, WavelengthSample};
use transmission_daq::DaqError;

fn polls(pairs: &[(f64, f64)]) -> Vec<WavelengthSample> {
    pairs.iter().copied().map(WavelengthSample::from).collect()
}

#[test]
fn test_four_polls_onto_three_sample_times() {
    let samples = polls(&[(0.0, 1520.0), (0.33, 1522.5), (0.66, 1527.5), (1.0, 1530.0)]);
    let aligned = align(&samples, &[0.0, 0.5, 1.0]).unwrap();

    assert_eq!(aligned.len(), 3);
    assert!((aligned[0] - 1520.0).abs() < 1e-9);
    assert!((aligned[1] - 1525.078).abs() < 1e-3);
    assert!((aligned[2] - 1530.0).abs() < 1e-9);
}

#[test]
fn test_three_polls_are_not_enough() {
    let samples = polls(&[(0.0, 1520.0), (0.5, 1525.0), (1.0, 1530.0)]);
    let err = align(&samples, &[0.25]).unwrap_err();
    assert!(matches!(
        err,
        DaqError::InsufficientSamples {
            required: 4,
            found: 3
        }
    ));
}

#[test]
fn test_jittered_sweep_onto_sampler_clock() {
    // 10 nm at 5 nm/s polled roughly every 20 ms with uneven spacing.
    let samples: Vec<WavelengthSample> = (0..100)
        .map(|i| {
            let jitter = if i % 3 == 0 { 0.004 } else { -0.002 };
            let t = (i as f64 * 0.02 + jitter).max(0.0);
            WavelengthSample::new(t, 1520.0 + 5.0 * t)
        })
        .collect();
    let times = uniform_time_axis(2000, 2.0);
    let aligned = align(&samples, &times).unwrap();

    assert_eq!(aligned.len(), times.len());
    for (t, wavelength) in times.iter().zip(&aligned) {
        assert!((wavelength - (1520.0 + 5.0 * t)).abs() < 1e-6);
    }
}

#[test]
fn test_alignment_is_deterministic() {
    let samples = polls(&[(0.0, 1.0), (0.1, 1.5), (0.3, 2.5), (0.45, 2.0), (0.6, 3.0)]);
    let times = uniform_time_axis(50, 0.7);
    assert_eq!(align(&samples, &times).unwrap(), align(&samples, &times).unwrap());
}
