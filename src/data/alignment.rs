//! Wavelength alignment onto the sampler time base.
//!
//! During a sweep the laser's wavelength is polled at irregular intervals while
//! the sampler digitizes on its own uniform clock. [`align`] fits a cubic
//! spline through the polled `(timestamp, wavelength)` pairs and evaluates it
//! at every sampler timestamp.
//!
//! The spline interpolates: it passes through every distinct sample and uses
//! not-a-knot end conditions, which is the cubic `s = 0` spline of FITPACK.
//! Evaluation outside the sampled time range extends the first or last cubic
//! piece. Those extrapolated wavelengths carry no accuracy guarantee; with a
//! controller polling every few milliseconds they only cover the short gaps
//! between sampler arm/stop and the first/last laser poll.

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};

/// Minimum number of distinct timestamps needed for a cubic fit.
pub const MIN_SPLINE_POINTS: usize = 4;

/// One wavelength reading taken while the laser was sweeping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WavelengthSample {
    /// Seconds since the sampler was armed
    pub timestamp: f64,
    /// Wavelength in nm
    pub wavelength: f64,
}

impl WavelengthSample {
    pub fn new(timestamp: f64, wavelength: f64) -> Self {
        Self {
            timestamp,
            wavelength,
        }
    }
}

impl From<(f64, f64)> for WavelengthSample {
    fn from((timestamp, wavelength): (f64, f64)) -> Self {
        Self::new(timestamp, wavelength)
    }
}

/// Interpolating cubic spline with not-a-knot end conditions.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivative at each knot
    m: Vec<f64>,
}

impl CubicSpline {
    /// Fit the spline through `(x[i], y[i])`.
    ///
    /// `x` must be strictly increasing and hold at least [`MIN_SPLINE_POINTS`]
    /// values; use [`align`] for raw, unsorted polling data.
    pub fn fit(x: &[f64], y: &[f64]) -> AppResult<Self> {
        if x.len() != y.len() {
            return Err(DaqError::InvalidParameters(format!(
                "spline abscissa has {} points but ordinate has {}",
                x.len(),
                y.len()
            )));
        }
        if x.len() < MIN_SPLINE_POINTS {
            return Err(DaqError::InsufficientSamples {
                required: MIN_SPLINE_POINTS,
                found: x.len(),
            });
        }
        if x.windows(2).any(|w| w[1] <= w[0]) {
            return Err(DaqError::InvalidParameters(
                "spline abscissa must be strictly increasing".to_string(),
            ));
        }

        let n = x.len();
        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let slope: Vec<f64> = (0..n - 1).map(|i| (y[i + 1] - y[i]) / h[i]).collect();

        // Interior equations for M[1..n-1]:
        //   h[i-1] M[i-1] + 2 (h[i-1] + h[i]) M[i] + h[i] M[i+1] = 6 (slope[i] - slope[i-1])
        // with M[0] and M[n-1] eliminated through the not-a-knot conditions
        // (continuous third derivative at x[1] and x[n-2]).
        let rows = n - 2;
        let mut lower = vec![0.0; rows];
        let mut diag = vec![0.0; rows];
        let mut upper = vec![0.0; rows];
        let mut rhs = vec![0.0; rows];
        for k in 0..rows {
            let i = k + 1;
            lower[k] = h[i - 1];
            diag[k] = 2.0 * (h[i - 1] + h[i]);
            upper[k] = h[i];
            rhs[k] = 6.0 * (slope[i] - slope[i - 1]);
        }

        let (h0, h1) = (h[0], h[1]);
        diag[0] = (h0 + h1) * (2.0 * h1 + h0) / h1;
        upper[0] = (h1 * h1 - h0 * h0) / h1;

        let (a, b) = (h[n - 3], h[n - 2]);
        lower[rows - 1] = (a * a - b * b) / a;
        diag[rows - 1] = (a + b) * (2.0 * a + b) / a;

        let interior = solve_tridiagonal(&lower, &diag, &upper, &rhs)?;

        let mut m = vec![0.0; n];
        m[1..n - 1].copy_from_slice(&interior);
        m[0] = ((h0 + h1) * m[1] - h0 * m[2]) / h1;
        m[n - 1] = ((a + b) * m[n - 2] - b * m[n - 3]) / a;

        Ok(Self {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        })
    }

    /// First and last knot.
    pub fn domain(&self) -> (f64, f64) {
        (self.x[0], self.x[self.x.len() - 1])
    }

    /// Evaluate at `t`, extrapolating with the end pieces outside [`Self::domain`].
    pub fn evaluate(&self, t: f64) -> f64 {
        let last_piece = self.x.len() - 2;
        let i = self
            .x
            .partition_point(|&knot| knot <= t)
            .saturating_sub(1)
            .min(last_piece);

        let h = self.x[i + 1] - self.x[i];
        let left = self.x[i + 1] - t;
        let right = t - self.x[i];
        self.m[i] * left.powi(3) / (6.0 * h)
            + self.m[i + 1] * right.powi(3) / (6.0 * h)
            + (self.y[i] / h - self.m[i] * h / 6.0) * left
            + (self.y[i + 1] / h - self.m[i + 1] * h / 6.0) * right
    }
}

/// Thomas algorithm for a tridiagonal system.
fn solve_tridiagonal(lower: &[f64], diag: &[f64], upper: &[f64], rhs: &[f64]) -> AppResult<Vec<f64>> {
    let n = diag.len();
    let mut c = vec![0.0; n];
    let mut d = vec![0.0; n];

    let mut pivot = diag[0];
    for k in 0..n {
        if k > 0 {
            pivot = diag[k] - lower[k] * c[k - 1];
        }
        if pivot.abs() < f64::EPSILON * diag[k].abs().max(1.0) {
            return Err(DaqError::InvalidParameters(
                "spline system is singular".to_string(),
            ));
        }
        c[k] = upper[k] / pivot;
        d[k] = if k == 0 {
            rhs[0] / pivot
        } else {
            (rhs[k] - lower[k] * d[k - 1]) / pivot
        };
    }

    let mut solution = vec![0.0; n];
    solution[n - 1] = d[n - 1];
    for k in (0..n - 1).rev() {
        solution[k] = d[k] - c[k] * solution[k + 1];
    }
    Ok(solution)
}

/// Order polled samples by time, dropping non-finite readings and repeated
/// timestamps. The first reading in acquisition order wins a tie.
pub fn prepare_samples(samples: &[WavelengthSample]) -> Vec<WavelengthSample> {
    let mut ordered: Vec<WavelengthSample> = samples
        .iter()
        .copied()
        .filter(|s| s.timestamp.is_finite() && s.wavelength.is_finite())
        .collect();
    // Stable sort keeps acquisition order among equal timestamps.
    ordered.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    ordered.dedup_by(|later, earlier| later.timestamp == earlier.timestamp);
    ordered
}

/// Wavelength at each of `sample_times`, interpolated from `samples`.
///
/// Fails with [`DaqError::InsufficientSamples`] when fewer than
/// [`MIN_SPLINE_POINTS`] distinct timestamps remain after cleanup. The output
/// has exactly `sample_times.len()` values.
pub fn align(samples: &[WavelengthSample], sample_times: &[f64]) -> AppResult<Vec<f64>> {
    let ordered = prepare_samples(samples);
    if ordered.len() < MIN_SPLINE_POINTS {
        return Err(DaqError::InsufficientSamples {
            required: MIN_SPLINE_POINTS,
            found: ordered.len(),
        });
    }

    let dropped = samples.len() - ordered.len();
    if dropped > 0 {
        tracing::debug!("Dropped {} duplicate or invalid wavelength samples", dropped);
    }

    let x: Vec<f64> = ordered.iter().map(|s| s.timestamp).collect();
    let y: Vec<f64> = ordered.iter().map(|s| s.wavelength).collect();
    let spline = CubicSpline::fit(&x, &y)?;

    let (first, last) = spline.domain();
    let extrapolated = sample_times
        .iter()
        .filter(|&&t| t < first || t > last)
        .count();
    if extrapolated > 0 {
        tracing::debug!(
            "{} of {} sample times lie outside [{:.4}, {:.4}] s and are extrapolated",
            extrapolated,
            sample_times.len(),
            first,
            last
        );
    }

    Ok(sample_times.iter().map(|&t| spline.evaluate(t)).collect())
}
