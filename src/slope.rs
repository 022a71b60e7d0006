//! Window statistics: mean squared slope μ and typical feature width ξ.

use ndarray::{s, Array2, ArrayView2};
use std::f64::consts::SQRT_2;

use crate::error::{TopoError, TopoResult};
use crate::stencil::{convolve, ConvolveMode, COLUMN_DIFFERENCE, ROW_DIFFERENCE};

/// Row and column differences of `window`, cropped to a common interior.
///
/// The row difference loses its first row (zero pad) and the column difference
/// its first column. Dropping the last column / last row respectively makes
/// both arrays `(rows - 1, cols - 1)` with element `[i, j]` anchored at
/// `window[i, j]`.
///
/// After the crop the backward kernels give exactly the forward differences
/// `z[i + 1, j] - z[i, j]` and `z[i, j + 1] - z[i, j]` over the same index
/// range, so μ is unchanged by the kernel orientation. No element of the
/// result depends on the zero pad.
pub fn aligned_differences(window: ArrayView2<f64>) -> TopoResult<(Array2<f64>, Array2<f64>)> {
    let (rows, cols) = window.dim();
    let row_diff = convolve(window, &ROW_DIFFERENCE, ConvolveMode::Same)?;
    let col_diff = convolve(window, &COLUMN_DIFFERENCE, ConvolveMode::Same)?;

    let row_diff = row_diff.slice(s![1..rows, 0..cols - 1]).to_owned();
    let col_diff = col_diff.slice(s![0..rows - 1, 1..cols]).to_owned();
    Ok((row_diff, col_diff))
}

/// Mean squared slope μ of an elevation window with cell size `dx`.
///
/// `μ = sqrt(mean(Δ₀² + Δ₁²)) / (Δx·√2)`. Returns exactly `0.0` for a
/// constant window.
pub fn mean_squared_slope(window: ArrayView2<f64>, dx: f64) -> TopoResult<f64> {
    if !(dx.is_finite() && dx > 0.0) {
        return Err(TopoError::InvalidDomain {
            name: "cell_size",
            value: dx,
        });
    }

    let (row_diff, col_diff) = aligned_differences(window)?;
    let n = row_diff.len() as f64;
    let sum_sq: f64 = row_diff
        .iter()
        .zip(col_diff.iter())
        .map(|(a, b)| a * a + b * b)
        .sum();

    let mu = (sum_sq / n).sqrt() / (dx * SQRT_2);
    if mu.is_finite() {
        Ok(mu)
    } else {
        Err(TopoError::InvalidDomain {
            name: "mu",
            value: mu,
        })
    }
}

/// Typical width of topographic features, `ξ = σ·√2 / μ`.
///
/// `sigma` is the elevation standard deviation of the reference region (the
/// whole DEM), not of the local window.
pub fn typical_width(mu: f64, sigma: f64) -> TopoResult<f64> {
    if mu.is_nan() || mu < 0.0 {
        return Err(TopoError::InvalidDomain {
            name: "mu",
            value: mu,
        });
    }
    if !(sigma.is_finite() && sigma >= 0.0) {
        return Err(TopoError::InvalidDomain {
            name: "sigma",
            value: sigma,
        });
    }
    if mu == 0.0 {
        return Err(TopoError::DegenerateSlope);
    }
    Ok(sigma * SQRT_2 / mu)
}
