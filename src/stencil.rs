//! Fixed 3x3 finite-difference stencils and a small linear convolution.
//!
//! Convolution follows the usual signal-processing convention: the kernel is
//! flipped, and in `Same` mode samples outside the input are taken as zero.
//! Callers must discard the edge rows/columns a padded result depends on.

use ndarray::{Array2, ArrayView2};

use crate::error::{TopoError, TopoResult};

pub type Kernel = [[f64; 3]; 3];

/// Backward difference along axis 0: `z[i, j] - z[i - 1, j]`.
pub const ROW_DIFFERENCE: Kernel = [
    [0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, -1.0, 0.0],
];

/// Backward difference along axis 1: `z[i, j] - z[i, j - 1]`.
pub const COLUMN_DIFFERENCE: Kernel = [
    [0.0, 0.0, 0.0],
    [0.0, 1.0, -1.0],
    [0.0, 0.0, 0.0],
];

/// Five-point discrete Laplacian.
pub const LAPLACIAN: Kernel = [
    [0.0, 1.0, 0.0],
    [1.0, -4.0, 1.0],
    [0.0, 1.0, 0.0],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvolveMode {
    /// Only positions whose full 3x3 neighbourhood lies inside the input.
    /// Output is two rows and two columns smaller.
    Valid,
    /// Output has the input shape; out-of-range samples are zero.
    Same,
}

/// Convolves `input` with a 3x3 `kernel`.
pub fn convolve(
    input: ArrayView2<f64>,
    kernel: &Kernel,
    mode: ConvolveMode,
) -> TopoResult<Array2<f64>> {
    let (rows, cols) = input.dim();
    if rows < 3 || cols < 3 {
        return Err(TopoError::WindowTooSmall { rows, cols });
    }

    let output = match mode {
        ConvolveMode::Valid => Array2::from_shape_fn((rows - 2, cols - 2), |(i, j)| {
            let mut acc = 0.0;
            for (m, kernel_row) in kernel.iter().enumerate() {
                for (n, &k) in kernel_row.iter().enumerate() {
                    if k != 0.0 {
                        acc += k * input[[i + 2 - m, j + 2 - n]];
                    }
                }
            }
            acc
        }),
        ConvolveMode::Same => Array2::from_shape_fn((rows, cols), |(i, j)| {
            let mut acc = 0.0;
            for (m, kernel_row) in kernel.iter().enumerate() {
                for (n, &k) in kernel_row.iter().enumerate() {
                    if k == 0.0 {
                        continue;
                    }
                    let r = i as isize + 1 - m as isize;
                    let c = j as isize + 1 - n as isize;
                    if r >= 0 && c >= 0 && (r as usize) < rows && (c as usize) < cols {
                        acc += k * input[[r as usize, c as usize]];
                    }
                }
            }
            acc
        }),
    };

    Ok(output)
}

/// Elevation Laplacian together with the pixels where it is defined.
#[derive(Debug, Clone, PartialEq)]
pub struct LaplacianField {
    /// ∇²z, holding `nodata` wherever `valid` is false.
    pub values: Array2<f64>,
    /// False on the one-pixel frame and where the stencil touches no-data input.
    pub valid: Array2<bool>,
}

/// Computes the elevation Laplacian ∇²z of a whole grid.
///
/// The valid 5-point convolution is divided by Δx² and then scaled by Δx/4,
/// which gives the normalization used by the downscaling parameterization.
/// Definedness is given by `valid` only; a computed value may equal `nodata`
/// (flat terrain gives exactly 0).
pub fn laplacian(elevation: ArrayView2<f64>, dx: f64, nodata: f64) -> TopoResult<LaplacianField> {
    let (rows, cols) = elevation.dim();
    let interior = convolve(elevation, &LAPLACIAN, ConvolveMode::Valid)?;

    let mut values = Array2::from_elem((rows, cols), nodata);
    let mut valid = Array2::from_elem((rows, cols), false);
    let scale = (1.0 / (dx * dx)) * (dx / 4.0);

    for i in 1..rows - 1 {
        for j in 1..cols - 1 {
            let touches_nodata = LAPLACIAN.iter().enumerate().any(|(m, kernel_row)| {
                kernel_row
                    .iter()
                    .enumerate()
                    .any(|(n, &k)| {
                        let z = elevation[[i + m - 1, j + n - 1]];
                        k != 0.0 && (z == nodata || z.is_nan())
                    })
            });
            if !touches_nodata {
                values[[i, j]] = interior[[i - 1, j - 1]] * scale;
                valid[[i, j]] = true;
            }
        }
    }

    Ok(LaplacianField { values, valid })
}
