//! Error kinds raised while computing topographic parameters.
//!
//! [`TopoError`] covers everything that can go wrong for a single coarse cell;
//! the pipeline converts it into a skipped cell and moves on. [`ConfigError`]
//! is fatal and is reported before any cell is touched.

use thiserror::Error;

/// Failure of a single computation (one window, one coarse cell).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopoError {
    /// The window centred on `(row, col)` does not fit inside the elevation grid.
    #[error("window of half-size {half_size} centred on ({row}, {col}) exceeds the grid bounds")]
    WindowOutOfBounds {
        row: isize,
        col: isize,
        half_size: usize,
    },

    /// Mean squared slope is zero (flat window); the typical width is undefined.
    #[error("mean squared slope is zero, typical feature width is undefined")]
    DegenerateSlope,

    /// Array smaller than the 3x3 stencil.
    #[error("array of {rows}x{cols} is smaller than the 3x3 stencil")]
    WindowTooSmall { rows: usize, cols: usize },

    /// A formula input outside its domain.
    #[error("{name} = {value} is outside the domain of the formula")]
    InvalidDomain { name: &'static str, value: f64 },

    /// The window contains elevation no-data pixels.
    #[error("window contains {count} no-data pixels")]
    NodataInWindow { count: usize },
}

impl TopoError {
    /// Short, stable tag used in reports and attribute tables.
    pub fn kind(&self) -> &'static str {
        match self {
            TopoError::WindowOutOfBounds { .. } => "window_out_of_bounds",
            TopoError::DegenerateSlope => "degenerate_slope",
            TopoError::WindowTooSmall { .. } => "window_too_small",
            TopoError::InvalidDomain { .. } => "invalid_domain",
            TopoError::NodataInWindow { .. } => "nodata_in_window",
        }
    }
}

/// Invalid pipeline configuration. Always fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} half-size {half_size} gives a window smaller than the 3x3 stencil")]
    WindowTooSmall { name: &'static str, half_size: usize },

    #[error("{name} must be finite and positive, got {value}")]
    InvalidConstant { name: &'static str, value: f64 },

    #[error("no-data sentinel must be finite, got {0}")]
    InvalidNodata(f64),

    #[error("cell size could not be derived from a geographic DEM; set it explicitly")]
    UnprojectedDem,

    #[error("DEM of {rows}x{cols} is smaller than the 3x3 stencil")]
    DemTooSmall { rows: usize, cols: usize },

    #[error("DEM contains no valid elevation")]
    EmptyDem,
}

pub type TopoResult<T> = std::result::Result<T, TopoError>;
