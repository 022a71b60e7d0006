//! Immutable pipeline configuration.
//!
//! All constants (grid resolutions, window half-sizes, empirical coefficients)
//! live in [`TopoConfig`] and are passed explicitly to every component. A JSON
//! file may override any subset of the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Coefficients of the Sky View Factor parameterization (Helbig & Löwe, 2014).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkyViewCoefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl Default for SkyViewCoefficients {
    fn default() -> Self {
        SkyViewCoefficients {
            a: 3.354688,
            b: 1.998767,
            c: 0.20286,
            d: 5.951,
        }
    }
}

/// Coefficients of the topographic wind downscaling parameterization (Helbig et al., 2017).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownscalingCoefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
}

impl Default for DownscalingCoefficients {
    fn default() -> Self {
        DownscalingCoefficients {
            a: 17.0393,
            b: 0.737,
            c: 1.0234,
            d: 0.3794,
            e: 1.9821,
        }
    }
}

/// Configuration of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopoConfig {
    /// DEM cell size Δx in metres. `None` derives it from the DEM geotransform.
    pub cell_size: Option<f64>,
    /// Coarse (NWP) grid resolution L in metres.
    pub coarse_resolution: f64,
    /// Half-size of the window used for the per-cell attribute table.
    pub attribute_half_size: usize,
    /// Half-size of the window used for the full-resolution rasters.
    pub raster_half_size: usize,
    pub sky_view: SkyViewCoefficients,
    pub downscaling: DownscalingCoefficients,
    /// Sentinel written to output pixels that hold no value.
    pub nodata: f64,
}

impl Default for TopoConfig {
    fn default() -> Self {
        TopoConfig {
            cell_size: None,
            coarse_resolution: 2500.0,
            attribute_half_size: 12,
            raster_half_size: 62,
            sky_view: SkyViewCoefficients::default(),
            downscaling: DownscalingCoefficients::default(),
            nodata: -9999.0,
        }
    }
}

impl TopoConfig {
    /// Loads a configuration from a JSON file. Missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: TopoConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Side length of the attribute-mode window.
    pub fn attribute_window(&self) -> usize {
        2 * self.attribute_half_size + 1
    }

    /// Side length of the raster-mode window.
    pub fn raster_window(&self) -> usize {
        2 * self.raster_half_size + 1
    }

    /// Checks every constant before any cell is processed.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        for (name, half_size) in [
            ("attribute_half_size", self.attribute_half_size),
            ("raster_half_size", self.raster_half_size),
        ] {
            // A half-size of 1 already gives a full 3x3 neighbourhood.
            if half_size < 1 {
                return Err(ConfigError::WindowTooSmall { name, half_size });
            }
        }

        if let Some(dx) = self.cell_size {
            check_positive("cell_size", dx)?;
        }
        check_positive("coarse_resolution", self.coarse_resolution)?;

        if !self.nodata.is_finite() {
            return Err(ConfigError::InvalidNodata(self.nodata));
        }

        let sv = &self.sky_view;
        let ds = &self.downscaling;
        for (name, value) in [
            ("sky_view.a", sv.a),
            ("sky_view.b", sv.b),
            ("sky_view.c", sv.c),
            ("sky_view.d", sv.d),
            ("downscaling.a", ds.a),
            ("downscaling.b", ds.b),
            ("downscaling.c", ds.c),
            ("downscaling.d", ds.d),
            ("downscaling.e", ds.e),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::InvalidConstant { name, value });
            }
        }

        Ok(())
    }

    /// Returns Δx, falling back to the DEM pixel size when not configured.
    pub fn resolve_cell_size(&self, dem_pixel_size: f64) -> std::result::Result<f64, ConfigError> {
        let dx = self.cell_size.unwrap_or(dem_pixel_size);
        check_positive("cell_size", dx)?;
        Ok(dx)
    }
}

fn check_positive(name: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidConstant { name, value })
    }
}
