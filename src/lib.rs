//! # Topographic Factors Library
//!
//! Core data structures and processing functions for deriving subgrid
//! topographic parameters from a high-resolution elevation raster and a set
//! of coarse (NWP) grid cells.
//!
//! The main components are:
//! - `TopoConfig`: every constant of the pipeline, overridable from JSON.
//! - `TopoPipeline`: computes per-cell attributes (μ, ξ, Sky View Factor) and
//!   the full-resolution Sky View Factor / wind downscaling rasters.
//! - `stencil`, `slope`, `formulas`: the numerical building blocks.
//! - `io`: GDAL-backed reading of the DEM and coarse grid and writing of the
//!   outputs.

pub mod config;
pub mod error;
pub mod formulas;
pub mod io;
pub mod mosaic;
pub mod pipeline;
pub mod polygon;
pub mod raster;
pub mod slope;
pub mod stencil;
pub mod text;
pub mod window;

pub use config::{DownscalingCoefficients, SkyViewCoefficients, TopoConfig};
pub use error::{ConfigError, TopoError, TopoResult};
pub use mosaic::{CellAttributes, CellRecord, OutputRasters, OverlapPolicy};
pub use pipeline::TopoPipeline;
pub use polygon::{CoarseCell, Polygon};
pub use raster::{GeoTransform, Grid};
