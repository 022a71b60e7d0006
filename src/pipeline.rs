//! Batch driver tying the components together.
//!
//! [`TopoPipeline`] owns the read-only inputs (elevation grid, its Laplacian,
//! global elevation σ) and runs the two processing modes over an ordered
//! collection of coarse cells. Cells are computed in parallel with rayon;
//! results are always returned, and merged into rasters, in input order.

use ndarray::{s, Array2, ArrayView2};
use rayon::prelude::*;

use crate::config::TopoConfig;
use crate::error::{ConfigError, TopoError, TopoResult};
use crate::formulas::{downscaling_factor_map, sky_view_factor};
use crate::mosaic::{CellAttributes, CellBlock, CellRecord, MosaicBuilder, OutputRasters, OverlapPolicy};
use crate::polygon::CoarseCell;
use crate::raster::Grid;
use crate::slope::{mean_squared_slope, typical_width};
use crate::stencil::laplacian;
use crate::window::{cell_window, ensure_no_nodata};

/// Cells computed per parallel batch in raster mode before merging.
const CELLS_PER_THREAD: usize = 4;

pub struct TopoPipeline {
    config: TopoConfig,
    dem: Grid,
    laplacian: Grid,
    laplacian_valid: Array2<bool>,
    cell_size: f64,
    sigma: f64,
}

impl TopoPipeline {
    /// Validates `config` against `dem` and precomputes the shared grids.
    ///
    /// All configuration problems surface here, before any cell is processed.
    pub fn new(dem: Grid, config: TopoConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let cell_size = config.resolve_cell_size(dem.geo_transform().pixel_size())?;

        let (rows, cols) = dem.shape();
        let sigma = dem.std_dev().ok_or(ConfigError::EmptyDem)?;
        let field = laplacian(dem.view(), cell_size, dem.nodata())
            .map_err(|_| ConfigError::DemTooSmall { rows, cols })?;

        // Frame in the output sentinel, built from the mask rather than from values.
        let mut values = field.values;
        values.zip_mut_with(&field.valid, |v, &defined| {
            if !defined {
                *v = config.nodata;
            }
        });
        let lap = dem.with_data(values, config.nodata);

        Ok(TopoPipeline {
            config,
            dem,
            laplacian: lap,
            laplacian_valid: field.valid,
            cell_size,
            sigma,
        })
    }

    pub fn config(&self) -> &TopoConfig {
        &self.config
    }

    pub fn dem(&self) -> &Grid {
        &self.dem
    }

    /// Elevation Laplacian ∇²z with a no-data frame.
    pub fn laplacian(&self) -> &Grid {
        &self.laplacian
    }

    /// Pixels where the Laplacian is defined.
    pub fn laplacian_valid(&self) -> ArrayView2<'_, bool> {
        self.laplacian_valid.view()
    }

    /// Δx actually used.
    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Standard deviation of elevation over the whole DEM.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// μ, ξ and F_sky of an elevation window.
    pub fn window_attributes(&self, window: ArrayView2<f64>) -> TopoResult<CellAttributes> {
        ensure_no_nodata(window, self.dem.nodata())?;
        let mu = mean_squared_slope(window, self.cell_size)?;
        let xi = typical_width(mu, self.sigma)?;
        let sky_view_factor = sky_view_factor(
            mu,
            xi,
            self.config.coarse_resolution,
            &self.config.sky_view,
        )?;
        Ok(CellAttributes {
            mu,
            xi,
            sky_view_factor,
        })
    }

    /// Attribute mode for a single cell (small window).
    pub fn cell_attributes(&self, cell: &CoarseCell) -> TopoResult<CellAttributes> {
        let bounds = cell_window(
            cell,
            self.dem.geo_transform(),
            self.config.attribute_half_size,
            self.dem.shape(),
        )?;
        self.window_attributes(bounds.extract(self.dem.view()))
    }

    /// Raster mode for a single cell (large window).
    pub fn cell_block(&self, cell: &CoarseCell) -> TopoResult<CellBlock> {
        let bounds = cell_window(
            cell,
            self.dem.geo_transform(),
            self.config.raster_half_size,
            self.dem.shape(),
        )?;
        let attributes = self.window_attributes(bounds.extract(self.dem.view()))?;
        let valid = self
            .laplacian_valid
            .slice(s![bounds.row_start..bounds.row_end(), bounds.col_start..bounds.col_end()]);
        let downscaling = downscaling_factor_map(
            bounds.extract(self.laplacian.view()),
            valid,
            attributes.mu,
            self.config.nodata,
            &self.config.downscaling,
        )?;
        Ok(CellBlock {
            bounds,
            attributes,
            downscaling,
            valid: valid.to_owned(),
        })
    }

    /// Attribute table, one record per cell in input order.
    pub fn attribute_table(&self, cells: &[CoarseCell]) -> Vec<CellRecord> {
        self.attribute_table_with_progress(cells, || {})
    }

    /// As [`attribute_table`](Self::attribute_table), calling `progress` once per finished cell.
    pub fn attribute_table_with_progress<F>(&self, cells: &[CoarseCell], progress: F) -> Vec<CellRecord>
    where
        F: Fn() + Sync,
    {
        cells
            .par_iter()
            .map(|cell| {
                let record = record_for(cell, self.cell_attributes(cell));
                progress();
                record
            })
            .collect()
    }

    /// Full-resolution F_sky and X_dsc_topo rasters.
    ///
    /// Returns the rasters and one record per cell (attributes over the large
    /// window) in input order.
    pub fn raster_mosaic(&self, cells: &[CoarseCell], policy: OverlapPolicy) -> (OutputRasters, Vec<CellRecord>) {
        self.raster_mosaic_with_progress(cells, policy, || {})
    }

    /// As [`raster_mosaic`](Self::raster_mosaic), calling `progress` once per finished cell.
    pub fn raster_mosaic_with_progress<F>(
        &self,
        cells: &[CoarseCell],
        policy: OverlapPolicy,
        progress: F,
    ) -> (OutputRasters, Vec<CellRecord>)
    where
        F: Fn() + Sync,
    {
        let mut rasters = OutputRasters::new(&self.dem, self.config.nodata);
        let builder = MosaicBuilder::new(policy);
        let mut records = Vec::with_capacity(cells.len());

        // Blocks are computed chunk by chunk to bound memory, and merged
        // serially in input order so the result does not depend on threads.
        let chunk_size = (rayon::current_num_threads() * CELLS_PER_THREAD).max(1);
        for chunk in cells.chunks(chunk_size) {
            let blocks: Vec<TopoResult<CellBlock>> = chunk
                .par_iter()
                .map(|cell| {
                    let block = self.cell_block(cell);
                    progress();
                    block
                })
                .collect();

            builder.write_all(&mut rasters, &blocks);
            records.extend(
                chunk
                    .iter()
                    .zip(&blocks)
                    .map(|(cell, block)| record_for(cell, block.as_ref().map(|b| b.attributes).map_err(Clone::clone))),
            );
        }

        (rasters, records)
    }
}

fn record_for(cell: &CoarseCell, outcome: Result<CellAttributes, TopoError>) -> CellRecord {
    CellRecord {
        station_id: cell.station_id.clone(),
        centroid: cell.polygon.centroid(),
        outcome,
    }
}
