//! Per-cell results and their assembly into full-resolution output rasters.
//!
//! Blocks are always merged in the order of the coarse cell collection. With
//! [`OverlapPolicy::LastWriteWins`] a pixel covered by several windows keeps
//! the value of the cell that comes last in that order; with
//! [`OverlapPolicy::FirstWriteWins`] it keeps the first one.
//!
//! The Sky View Factor of a cell covers its whole window. The downscaling
//! factor is written only where the block's Laplacian is defined, so the
//! two rasters keep separate coverage masks. A failed cell writes nothing.

use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

use crate::error::TopoError;
use crate::raster::Grid;
use crate::window::WindowBounds;

/// Window statistics and Sky View Factor of one coarse cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CellAttributes {
    pub mu: f64,
    pub xi: f64,
    pub sky_view_factor: f64,
}

/// Outcome of processing one coarse cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellRecord {
    pub station_id: String,
    pub centroid: Option<(f64, f64)>,
    pub outcome: Result<CellAttributes, TopoError>,
}

impl CellRecord {
    pub fn is_computed(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Full-resolution contribution of one coarse cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellBlock {
    pub bounds: WindowBounds,
    pub attributes: CellAttributes,
    /// Downscaling factor per pixel of the window, `nodata` where undefined.
    pub downscaling: Array2<f64>,
    /// Elements of `downscaling` that hold a computed value.
    pub valid: Array2<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    #[default]
    LastWriteWins,
    FirstWriteWins,
}

/// The two output rasters, initialised to no-data and filled block by block.
#[derive(Debug, Clone)]
pub struct OutputRasters {
    pub sky_view: Grid,
    pub downscaling: Grid,
    covered: Array2<bool>,
    downscaling_written: Array2<bool>,
}

impl OutputRasters {
    /// Empty rasters with the geometry of `template` (the DEM).
    pub fn new(template: &Grid, nodata: f64) -> Self {
        OutputRasters {
            sky_view: template.filled_like(nodata, nodata),
            downscaling: template.filled_like(nodata, nodata),
            covered: Array2::from_elem(template.shape(), false),
            downscaling_written: Array2::from_elem(template.shape(), false),
        }
    }

    /// Whether pixel `(row, col)` lies in the window of a computed cell.
    pub fn is_covered(&self, row: usize, col: usize) -> bool {
        self.covered.get([row, col]).copied().unwrap_or(false)
    }

    /// Whether pixel `(row, col)` holds a downscaling factor.
    pub fn has_downscaling(&self, row: usize, col: usize) -> bool {
        self.downscaling_written.get([row, col]).copied().unwrap_or(false)
    }

    /// Number of pixels holding a Sky View Factor.
    pub fn covered_count(&self) -> usize {
        self.covered.iter().filter(|&&w| w).count()
    }

    /// Number of pixels holding a downscaling factor.
    pub fn downscaling_count(&self) -> usize {
        self.downscaling_written.iter().filter(|&&w| w).count()
    }
}

/// Writes cell blocks into [`OutputRasters`] under an explicit overlap policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct MosaicBuilder {
    pub policy: OverlapPolicy,
}

impl MosaicBuilder {
    pub fn new(policy: OverlapPolicy) -> Self {
        MosaicBuilder { policy }
    }

    /// Writes one block. Returns the number of Sky View Factor pixels written.
    pub fn write_block(&self, rasters: &mut OutputRasters, block: &CellBlock) -> usize {
        let bounds = block.bounds;
        let region = s![bounds.row_start..bounds.row_end(), bounds.col_start..bounds.col_end()];
        let sky_view = block.attributes.sky_view_factor;
        let keep_first = self.policy == OverlapPolicy::FirstWriteWins;

        let OutputRasters {
            sky_view: sky_grid,
            downscaling: dsc_grid,
            covered,
            downscaling_written,
        } = rasters;

        let mut covered_region = covered.slice_mut(region);
        let mut dsc_written_region = downscaling_written.slice_mut(region);
        let mut sky_region = sky_grid.data_mut().slice_mut(region);
        let mut dsc_region = dsc_grid.data_mut().slice_mut(region);

        let mut count = 0;
        for ((row, col), &value) in block.downscaling.indexed_iter() {
            if !(keep_first && covered_region[[row, col]]) {
                sky_region[[row, col]] = sky_view;
                covered_region[[row, col]] = true;
                count += 1;
            }
            if block.valid[[row, col]] && !(keep_first && dsc_written_region[[row, col]]) {
                dsc_region[[row, col]] = value;
                dsc_written_region[[row, col]] = true;
            }
        }
        count
    }

    /// Writes successful blocks in iteration order; failed cells are skipped.
    pub fn write_all<'a, I>(&self, rasters: &mut OutputRasters, blocks: I) -> usize
    where
        I: IntoIterator<Item = &'a Result<CellBlock, TopoError>>,
    {
        blocks
            .into_iter()
            .filter_map(|block| block.as_ref().ok())
            .map(|block| self.write_block(rasters, block))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;

    fn template(rows: usize, cols: usize) -> Grid {
        Grid::new(
            Array2::zeros((rows, cols)),
            GeoTransform::north_up(0.0, 0.0, 20.0),
            None,
            -9999.0,
        )
    }

    fn block(row: isize, col: isize, half: usize, svf: f64, dsc: f64) -> CellBlock {
        let bounds = WindowBounds::centred(row, col, half, (20, 20)).unwrap();
        CellBlock {
            bounds,
            attributes: CellAttributes {
                mu: 0.1,
                xi: 100.0,
                sky_view_factor: svf,
            },
            downscaling: Array2::from_elem((bounds.size, bounds.size), dsc),
            valid: Array2::from_elem((bounds.size, bounds.size), true),
        }
    }

    #[test]
    fn new_rasters_are_nodata() {
        let rasters = OutputRasters::new(&template(4, 5), -9999.0);
        assert_eq!(rasters.sky_view.nodata_count(), 20);
        assert_eq!(rasters.downscaling.nodata_count(), 20);
        assert_eq!(rasters.covered_count(), 0);
        assert_eq!(rasters.downscaling_count(), 0);
    }

    #[test]
    fn last_write_wins_in_overlap() {
        let mut rasters = OutputRasters::new(&template(20, 20), -9999.0);
        let builder = MosaicBuilder::new(OverlapPolicy::LastWriteWins);
        builder.write_block(&mut rasters, &block(5, 5, 2, 0.9, 1.1));
        builder.write_block(&mut rasters, &block(7, 7, 2, 0.8, 1.2));
        // (4, 4) is only covered by the first block, (6, 6) by both.
        assert_eq!(rasters.sky_view.get(4, 4), Some(0.9));
        assert_eq!(rasters.sky_view.get(6, 6), Some(0.8));
        assert_eq!(rasters.downscaling.get(6, 6), Some(1.2));
        assert_eq!(rasters.downscaling.get(0, 0), Some(-9999.0));
    }

    #[test]
    fn first_write_wins_in_overlap() {
        let mut rasters = OutputRasters::new(&template(20, 20), -9999.0);
        let builder = MosaicBuilder::new(OverlapPolicy::FirstWriteWins);
        builder.write_block(&mut rasters, &block(5, 5, 2, 0.9, 1.1));
        let written = builder.write_block(&mut rasters, &block(7, 7, 2, 0.8, 1.2));
        assert_eq!(rasters.sky_view.get(6, 6), Some(0.9));
        assert_eq!(rasters.sky_view.get(9, 9), Some(0.8));
        assert_eq!(written, 25 - 9);
    }

    #[test]
    fn undefined_elements_do_not_overwrite() {
        let mut rasters = OutputRasters::new(&template(20, 20), -9999.0);
        let builder = MosaicBuilder::default();
        builder.write_block(&mut rasters, &block(5, 5, 2, 0.9, 1.1));
        let mut holes = block(5, 5, 2, 0.5, 1.5);
        holes.downscaling[[2, 2]] = -9999.0;
        holes.valid[[2, 2]] = false;
        builder.write_block(&mut rasters, &holes);
        assert_eq!(rasters.downscaling.get(5, 5), Some(1.1));
        assert_eq!(rasters.downscaling.get(4, 4), Some(1.5));
        // The Sky View Factor covers the hole too.
        assert_eq!(rasters.sky_view.get(5, 5), Some(0.5));
    }

    #[test]
    fn sky_view_covers_undefined_frame() {
        let mut rasters = OutputRasters::new(&template(20, 20), -9999.0);
        let mut framed = block(2, 2, 2, 0.7, 1.3);
        for k in 0..5 {
            framed.valid[[0, k]] = false;
            framed.valid[[4, k]] = false;
            framed.valid[[k, 0]] = false;
            framed.valid[[k, 4]] = false;
        }
        let written = MosaicBuilder::default().write_block(&mut rasters, &framed);
        assert_eq!(written, 25);
        assert_eq!(rasters.covered_count(), 25);
        assert_eq!(rasters.downscaling_count(), 9);
        assert_eq!(rasters.sky_view.get(0, 0), Some(0.7));
        assert!(!rasters.has_downscaling(0, 0));
        assert_eq!(rasters.downscaling.get(0, 0), Some(-9999.0));
    }

    #[test]
    fn computed_value_equal_to_sentinel_is_written() {
        let mut rasters = OutputRasters::new(&template(20, 20), 0.0);
        MosaicBuilder::default().write_block(&mut rasters, &block(5, 5, 1, 0.0, 0.0));
        assert_eq!(rasters.downscaling_count(), 9);
        assert!(rasters.has_downscaling(5, 5));
        assert!(rasters.is_covered(4, 6));
    }

    #[test]
    fn failed_cells_leave_rasters_untouched() {
        let mut rasters = OutputRasters::new(&template(20, 20), -9999.0);
        let builder = MosaicBuilder::default();
        let blocks = vec![
            Ok(block(5, 5, 2, 0.9, 1.1)),
            Err(TopoError::DegenerateSlope),
        ];
        let written = builder.write_all(&mut rasters, &blocks);
        assert_eq!(written, 25);
        assert_eq!(rasters.covered_count(), 25);
        assert_eq!(rasters.downscaling_count(), 25);
    }
}
