//! Mapping of coarse cells onto the DEM grid and square window extraction.

use ndarray::{s, ArrayView2};

use crate::error::{TopoError, TopoResult};
use crate::polygon::CoarseCell;
use crate::raster::GeoTransform;

/// A square window of side `2·half_size + 1` fully inside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub row_start: usize,
    pub col_start: usize,
    pub size: usize,
}

impl WindowBounds {
    /// Window centred on `(row, col)`.
    ///
    /// Fails with `WindowOutOfBounds` when any part of the window would fall
    /// outside a grid of `shape` (rows, cols); windows are never truncated.
    pub fn centred(
        row: isize,
        col: isize,
        half_size: usize,
        shape: (usize, usize),
    ) -> TopoResult<Self> {
        let out_of_bounds = TopoError::WindowOutOfBounds {
            row,
            col,
            half_size,
        };
        let half = half_size as isize;
        let (rows, cols) = (shape.0 as isize, shape.1 as isize);
        if row - half < 0 || col - half < 0 || row + half >= rows || col + half >= cols {
            return Err(out_of_bounds);
        }
        Ok(WindowBounds {
            row_start: (row - half) as usize,
            col_start: (col - half) as usize,
            size: 2 * half_size + 1,
        })
    }

    pub fn row_end(&self) -> usize {
        self.row_start + self.size
    }

    pub fn col_end(&self) -> usize {
        self.col_start + self.size
    }

    /// Borrow the window out of a full-size array.
    pub fn extract<'a>(&self, grid: ArrayView2<'a, f64>) -> ArrayView2<'a, f64> {
        grid.slice_move(s![
            self.row_start..self.row_end(),
            self.col_start..self.col_end()
        ])
    }

    /// Whether two windows share at least one pixel.
    pub fn overlaps(&self, other: &WindowBounds) -> bool {
        self.row_start < other.row_end()
            && other.row_start < self.row_end()
            && self.col_start < other.col_end()
            && other.col_start < self.col_end()
    }
}

/// Grid index of the pixel containing the centroid of `cell`.
pub fn centroid_index(cell: &CoarseCell, geo_transform: &GeoTransform) -> TopoResult<(isize, isize)> {
    let (x, y) = cell.polygon.centroid().ok_or(TopoError::InvalidDomain {
        name: "centroid",
        value: f64::NAN,
    })?;
    geo_transform.index_of(x, y).ok_or(TopoError::InvalidDomain {
        name: "geo_transform",
        value: geo_transform.pixel_size(),
    })
}

/// Locates the window of `half_size` around the centroid of `cell`.
pub fn cell_window(
    cell: &CoarseCell,
    geo_transform: &GeoTransform,
    half_size: usize,
    shape: (usize, usize),
) -> TopoResult<WindowBounds> {
    let (row, col) = centroid_index(cell, geo_transform)?;
    WindowBounds::centred(row, col, half_size, shape)
}

/// Rejects windows containing elevation no-data.
pub fn ensure_no_nodata(window: ArrayView2<f64>, nodata: f64) -> TopoResult<()> {
    let count = window
        .iter()
        .filter(|&&v| v == nodata || v.is_nan())
        .count();
    if count > 0 {
        return Err(TopoError::NodataInWindow { count });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polygon::Polygon;
    use ndarray::Array2;

    #[test]
    fn centred_window_inside_grid() {
        let bounds = WindowBounds::centred(25, 25, 12, (50, 50)).unwrap();
        assert_eq!(bounds.row_start, 13);
        assert_eq!(bounds.col_start, 13);
        assert_eq!(bounds.size, 25);
        assert_eq!(bounds.row_end(), 38);
    }

    #[test]
    fn window_touching_edges_is_accepted() {
        assert!(WindowBounds::centred(12, 12, 12, (25, 25)).is_ok());
    }

    #[test]
    fn window_past_any_edge_is_rejected() {
        for (row, col) in [(11, 25), (25, 11), (38, 25), (25, 38), (-3, 25)] {
            assert_eq!(
                WindowBounds::centred(row, col, 12, (50, 50)),
                Err(TopoError::WindowOutOfBounds {
                    row,
                    col,
                    half_size: 12
                })
            );
        }
    }

    #[test]
    fn extract_returns_centred_block() {
        let grid = Array2::from_shape_fn((10, 10), |(i, j)| (i * 10 + j) as f64);
        let bounds = WindowBounds::centred(4, 6, 1, (10, 10)).unwrap();
        let window = bounds.extract(grid.view());
        assert_eq!(window.dim(), (3, 3));
        assert_eq!(window[[1, 1]], 46.0);
        assert_eq!(window[[0, 0]], 35.0);
    }

    #[test]
    fn cell_maps_to_containing_pixel() {
        let gt = GeoTransform::north_up(0.0, 1000.0, 20.0);
        // Centroid (510, 490) lies in row 25, col 25.
        let cell = CoarseCell::new("st1", Polygon::square(510.0, 490.0, 100.0));
        assert_eq!(centroid_index(&cell, &gt), Ok((25, 25)));
        let bounds = cell_window(&cell, &gt, 12, (50, 50)).unwrap();
        assert_eq!((bounds.row_start, bounds.col_start), (13, 13));
    }

    #[test]
    fn overlap_detection() {
        let a = WindowBounds::centred(10, 10, 2, (30, 30)).unwrap();
        let b = WindowBounds::centred(14, 10, 2, (30, 30)).unwrap();
        let c = WindowBounds::centred(15, 10, 2, (30, 30)).unwrap();
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn nodata_in_window_is_counted() {
        let mut grid = Array2::<f64>::zeros((5, 5));
        grid[[1, 1]] = -9999.0;
        grid[[3, 2]] = f64::NAN;
        assert_eq!(
            ensure_no_nodata(grid.view(), -9999.0),
            Err(TopoError::NodataInWindow { count: 2 })
        );
    }
}
