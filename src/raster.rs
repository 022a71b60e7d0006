use ndarray::{Array2, ArrayView2};

/// GDAL-style affine geotransform:
/// `x = gt[0] + col·gt[1] + row·gt[2]`, `y = gt[3] + col·gt[4] + row·gt[5]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    // North-up transform with square pixels
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_size: f64) -> Self {
        GeoTransform([origin_x, pixel_size, 0.0, origin_y, 0.0, -pixel_size])
    }

    // World coordinates of the pixel corner at fractional (row, col)
    pub fn pixel_to_world(&self, row: f64, col: f64) -> (f64, f64) {
        let gt = &self.0;
        (
            gt[0] + col * gt[1] + row * gt[2],
            gt[3] + col * gt[4] + row * gt[5],
        )
    }

    // Fractional (row, col) of world coordinates, None for a singular transform
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let gt = &self.0;
        let det = gt[1] * gt[5] - gt[2] * gt[4];
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let dx = x - gt[0];
        let dy = y - gt[3];
        let col = (gt[5] * dx - gt[2] * dy) / det;
        let row = (gt[1] * dy - gt[4] * dx) / det;
        Some((row, col))
    }

    /// Index of the pixel containing `(x, y)`, which is also the pixel whose
    /// centre is nearest. May lie outside the grid (negative or too large).
    pub fn index_of(&self, x: f64, y: f64) -> Option<(isize, isize)> {
        let (row, col) = self.world_to_pixel(x, y)?;
        if !row.is_finite() || !col.is_finite() {
            return None;
        }
        Some((row.floor() as isize, col.floor() as isize))
    }

    // Mean absolute pixel size
    pub fn pixel_size(&self) -> f64 {
        (self.0[1].abs() + self.0[5].abs()) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterParams {
    pub width: usize,
    pub height: usize,
    pub geo_transform: GeoTransform,
    pub nodata: f64,
}

impl RasterParams {
    // Method to check if a value is a NoData value
    pub fn is_nodata(&self, value: f64) -> bool {
        value == self.nodata || value.is_nan()
    }
}

/// Single-band raster held in memory, row-major (`[row, col]`).
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    params: RasterParams,
    wkt: Option<String>,
    data: Array2<f64>,
}

impl Grid {
    // Wrap an existing array; the array shape defines width and height
    pub fn new(data: Array2<f64>, geo_transform: GeoTransform, wkt: Option<String>, nodata: f64) -> Self {
        let (height, width) = data.dim();
        let params = RasterParams { width, height, geo_transform, nodata };
        Grid { params, wkt, data }
    }

    // Same shape, transform and CRS as `self`, filled with `value`, using sentinel `nodata`
    pub fn filled_like(&self, value: f64, nodata: f64) -> Self {
        let params = RasterParams { nodata, ..self.params };
        Grid {
            params,
            wkt: self.wkt.clone(),
            data: Array2::from_elem((params.height, params.width), value),
        }
    }

    // A grid of the same geometry, with different contents and sentinel
    pub fn with_data(&self, data: Array2<f64>, nodata: f64) -> Self {
        Grid::new(data, self.params.geo_transform, self.wkt.clone(), nodata)
    }

    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    pub fn geo_transform(&self) -> &GeoTransform {
        &self.params.geo_transform
    }

    pub fn nodata(&self) -> f64 {
        self.params.nodata
    }

    pub fn is_nodata(&self, value: f64) -> bool {
        self.params.is_nodata(value)
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.data.get([row, col]).copied()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn data_mut(&mut self) -> &mut Array2<f64> {
        &mut self.data
    }

    // Iterator over values that are not NoData
    pub fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied().filter(move |v| !self.is_nodata(*v))
    }

    /// Population standard deviation of the valid pixels, `None` when empty.
    pub fn std_dev(&self) -> Option<f64> {
        let (count, sum) = self.valid_values().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
        if count == 0 {
            return None;
        }
        let mean = sum / count as f64;
        let var = self.valid_values().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        Some(var.sqrt())
    }

    // Number of NoData pixels
    pub fn nodata_count(&self) -> usize {
        self.data.iter().filter(|v| self.is_nodata(**v)).count()
    }
}
