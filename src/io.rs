//! GDAL-backed reading and writing of the pipeline inputs and outputs.

use anyhow::{bail, Context, Result};
use gdal::raster::Buffer;
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use gdal::vector::{Feature, FieldValue, Geometry, LayerAccess, LayerOptions, OGRFieldType, OGRwkbGeometryType};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::mosaic::CellRecord;
use crate::polygon::{CoarseCell, Polygon};
use crate::raster::{GeoTransform, Grid};
use crate::text;

/// Sentinel used for a DEM band without a declared no-data value.
pub const DEFAULT_NODATA: f64 = -9999.0;

/// Checks if an output directory exists. If it does, a new, unused directory
/// name is chosen by appending an index (`output`, `output.1`, `output.2`).
/// Returns the path of the created directory.
pub fn prepare_output_dir(path: PathBuf) -> Result<PathBuf> {
    if !path.exists() {
        std::fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create directory: {:?}", path))?;
        return Ok(path);
    }

    let file_name = path
        .file_name()
        .context("Failed to get directory name")?
        .to_string_lossy()
        .into_owned();

    let mut index = 1;
    loop {
        let new_path = path.with_file_name(format!("{}.{}", file_name, index));
        if !new_path.exists() {
            std::fs::create_dir_all(&new_path)
                .with_context(|| format!("Failed to create directory: {:?}", new_path))?;
            println!(
                "{}: Output directory {:?} already exists. Using {:?} instead.\n",
                text::warning("Warning"),
                path,
                new_path
            );
            return Ok(new_path);
        }
        index += 1;
    }
}

/// Elevation raster together with its CRS information.
#[derive(Debug, Clone)]
pub struct ElevationRaster {
    pub grid: Grid,
    pub is_geographic: bool,
}

impl ElevationRaster {
    /// A geographic DEM has no metric pixel size, so Δx must be configured.
    pub fn ensure_metric(&self, configured_cell_size: Option<f64>) -> std::result::Result<(), ConfigError> {
        if self.is_geographic && configured_cell_size.is_none() {
            return Err(ConfigError::UnprojectedDem);
        }
        Ok(())
    }
}

/// Reads band 1 of a raster file as the elevation grid.
pub fn read_elevation(path: &Path) -> Result<ElevationRaster> {
    let dataset = Dataset::open(path)
        .with_context(|| format!("Failed to open input DEM: {:?}", path))?;
    let geo_transform = GeoTransform(dataset.geo_transform()?);
    let (wkt, is_geographic) = match dataset.spatial_ref() {
        Ok(srs) => (srs.to_wkt().ok().filter(|wkt| !wkt.is_empty()), srs.is_geographic()),
        Err(_) => (None, false),
    };

    let band = dataset.rasterband(1)?;
    let nodata = band.no_data_value().unwrap_or(DEFAULT_NODATA);
    let (width, height) = dataset.raster_size();

    let buffer: Buffer<f64> = band.read_as((0, 0), (width, height), (width, height), None)?;
    let data = Array2::from_shape_vec((height, width), buffer.data().to_vec())
        .context("Failed to shape DEM data")?;

    Ok(ElevationRaster {
        grid: Grid::new(data, geo_transform, wkt, nodata),
        is_geographic,
    })
}

/// Field definition of the coarse grid layer.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceField {
    pub name: String,
    pub field_type: OGRFieldType::Type,
}

struct SourceFeature {
    geometry: Geometry,
    values: Vec<Option<FieldValue>>,
}

/// Coarse cells together with the schema, attribute values and geometries of
/// the vector source they were read from. `cells[i]` is built from the i-th
/// kept feature.
pub struct CoarseCollection {
    pub cells: Vec<CoarseCell>,
    pub fields: Vec<SourceField>,
    features: Vec<SourceFeature>,
    wkt: Option<String>,
}

impl CoarseCollection {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// CRS of the stored geometries.
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }
}

/// Reads the coarse cells from the first layer of a vector source.
///
/// Station ids come from `id_field`, falling back to the feature id when the
/// field is missing or empty. Geometries are transformed to `target_wkt`
/// when the layer declares a different CRS. Features without a usable
/// polygon are reported and left out. Every attribute of the kept features
/// is retained for [`write_attribute_layer`].
pub fn read_coarse_cells(path: &Path, id_field: &str, target_wkt: Option<&str>) -> Result<CoarseCollection> {
    let dataset = Dataset::open(path)
        .with_context(|| format!("Failed to open coarse grid: {:?}", path))?;
    let mut layer = dataset.layer(0).context("Coarse grid has no layer")?;

    let fields: Vec<SourceField> = layer
        .defn()
        .fields()
        .map(|field| SourceField {
            name: field.name(),
            field_type: field.field_type(),
        })
        .collect();

    let source_srs = layer.spatial_ref();
    let source_wkt = source_srs.as_ref().and_then(|srs| srs.to_wkt().ok());
    let transform = match (source_srs, target_wkt) {
        (Some(mut source), Some(wkt)) => {
            let mut target = SpatialRef::from_wkt(wkt)?;
            if source.to_wkt()? == target.to_wkt()? {
                None
            } else {
                source.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
                target.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
                Some(CoordTransform::new(&source, &target)?)
            }
        }
        _ => None,
    };
    let wkt = match target_wkt {
        Some(wkt) => Some(wkt.to_string()),
        None => source_wkt,
    };

    let mut cells = Vec::new();
    let mut features = Vec::new();
    for feature in layer.features() {
        let fid = feature.fid().unwrap_or(cells.len() as u64);
        let station_id = feature
            .field_index(id_field)
            .ok()
            .and_then(|idx| feature.field_as_string(idx).ok().flatten())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| fid.to_string());

        let Some(geometry) = feature.geometry() else {
            println!("{}: Feature {} has no geometry, ignored.", text::warning("Warning"), station_id);
            continue;
        };
        let geometry = match &transform {
            Some(ct) => geometry.transform(ct)?,
            None => geometry.clone(),
        };
        let Some(exterior) = exterior_ring(&geometry) else {
            println!(
                "{}: Feature {} is not a polygon, ignored.",
                text::warning("Warning"),
                station_id
            );
            continue;
        };

        let values = (0..fields.len())
            .map(|idx| feature.field(idx).ok().flatten())
            .collect();
        cells.push(CoarseCell::new(station_id, Polygon::new(exterior)));
        features.push(SourceFeature { geometry, values });
    }

    Ok(CoarseCollection {
        cells,
        fields,
        features,
        wkt,
    })
}

// Exterior ring of a polygon, or of the first polygon of a multipolygon
fn exterior_ring(geometry: &Geometry) -> Option<Vec<(f64, f64)>> {
    match geometry.geometry_type() {
        OGRwkbGeometryType::wkbPolygon | OGRwkbGeometryType::wkbPolygon25D => {
            if geometry.geometry_count() == 0 {
                return None;
            }
            let ring = geometry.get_geometry(0);
            let mut raw_points = Vec::new();
            ring.get_points(&mut raw_points);
            let points: Vec<(f64, f64)> = raw_points.into_iter().map(|(x, y, _)| (x, y)).collect();
            if points.is_empty() {
                None
            } else {
                Some(points)
            }
        }
        OGRwkbGeometryType::wkbMultiPolygon | OGRwkbGeometryType::wkbMultiPolygon25D => {
            if geometry.geometry_count() == 0 {
                return None;
            }
            let polygon = geometry.get_geometry(0);
            exterior_ring(&polygon)
        }
        _ => None,
    }
}

/// Writes a grid to a single-band Float64 GeoTIFF with its geotransform,
/// CRS and no-data sentinel.
pub fn write_raster(grid: &Grid, path: &Path) -> Result<()> {
    let (rows, cols) = grid.shape();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut ds = driver
        .create_with_band_type::<f64, _>(path, cols, rows, 1)
        .with_context(|| format!("Failed to create GeoTIFF file: {:?}", path))?;

    ds.set_geo_transform(&grid.geo_transform().0)?;
    if let Some(wkt) = grid.wkt() {
        let srs = SpatialRef::from_wkt(wkt)?;
        ds.set_spatial_ref(&srs)?;
    }

    let mut band = ds.rasterband(1)?;
    band.set_no_data_value(Some(grid.nodata()))?;

    // Collect into a Vec to ensure data is contiguous.
    let data: Vec<f64> = grid.view().iter().copied().collect();
    let mut buffer = Buffer::new((cols, rows), data);
    band.write((0, 0), (cols, rows), &mut buffer)?;
    Ok(())
}

const ATTRIBUTE_COLUMNS: [&str; 7] = ["station_id", "centroid_x", "centroid_y", "mu", "xi", "f_sky", "status"];

#[derive(Debug, Serialize)]
struct AttributeRow<'a> {
    station_id: &'a str,
    centroid_x: Option<f64>,
    centroid_y: Option<f64>,
    mu: Option<f64>,
    xi: Option<f64>,
    f_sky: Option<f64>,
    status: &'a str,
}

/// Writes the per-cell attribute table as CSV.
///
/// Failed cells are dropped when `drop_failed` is set, otherwise kept with
/// empty numeric columns and the failure kind in `status`.
pub fn write_attribute_table(records: &[CellRecord], path: &Path, drop_failed: bool) -> Result<usize> {
    // Header written up front so a table with every row dropped is still readable.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create attribute table: {:?}", path))?;
    writer.write_record(ATTRIBUTE_COLUMNS)?;

    let mut written = 0;
    for record in records {
        let (x, y) = match record.centroid {
            Some((x, y)) => (Some(x), Some(y)),
            None => (None, None),
        };
        let row = match &record.outcome {
            Ok(attrs) => AttributeRow {
                station_id: &record.station_id,
                centroid_x: x,
                centroid_y: y,
                mu: Some(attrs.mu),
                xi: Some(attrs.xi),
                f_sky: Some(attrs.sky_view_factor),
                status: "ok",
            },
            Err(_) if drop_failed => continue,
            Err(err) => AttributeRow {
                station_id: &record.station_id,
                centroid_x: x,
                centroid_y: y,
                mu: None,
                xi: None,
                f_sky: None,
                status: err.kind(),
            },
        };
        writer.serialize(row)?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// Fields appended to the coarse grid schema in the attribute layer.
const RESULT_FIELDS: [(&str, OGRFieldType::Type); 4] = [
    ("mu", OGRFieldType::OFTReal),
    ("xi", OGRFieldType::OFTReal),
    ("f_sky", OGRFieldType::OFTReal),
    ("status", OGRFieldType::OFTString),
];

fn vector_driver_for(path: &Path) -> Result<&'static str> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "gpkg" => Ok("GPKG"),
        "shp" => Ok("ESRI Shapefile"),
        "geojson" | "json" => Ok("GeoJSON"),
        other => bail!("Unsupported vector output format: {:?}", other),
    }
}

/// Writes the coarse grid back out with its original fields and geometries,
/// extended by `mu`, `xi`, `f_sky` and `status`.
///
/// `records` must follow the order of `collection.cells`. Failed cells are
/// dropped when `drop_failed` is set, otherwise kept with null results and
/// the failure kind in `status`. The format follows the file extension
/// (`.gpkg`, `.shp`, `.geojson`).
pub fn write_attribute_layer(
    collection: &CoarseCollection,
    records: &[CellRecord],
    path: &Path,
    drop_failed: bool,
) -> Result<usize> {
    if records.len() != collection.features.len() {
        bail!(
            "{} records for {} coarse cells",
            records.len(),
            collection.features.len()
        );
    }

    let driver = DriverManager::get_driver_by_name(vector_driver_for(path)?)?;
    let mut ds = driver
        .create_vector_only(path)
        .with_context(|| format!("Failed to create attribute layer: {:?}", path))?;
    let srs = collection.wkt().map(SpatialRef::from_wkt).transpose()?;
    let layer = ds.create_layer(LayerOptions {
        name: "cell_attributes",
        srs: srs.as_ref(),
        ty: OGRwkbGeometryType::wkbUnknown,
        ..Default::default()
    })?;

    let mut definitions: Vec<(&str, OGRFieldType::Type)> = collection
        .fields
        .iter()
        .map(|field| (field.name.as_str(), field.field_type))
        .collect();
    for (name, field_type) in RESULT_FIELDS {
        if !definitions.iter().any(|(existing, _)| *existing == name) {
            definitions.push((name, field_type));
        }
    }
    layer.create_defn_fields(&definitions)?;

    let mut written = 0;
    for (record, source) in records.iter().zip(&collection.features) {
        if drop_failed && !record.is_computed() {
            continue;
        }

        let mut feature = Feature::new(layer.defn())?;
        feature.set_geometry(source.geometry.clone())?;
        for (field, value) in collection.fields.iter().zip(&source.values) {
            if let Some(value) = value {
                let idx = feature.field_index(&field.name)?;
                feature.set_field(idx, value)?;
            }
        }

        match &record.outcome {
            Ok(attrs) => {
                feature.set_field_double(feature.field_index("mu")?, attrs.mu)?;
                feature.set_field_double(feature.field_index("xi")?, attrs.xi)?;
                feature.set_field_double(feature.field_index("f_sky")?, attrs.sky_view_factor)?;
                feature.set_field_string(feature.field_index("status")?, "ok")?;
            }
            Err(err) => {
                feature.set_field_string(feature.field_index("status")?, err.kind())?;
            }
        }
        feature.create(&layer)?;
        written += 1;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TopoError;
    use crate::mosaic::CellAttributes;

    fn records() -> Vec<CellRecord> {
        vec![
            CellRecord {
                station_id: "6720".to_string(),
                centroid: Some((612_500.0, 5_120_000.0)),
                outcome: Ok(CellAttributes {
                    mu: 0.25,
                    xi: 900.0,
                    sky_view_factor: 0.97,
                }),
            },
            CellRecord {
                station_id: "6721".to_string(),
                centroid: Some((615_000.0, 5_120_000.0)),
                outcome: Err(TopoError::DegenerateSlope),
            },
        ]
    }

    #[test]
    fn attribute_table_keeps_failed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.csv");
        assert_eq!(write_attribute_table(&records(), &path, false).unwrap(), 2);
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "station_id,centroid_x,centroid_y,mu,xi,f_sky,status");
        assert_eq!(lines[1], "6720,612500.0,5120000.0,0.25,900.0,0.97,ok");
        assert_eq!(lines[2], "6721,615000.0,5120000.0,,,,degenerate_slope");
    }

    #[test]
    fn attribute_table_drops_failed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.csv");
        assert_eq!(write_attribute_table(&records(), &path, true).unwrap(), 1);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(!content.contains("degenerate_slope"));
    }

    fn write_cells_geojson(path: &Path) {
        let feature = |id: &str, elev: f64, x: f64| {
            format!(
                r#"{{"type":"Feature","properties":{{"stat_id":"{id}","elev":{elev},"region":"alps"}},"geometry":{{"type":"Polygon","coordinates":[[[{x0},0.0],[{x1},0.0],[{x1},100.0],[{x0},100.0],[{x0},0.0]]]}}}}"#,
                id = id,
                elev = elev,
                x0 = x,
                x1 = x + 100.0
            )
        };
        let content = format!(
            r#"{{"type":"FeatureCollection","features":[{},{},{}]}}"#,
            feature("6720", 1450.5, 0.0),
            feature("6721", 2210.0, 100.0),
            r#"{"type":"Feature","properties":{"stat_id":"6722","elev":0.0,"region":"alps"},"geometry":null}"#
        );
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn coarse_cells_keep_source_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.geojson");
        write_cells_geojson(&path);

        let collection = read_coarse_cells(&path, "stat_id", None).unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.cells[1].station_id, "6721");
        let names: Vec<&str> = collection.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["stat_id", "elev", "region"]);
        assert_eq!(collection.cells[0].polygon.centroid(), Some((50.0, 50.0)));
    }

    #[test]
    fn attribute_layer_extends_source_schema() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cells.geojson");
        write_cells_geojson(&source);
        let collection = read_coarse_cells(&source, "stat_id", None).unwrap();

        let path = dir.path().join("cell_attributes.gpkg");
        assert_eq!(write_attribute_layer(&collection, &records(), &path, false).unwrap(), 2);

        let ds = Dataset::open(&path).unwrap();
        let mut layer = ds.layer(0).unwrap();
        let names: Vec<String> = layer.defn().fields().map(|f| f.name()).collect();
        assert_eq!(names, vec!["stat_id", "elev", "region", "mu", "xi", "f_sky", "status"]);

        let features: Vec<_> = layer.features().collect();
        assert_eq!(features.len(), 2);
        let first = &features[0];
        assert!(first.geometry().is_some());
        let elev = first.field_index("elev").unwrap();
        assert_eq!(first.field_as_double(elev).unwrap(), Some(1450.5));
        let f_sky = first.field_index("f_sky").unwrap();
        assert_eq!(first.field_as_double(f_sky).unwrap(), Some(0.97));

        let second = &features[1];
        let status = second.field_index("status").unwrap();
        assert_eq!(second.field_as_string(status).unwrap(), Some("degenerate_slope".to_string()));
        let mu = second.field_index("mu").unwrap();
        assert_eq!(second.field_as_double(mu).unwrap(), None);
    }

    #[test]
    fn attribute_layer_drops_failed_cells() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("cells.geojson");
        write_cells_geojson(&source);
        let collection = read_coarse_cells(&source, "stat_id", None).unwrap();

        let path = dir.path().join("cell_attributes.geojson");
        assert_eq!(write_attribute_layer(&collection, &records(), &path, true).unwrap(), 1);
        assert!(write_attribute_layer(&collection, &records()[..1], &dir.path().join("x.gpkg"), false).is_err());
    }

    #[test]
    fn output_dir_gets_suffix_when_taken() {
        let dir = tempfile::tempdir().unwrap();
        let first = prepare_output_dir(dir.path().join("out")).unwrap();
        let second = prepare_output_dir(dir.path().join("out")).unwrap();
        assert_eq!(first, dir.path().join("out"));
        assert_eq!(second, dir.path().join("out.1"));
    }

    #[test]
    fn raster_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.tif");
        let data = Array2::from_shape_fn((4, 6), |(i, j)| if i == j { -9999.0 } else { (i * 6 + j) as f64 * 0.125 });
        let grid = Grid::new(data, GeoTransform::north_up(600_000.0, 5_200_000.0, 20.0), None, -9999.0);
        write_raster(&grid, &path).unwrap();

        let read = read_elevation(&path).unwrap();
        assert_eq!(read.grid.view(), grid.view());
        assert_eq!(read.grid.nodata(), -9999.0);
        assert_eq!(read.grid.geo_transform(), grid.geo_transform());
        assert!(!read.is_geographic);
        assert!(read.ensure_metric(None).is_ok());
    }

    #[test]
    fn geographic_dem_needs_cell_size() {
        let raster = ElevationRaster {
            grid: Grid::new(Array2::zeros((3, 3)), GeoTransform::north_up(7.0, 47.0, 0.001), None, -9999.0),
            is_geographic: true,
        };
        assert_eq!(raster.ensure_metric(None), Err(ConfigError::UnprojectedDem));
        assert!(raster.ensure_metric(Some(25.0)).is_ok());
    }
}
