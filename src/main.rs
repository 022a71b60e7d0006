use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use console::Term;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use topo_factors::io::{
    prepare_output_dir, read_coarse_cells, read_elevation, write_attribute_layer, write_attribute_table, write_raster,
};
use topo_factors::{text, CellRecord, OverlapPolicy, TopoConfig, TopoPipeline};

const ATTRIBUTE_LAYER: &str = "cell_attributes.gpkg";
const ATTRIBUTE_TABLE: &str = "cell_attributes.csv";
const SKY_VIEW_RASTER: &str = "sky_view_factor.tif";
const DOWNSCALING_RASTER: &str = "downscaling_factor.tif";

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum Mode {
    /// Per-cell attribute table only.
    Attributes,
    /// Full-resolution Sky View Factor and downscaling rasters only.
    Rasters,
    /// Both outputs.
    All,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
enum Overlap {
    /// A pixel covered by several cells keeps the value of the last one.
    Last,
    /// A pixel covered by several cells keeps the value of the first one.
    First,
}

impl From<Overlap> for OverlapPolicy {
    fn from(value: Overlap) -> Self {
        match value {
            Overlap::Last => OverlapPolicy::LastWriteWins,
            Overlap::First => OverlapPolicy::FirstWriteWins,
        }
    }
}

/// Command-line arguments for the topo-factors tool.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "A command-line tool to derive subgrid topographic parameters (Sky View Factor, wind downscaling factor) for the cells of a coarse NWP grid."
)]
struct Args {
    /// Path to the input Digital Elevation Model (DEM) file.
    #[arg(long)]
    dem: PathBuf,
    /// Path to the vector file holding the coarse grid cells (polygons).
    #[arg(long)]
    cells: PathBuf,
    /// Path to the output directory where results will be saved.
    #[arg(long)]
    output: PathBuf,
    /// Attribute field holding the station id of each cell.
    #[arg(long, default_value = "stat_id")]
    id_field: String,
    /// Outputs to produce.
    #[arg(long, value_enum, default_value_t = Mode::All)]
    mode: Mode,
    /// Optional: JSON file overriding the default constants.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Optional: DEM cell size in metres. Required for geographic DEMs.
    #[arg(long)]
    cell_size: Option<f64>,
    /// Which cell wins where raster windows overlap.
    #[arg(long, value_enum, default_value_t = Overlap::Last)]
    overlap: Overlap,
    /// Leave failed cells out of the attribute table.
    #[arg(long)]
    drop_failed: bool,
    /// Number of parallel jobs. Defaults to the number of processors.
    #[arg(long)]
    jobs: Option<usize>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let line = "-".repeat(72);
    let dline = "=".repeat(72);

    println!(
        "\n{}\n{}\nTool for deriving the Sky View Factor and the topographic wind\ndownscaling factor of coarse grid cells from a high-resolution DEM.\n\nAuthors:\n{}\n{}\n",
        format!(
            "{} {}",
            text::highlight("Topographic Factors"),
            env!("CARGO_PKG_VERSION")
        ),
        line,
        env!("CARGO_PKG_AUTHORS"),
        dline
    );

    let mut config = match &args.config {
        Some(path) => TopoConfig::from_json_file(path)?,
        None => TopoConfig::default(),
    };
    if args.cell_size.is_some() {
        config.cell_size = args.cell_size;
    }
    config.validate().context("Invalid configuration")?;

    let num_procs = num_cpus::get();
    let jobs = match args.jobs {
        Some(0) => {
            println!("{}: 'jobs' value must be greater than 0. Using the number of processors.\n", text::warning("Warning"));
            num_procs
        }
        Some(max_jobs) => max_jobs.min(num_procs),
        None => num_procs,
    };
    rayon::ThreadPoolBuilder::new().num_threads(jobs).build_global()?;

    let policy = OverlapPolicy::from(args.overlap);

    println!("{} Configuration:", text::bold("Processing"));
    println!("{}", text::field_line("Input DEM:", args.dem.display()));
    println!("{}", text::field_line("Coarse Cells:", args.cells.display()));
    println!("{}", text::field_line("Station Id Field:", &args.id_field));
    println!("{}", text::field_line("Output Directory:", args.output.display()));
    println!("{}", text::field_line("Mode:", format!("{:?}", args.mode)));
    match config.cell_size {
        Some(dx) => println!("{}", text::field_line("Cell Size:", format!("{} m", dx))),
        None => println!("{}", text::field_line("Cell Size:", "from DEM")),
    }
    println!("{}", text::field_line("Coarse Resolution:", format!("{} m", config.coarse_resolution)));
    let (attribute_window, raster_window) = (config.attribute_window(), config.raster_window());
    println!("{}", text::field_line("Attribute Window:", format!("{}x{}", attribute_window, attribute_window)));
    println!("{}", text::field_line("Raster Window:", format!("{}x{}", raster_window, raster_window)));
    println!("{}", text::field_line("Overlap Policy:", format!("{:?}", policy)));
    println!("{}", text::field_line("Parallel Jobs:", jobs));
    println!("{}\n", dline);

    let dem = read_elevation(&args.dem)?;
    dem.ensure_metric(config.cell_size)?;
    let (rows, cols) = dem.grid.shape();
    println!("{} Input DEM loaded ({}x{}).", text::check_icon(), cols, rows);

    let collection = read_coarse_cells(&args.cells, &args.id_field, dem.grid.wkt())?;
    let cells = &collection.cells;
    println!("{} {} coarse cells loaded.", text::check_icon(), cells.len());

    let pipeline = TopoPipeline::new(dem.grid, config)?;
    println!(
        "{} Elevation Laplacian computed (Δx = {} m, σ = {:.2} m).\n",
        text::check_icon(),
        pipeline.cell_size(),
        pipeline.sigma()
    );

    let output = prepare_output_dir(args.output.clone())?;

    if matches!(args.mode, Mode::Attributes | Mode::All) {
        let counter = Mutex::new(0usize);
        let records = pipeline.attribute_table_with_progress(cells, || report_progress(&counter, "Computing cell attributes", cells.len()));
        finish_progress("Cell attributes computed.");
        report_skipped(&records);

        let path = output.join(ATTRIBUTE_LAYER);
        let written = write_attribute_layer(&collection, &records, &path, args.drop_failed)?;
        write_attribute_table(&records, &output.join(ATTRIBUTE_TABLE), args.drop_failed)?;
        println!("{} {} cells written.", text::check_icon(), written);
        println!("{}\n", text::output_list("Outputs:", &[ATTRIBUTE_LAYER, ATTRIBUTE_TABLE]));
    }

    if matches!(args.mode, Mode::Rasters | Mode::All) {
        let counter = Mutex::new(0usize);
        let (rasters, records) = pipeline.raster_mosaic_with_progress(cells, policy, || {
            report_progress(&counter, "Computing output rasters", cells.len())
        });
        finish_progress("Output rasters computed.");
        report_skipped(&records);

        write_raster(&rasters.sky_view, &output.join(SKY_VIEW_RASTER))?;
        write_raster(&rasters.downscaling, &output.join(DOWNSCALING_RASTER))?;
        println!("{}", text::output_list("Outputs:", &[SKY_VIEW_RASTER, DOWNSCALING_RASTER]));
        println!("{}", text::field_line("Sky View Coverage:", text::coverage(rasters.covered_count(), rows * cols)));
        println!("{}\n", text::field_line("Downscaling Coverage:", text::coverage(rasters.downscaling_count(), rows * cols)));
    }

    println!("{} All outputs saved to {}", text::success("Done."), output.display());
    Ok(())
}

fn report_progress(counter: &Mutex<usize>, label: &str, total: usize) {
    let Ok(mut count) = counter.lock() else {
        return;
    };
    *count += 1;
    let term = Term::stdout();
    let _ = term.clear_line();
    print!("\r{}... {:.0}%", label, (*count as f32 / total.max(1) as f32) * 100.0);
    let _ = io::stdout().flush();
}

fn finish_progress(message: &str) {
    let term = Term::stdout();
    let _ = term.clear_line();
    println!("\r{} {}", text::check_icon(), message);
}

// Warning per skipped cell, then a count per failure kind.
fn report_skipped(records: &[CellRecord]) {
    let mut per_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
    for record in records {
        if let Err(err) = &record.outcome {
            println!("{}", text::skipped_cell(&record.station_id, err));
            *per_kind.entry(err.kind()).or_default() += 1;
        }
    }

    let skipped: usize = per_kind.values().sum();
    println!("{}", text::field_line("Computed:", text::success((records.len() - skipped).to_string())));
    if skipped == 0 {
        return;
    }
    println!("{}", text::field_line("Skipped:", format!("{} {}", text::cross_icon(), text::error(skipped.to_string()))));
    for (kind, count) in per_kind {
        println!("    {:<22} {}", kind, count);
    }
}
