//! Command-line interface for the sensor map pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::loaders::load_sensor_table;
use crate::core::transforms::Crs;
use crate::core::writers::{write_boundaries_geojson, write_render_layer_json, write_sensor_table};
use crate::processors::boundaries::{load_boundaries, BoundaryCache};
use crate::processors::normalizer::normalize;
use crate::processors::pipeline::{run_pipeline, RenderRequest};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "sensor-map")]
#[command(about = "Sensor data normalization and boundary map pipeline", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a sensor table and export the surviving rows
    Normalize {
        /// Sensor CSV file
        input: PathBuf,
        /// Output CSV file
        #[arg(short, long, default_value = "sensors_export.csv")]
        output: PathBuf,
        /// Read the coordinate columns as named (no axis swap)
        #[arg(long)]
        no_swap: bool,
    },

    /// Print the first rows of the normalized table
    Preview {
        /// Sensor CSV file
        input: PathBuf,
        /// Number of rows (defaults to map.preview_rows)
        #[arg(short, long)]
        rows: Option<usize>,
        /// Read the coordinate columns as named (no axis swap)
        #[arg(long)]
        no_swap: bool,
    },

    /// Run the full pipeline and write the render layer
    Render {
        /// Sensor CSV file
        input: PathBuf,
        /// Measurement to display (defaults to display.default_parameter)
        #[arg(short, long)]
        parameter: Option<String>,
        /// Boundary file (GeoJSON or shapefile)
        #[arg(short, long)]
        boundaries: Option<PathBuf>,
        /// Skip the boundary overlay
        #[arg(long)]
        no_boundaries: bool,
        /// Output JSON file for the render layer
        #[arg(short, long, default_value = "render_layer.json")]
        output: PathBuf,
        /// Also draw a PNG preview
        #[arg(long)]
        png: Option<PathBuf>,
    },

    /// Load and reproject a boundary file to GeoJSON
    Boundaries {
        /// Boundary file (GeoJSON or shapefile)
        path: PathBuf,
        /// Output GeoJSON file
        #[arg(short, long, default_value = "boundaries.geojson")]
        output: PathBuf,
        /// Source CRS, overriding the one the file declares
        #[arg(long)]
        source_crs: Option<String>,
        /// Target CRS
        #[arg(long, default_value = "EPSG:4326")]
        target_crs: String,
    },

    /// Write the default configuration to a YAML file
    InitConfig {
        /// Output YAML file
        #[arg(default_value = "pipeline.yaml")]
        output: PathBuf,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    // Dispatch to subcommands
    let result = match cli.command {
        Commands::Normalize { input, output, no_swap } => cmd_normalize(&input, &output, no_swap, config),
        Commands::Preview { input, rows, no_swap } => cmd_preview(&input, rows, no_swap, config),
        Commands::Render { input, parameter, boundaries, no_boundaries, output, png } => {
            cmd_render(&input, parameter, boundaries, no_boundaries, &output, png, config)
        }
        Commands::Boundaries { path, output, source_crs, target_crs } => {
            cmd_boundaries(&path, &output, source_crs, &target_crs, config)
        }
        Commands::InitConfig { output } => cmd_init_config(&output),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn with_swap(mut config: PipelineConfig, no_swap: bool) -> PipelineConfig {
    if no_swap {
        config.sensors.swap_axes = false;
    }
    config
}

fn cmd_normalize(input: &Path, output: &Path, no_swap: bool, config: PipelineConfig) -> Result<()> {
    let config = with_swap(config, no_swap);
    let start = Instant::now();

    println!("Normalizing sensor table...");
    println!("Input: {}", input.display());
    println!("Output: {}", output.display());
    println!("Axis swap: {}", config.sensors.swap_axes);

    let spinner = create_spinner("Normalizing coordinates...");
    let outcome = (|| {
        let table = load_sensor_table(input, config.sensors.delimiter)
            .with_context(|| format!("failed to read sensor table {}", input.display()))?;
        let normalized = normalize(&table, &config.sensors)
            .with_context(|| format!("failed to normalize {}", input.display()))?;
        write_sensor_table(output, &normalized.to_sensor_table(), config.sensors.delimiter)?;
        anyhow::Ok(normalized)
    })();
    spinner.finish_and_clear();
    let normalized = outcome?;

    let report = &normalized.report;
    let mut items = vec![
        ("Input file", input.display().to_string()),
        ("Output file", output.display().to_string()),
        ("Rows read", report.input_rows.to_string()),
        ("Rows retained", report.retained.to_string()),
        ("Rows dropped", report.excluded().to_string()),
    ];
    let reasons: Vec<String> = report
        .dropped
        .iter()
        .map(|(reason, count)| format!("{reason}: {count}"))
        .collect();
    if !reasons.is_empty() {
        items.push(("Drop reasons", reasons.join(", ")));
    }
    items.push(("Duration", format!("{:.2?}", start.elapsed())));

    print_summary("Normalization Complete", &items);
    Ok(())
}

fn cmd_preview(input: &Path, rows: Option<usize>, no_swap: bool, config: PipelineConfig) -> Result<()> {
    let config = with_swap(config, no_swap);
    let rows = rows.unwrap_or(config.map.preview_rows);

    let table = load_sensor_table(input, config.sensors.delimiter)
        .with_context(|| format!("failed to read sensor table {}", input.display()))?;
    let normalized = normalize(&table, &config.sensors)?;
    let exported = normalized.corrected_table();
    let shown = &exported.rows[..rows.min(exported.rows.len())];

    let widths: Vec<usize> = exported
        .headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            shown
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let format_row = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{cell:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
    };

    println!("{}", format_row(&exported.headers));
    for row in shown {
        println!("{}", format_row(row));
    }
    println!(
        "({} of {} normalized rows, {} dropped)",
        shown.len(),
        normalized.len(),
        normalized.report.excluded()
    );
    Ok(())
}

fn cmd_render(
    input: &Path,
    parameter: Option<String>,
    boundaries: Option<PathBuf>,
    no_boundaries: bool,
    output: &Path,
    png: Option<PathBuf>,
    mut config: PipelineConfig,
) -> Result<()> {
    use crate::visualization;

    let start = Instant::now();

    if let Some(path) = boundaries {
        config.boundaries.path = Some(path);
    }
    let request = RenderRequest {
        parameter,
        show_boundaries: if no_boundaries { Some(false) } else { None },
    };

    println!("Rendering sensor map...");
    println!("Input: {}", input.display());
    println!("Output: {}", output.display());

    let spinner = create_spinner("Running pipeline...");
    let result = run_pipeline(input, &config, &request, BoundaryCache::global());
    let output_data = match result {
        Ok(data) => data,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e).with_context(|| format!("render of {} failed", input.display()));
        }
    };

    spinner.set_message("Writing render layer...");
    let written = write_render_layer_json(output, &output_data.layer);
    if let Err(e) = written {
        spinner.finish_and_clear();
        return Err(e.into());
    }

    if let Some(png_path) = &png {
        spinner.set_message("Generating plot...");
        if let Err(e) = visualization::plot_render_layer(png_path, &output_data.layer) {
            spinner.finish_and_clear();
            return Err(e).context("failed to draw PNG preview");
        }
    }
    spinner.finish_and_clear();

    for warning in &output_data.warnings {
        println!("Warning: {warning}");
    }

    let layer = &output_data.layer;
    let range = layer
        .parameter
        .range
        .map(|[lo, hi]| format!("{lo} to {hi}"))
        .unwrap_or_else(|| "n/a".to_string());
    let mut items = vec![
        ("Input file", input.display().to_string()),
        ("Output JSON", output.display().to_string()),
        ("Parameter", layer.parameter.field.clone()),
        ("Value range", range),
        ("Points drawn", layer.points.len().to_string()),
        ("Rows dropped", output_data.table.report.excluded().to_string()),
        ("Points w/o value", layer.parameter.excluded.to_string()),
        ("Boundary outlines", layer.outlines.len().to_string()),
    ];
    if let Some(png_path) = png {
        items.push(("Output PNG", png_path.display().to_string()));
    }
    items.push(("Duration", format!("{:.2?}", start.elapsed())));

    print_summary("Render Complete", &items);
    Ok(())
}

fn cmd_boundaries(
    path: &Path,
    output: &Path,
    source_crs: Option<String>,
    target_crs: &str,
    mut config: PipelineConfig,
) -> Result<()> {
    let start = Instant::now();

    let target = Crs::parse(target_crs).with_context(|| format!("invalid target CRS {target_crs}"))?;
    if source_crs.is_some() {
        config.boundaries.source_crs = source_crs;
    }

    println!("Reprojecting boundaries...");
    println!("Input: {}", path.display());
    println!("Output: {}", output.display());

    let spinner = create_spinner("Loading boundary polygons...");
    let loaded = load_boundaries(path, &config.boundaries, target);
    spinner.finish_and_clear();
    let set = loaded?;

    write_boundaries_geojson(output, &set)?;

    print_summary(
        "Boundary Reprojection Complete",
        &[
            ("Input file", path.display().to_string()),
            ("Output file", output.display().to_string()),
            ("Polygons", set.len().to_string()),
            ("Source CRS", set.source_crs.to_string()),
            ("Target CRS", set.crs.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_init_config(output: &Path) -> Result<()> {
    PipelineConfig::default()
        .to_yaml(output)
        .map_err(|e| anyhow::anyhow!("failed to write {}: {}", output.display(), e))?;
    println!("Wrote default configuration to {}", output.display());
    Ok(())
}
