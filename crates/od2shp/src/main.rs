use anyhow::{ensure, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use odflow::resolver::DEFAULT_LAYER_ENCODINGS;
use odflow::{
    AutoAccept, Companions, FieldConfirmer, FixedField, PipelineConfig, RunSummary, ShapefileIo,
};

#[derive(Parser, Debug)]
#[command(name = "od2shp", version, about = "Zone OD matrix -> desire-line shapefile")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build desire lines among the target zones and write them as a shapefile.
    Run(RunArgs),
    /// Report companion files and the best text encoding of shapefiles.
    Probe(ProbeArgs),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// JSON run configuration. Flags below override its values.
    #[arg(long, env = "OD2SHP_CONFIG")]
    config: Option<PathBuf>,

    /// OD matrix CSV (destination ids across, origin ids down).
    #[arg(long)]
    od: Option<PathBuf>,

    /// Zone layer `.shp`.
    #[arg(long)]
    zones: Option<PathBuf>,

    /// Output `.shp`.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Target zone ids, comma separated.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    targets: Vec<i64>,

    /// Use this field as the zone id instead of the detected one.
    #[arg(long)]
    id_field: Option<String>,

    /// Candidate zone layer encodings, comma separated, in priority order.
    #[arg(long, value_delimiter = ',')]
    encodings: Vec<String>,

    /// First encoding to try for the output (default: the zone layer's).
    #[arg(long)]
    output_encoding: Option<String>,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

#[derive(Args, Debug, Clone)]
struct ProbeArgs {
    /// `.shp` files or directories to search for them.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Candidate encodings, comma separated.
    #[arg(long, value_delimiter = ',')]
    encodings: Vec<String>,
}

fn build_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::new(
            args.od.clone().context("--od is required without --config")?,
            args.zones.clone().context("--zones is required without --config")?,
            args.output.clone().context("--output is required without --config")?,
            Vec::new(),
        ),
    };

    if let Some(od) = &args.od {
        config.od_path = od.clone();
    }
    if let Some(zones) = &args.zones {
        config.zones_path = zones.clone();
    }
    if let Some(output) = &args.output {
        config.output_path = output.clone();
    }
    if !args.targets.is_empty() {
        config.targets = args.targets.clone();
    }
    if !args.encodings.is_empty() {
        config.layer_encodings = args.encodings.clone();
    }
    if args.output_encoding.is_some() {
        config.output_encoding = args.output_encoding.clone();
    }

    ensure!(!config.targets.is_empty(), "no target zones given (--targets or \"targets\" in the config)");

    Ok(config)
}

fn log_summary(summary: &RunSummary) {
    info!(
        "Encodings: OD matrix {}, zone layer {}",
        summary.csv_encoding.as_deref().unwrap_or("-"),
        summary.layer_encoding.as_deref().unwrap_or("reader default")
    );
    info!(
        "Zone id field '{}' ({:?}); {} zones indexed, {} bad ids, {} without geometry, {} repeated",
        summary.id_field,
        summary.id_match,
        summary.zones_indexed,
        summary.skipped_ids,
        summary.missing_geometry,
        summary.duplicate_ids
    );
    info!(
        "Targets: {} origins, {} destinations; {} pairs with flow",
        summary.valid_origins.len(),
        summary.valid_destinations.len(),
        summary.pairs_selected
    );
    info!("Desire lines: {} built, {} skipped", summary.lines_built, summary.lines_invalid);

    match &summary.output {
        Some((path, encoding)) => info!("Wrote {} ({})", path.display(), encoding),
        None => warn!("Nothing written"),
    }
}

fn run(args: &RunArgs) -> Result<()> {
    let config = build_config(args)?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let confirmer: Box<dyn FieldConfirmer> = match &args.id_field {
        Some(name) => Box::new(FixedField(name.clone())),
        None => Box::new(AutoAccept),
    };

    let summary = odflow::run(&config, &ShapefileIo, confirmer.as_ref())
        .with_context(|| format!("building desire lines into {}", config.output_path.display()))?;
    log_summary(&summary);

    Ok(())
}

fn is_shp(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("shp"))
}

/// Expand directories into the `.shp` files below them.
fn collect_shapefiles(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();

    for path in paths {
        if path.is_dir() {
            found.extend(
                WalkDir::new(path)
                    .follow_links(true)
                    .into_iter()
                    .filter_map(Result::ok)
                    .filter(|entry| entry.file_type().is_file())
                    .map(|entry| entry.into_path())
                    .filter(|p| is_shp(p)),
            );
        } else {
            found.push(path.clone());
        }
    }

    found.sort();
    found
}

/// Log what is on disk for `path` and how it resolves. Returns whether a
/// layer could be read.
fn probe_one(path: &Path, encodings: &[String]) -> bool {
    let companions = Companions::probe(path);
    for companion in &companions.entries {
        match companion.size {
            Some(size) => info!("{}: {} bytes", companion.path.display(), size),
            None if companion.required => warn!("{}: missing (required)", companion.path.display()),
            None => info!("{}: missing", companion.path.display()),
        }
    }
    if !companions.has("shp") {
        return false;
    }

    match odflow::resolve(&ShapefileIo, path, encodings) {
        Some(resolved) => {
            let layer = &resolved.layer;
            info!(
                "{}: {} features, encoding {}, fields {:?}, CRS {}",
                path.display(),
                layer.len(),
                resolved.encoding.as_deref().unwrap_or("reader default"),
                layer.field_names().collect::<Vec<_>>(),
                layer.crs.as_ref().and_then(|c| c.name()).unwrap_or("none")
            );
            true
        }
        None => {
            warn!("{}: unreadable under every encoding", path.display());
            false
        }
    }
}

fn probe(args: &ProbeArgs) -> Result<()> {
    let encodings: Vec<String> = if args.encodings.is_empty() {
        DEFAULT_LAYER_ENCODINGS.iter().map(|s| (*s).to_owned()).collect()
    } else {
        args.encodings.clone()
    };

    let shapefiles = collect_shapefiles(&args.paths);
    ensure!(!shapefiles.is_empty(), "no .shp files found");

    info!("Probing {} shapefiles...", shapefiles.len());
    let unreadable = shapefiles
        .par_iter()
        .filter(|path| !probe_one(path, &encodings))
        .count();

    if unreadable > 0 {
        warn!("{} of {} shapefiles could not be read", unreadable, shapefiles.len());
    }

    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Run(args) => run(&args),
        Command::Probe(args) => probe(&args),
    }
}
