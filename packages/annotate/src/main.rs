#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI for the AVA county annotation pipeline.

use std::path::PathBuf;

use ava_county_annotate::{PipelineConfig, pipeline};
use ava_county_cli_utils::IndicatifProgress;
use ava_county_diff::{Snapshot, report};
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ava_county_annotate")]
#[command(about = "Annotate AVA regions with the counties they intersect")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Annotate every region in the input directory
    Run(RunArgs),

    /// Compare two directories of region files
    Diff {
        /// Directory with the earlier regions
        before: PathBuf,

        /// Directory with the later regions
        after: PathBuf,

        /// Region property holding the region id
        #[arg(long)]
        id_field: Option<String>,
    },

    /// Download the reference boundaries into the local cache
    Fetch {
        /// Source URL
        #[arg(long)]
        url: Option<String>,

        /// Cache path
        #[arg(long)]
        dest: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Directory of region `GeoJSON` files
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Directory for the annotated regions
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Overwrite the input files instead of writing to the output directory
    #[arg(long)]
    in_place: bool,

    /// `DuckDB` file
    #[arg(long)]
    database: Option<PathBuf>,

    /// Local reference dataset (zip, shapefile, or `GeoJSON`); downloaded if missing
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Minimum overlap in square meters
    #[arg(long)]
    threshold: Option<f64>,

    /// Number of concurrent region tasks
    #[arg(long)]
    workers: Option<usize>,

    /// EPSG code regions must declare
    #[arg(long)]
    canonical_epsg: Option<u32>,
}

impl RunArgs {
    fn apply(self, config: &mut PipelineConfig) {
        if let Some(dir) = self.input_dir {
            config.input_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if self.in_place {
            config.in_place = true;
            config.output_dir.clone_from(&config.input_dir);
        }
        if let Some(path) = self.database {
            config.database_path = path;
        }
        if let Some(path) = self.reference {
            config.reference_cache = path;
        }
        if let Some(threshold) = self.threshold {
            config.area_threshold_sq_m = threshold;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(epsg) = self.canonical_epsg {
            config.canonical_epsg = epsg;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = ava_county_cli_utils::init_logger();
    let cli = Cli::parse();
    let mut config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config);
            config.validate()?;

            let progress = IndicatifProgress::regions_bar(&multi, "Annotating regions");
            let summary = pipeline::run(&config, &progress).await?;
            summary.log();
        }
        Commands::Diff {
            before,
            after,
            id_field,
        } => {
            let id_field = id_field.unwrap_or_else(|| config.region_id_field.clone());
            let before = Snapshot::from_dir(&before, &id_field)?;
            let after = Snapshot::from_dir(&after, &id_field)?;
            for line in report::render_report(&ava_county_diff::diff(&before, &after)) {
                println!("{line}");
            }
        }
        Commands::Fetch { url, dest } => {
            if let Some(url) = url {
                config.reference_url = url;
            }
            if let Some(dest) = dest {
                config.reference_cache = dest;
            }
            let path = pipeline::fetch_reference(&config).await?;
            log::info!("Reference dataset at {}", path.display());
        }
    }

    Ok(())
}
