//! Seasonal bare-land detection over Sentinel-2 style scenes.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use bareland::scenario::{run_bare_land, run_rainfall, run_time_series, write_series_csv};
use bareland::{DirectoryPresenter, ScenarioConfig, Workspace};
use clap::{Parser, Subcommand};
use common::log_setup::setup_logging;
use log::info;

#[derive(Parser)]
#[command(name = "bareland", version, about = "Bare cropland detection from seasonal composites")]
struct Cli {
    /// Scenario YAML; defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seasonal areas, map layers and the winter mask export.
    BareLand {
        /// Layer or index group (NDVI, SAVI, BSI) to switch; repeatable.
        #[arg(long = "toggle", value_name = "LAYER")]
        toggles: Vec<String>,
    },
    /// Mean index values per scene date.
    TimeSeries {
        /// One row per field instead of the whole study area.
        #[arg(long)]
        per_feature: bool,
    },
    /// Daily rainfall charts per station.
    Rainfall,
    /// Prints the effective configuration as YAML.
    PrintConfig,
}

fn load_config(path: Option<&str>) -> anyhow::Result<ScenarioConfig> {
    match path {
        Some(path) => ScenarioConfig::load(path).with_context(|| format!("Failed to load config {path}")),
        None => Ok(ScenarioConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    if let Command::PrintConfig = cli.command {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let _logger = setup_logging(&cli.log_level, &config.paths.log_dir)?;
    let presenter = Arc::new(DirectoryPresenter::new(&config.paths.output_dir)?);

    match cli.command {
        Command::BareLand { toggles } => {
            let workspace = Workspace::load(&config).await?;
            let report = run_bare_land(&config, &workspace, presenter.clone(), &toggles).await?;
            print!("{report}");

            let path = presenter.dir().join("bare_land_report.yaml");
            common::file_format::save_file(&path.display().to_string(), &report)?;
            info!("Report written to {}", path.display());
        }
        Command::TimeSeries { per_feature } => {
            config.time_series.per_feature |= per_feature;
            let workspace = Workspace::load(&config).await?;
            let series = run_time_series(&config, &workspace, presenter.as_ref()).await?;

            let path = Path::new(&config.paths.output_dir).join("index_time_series.csv");
            write_series_csv(&series, &path)?;
            println!("{} rows written to {}", series.len(), path.display());
        }
        Command::Rainfall => {
            let charts = run_rainfall(&config, presenter.as_ref())?;
            println!("{charts} rainfall charts written to {}", presenter.dir().display());
        }
        Command::PrintConfig => {}
    }

    Ok(())
}
