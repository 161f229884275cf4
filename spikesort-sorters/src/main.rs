//! spikesort - run external spike sorters from the command line
//!
//! ```text
//! spikesort available
//! spikesort installed
//! spikesort params kilosort2
//! spikesort run kilosort2 --recording rec.dat --num-channels 32 \
//!     --sampling-frequency 30000 --probe probe.toml --grouping-property group
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use spikesort_common::bindat::{load_bin_dat, BinDatOptions, DType, TimeAxis};
use spikesort_common::config::{load_config, LoggingConfig, SpikesortConfig, CONFIG_ENV_VAR};
use spikesort_common::probe::Probe;
use spikesort_common::SortingSummary;
use spikesort_sorters::params::parse_override;
use spikesort_sorters::registry::init_default_registry;
use spikesort_sorters::{ParamSet, SorterOptions, SorterRef};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " [",
    env!("SPIKESORT_GIT_HASH"),
    "] built ",
    env!("SPIKESORT_BUILD_TIMESTAMP"),
    " (",
    env!("SPIKESORT_BUILD_PROFILE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "spikesort")]
#[command(about = "Run external spike sorting tools on electrophysiology recordings")]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every registered sorter
    Available,
    /// List sorters whose external tool is installed
    Installed,
    /// Show a sorter's default parameters
    Params { sorter: String },
    /// Show the installed version of a sorter's tool
    Version { sorter: String },
    /// Sort a raw binary recording
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    sorter: String,

    /// Raw binary recording (.dat/.bin/.raw)
    #[arg(long)]
    recording: PathBuf,

    #[arg(long)]
    num_channels: usize,

    #[arg(long)]
    sampling_frequency: f64,

    /// int16, uint16, int32, float32 or float64
    #[arg(long, default_value = "int16")]
    dtype: DType,

    /// sample_major (0) or channel_major (1)
    #[arg(long, default_value = "sample_major")]
    time_axis: TimeAxis,

    /// Bytes to skip at the start of the file
    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Probe file assigning channel groups and locations
    #[arg(long)]
    probe: Option<PathBuf>,

    #[arg(long)]
    output_folder: Option<PathBuf>,

    /// Sort each distinct value of this channel property separately
    #[arg(long)]
    grouping_property: Option<String>,

    #[arg(long)]
    parallel: bool,

    #[arg(long)]
    delete_output_folder: bool,

    #[arg(short, long)]
    verbose: bool,

    /// TOML file of parameter overrides, applied before --param
    #[arg(long)]
    params_file: Option<PathBuf>,

    /// Sorter parameter override, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_override)]
    params: Vec<(String, Value)>,

    /// Write a JSON report of the run
    #[arg(long)]
    summary: Option<PathBuf>,
}

/// JSON report written by `run --summary`
#[derive(Debug, Serialize)]
struct RunReport {
    sorter: String,
    recording: PathBuf,
    started_at: DateTime<Utc>,
    elapsed_secs: f64,
    partitions: usize,
    result: SortingSummary,
}

fn init_logging(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "spikesort={level},spikesort_sorters={level},spikesort_common={level}"
        ))
    });

    let file_layer = match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    let verbose = matches!(&cli.command, Command::Run(args) if args.verbose);
    init_logging(&config.logging, verbose)?;

    debug!(
        "spikesort v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("SPIKESORT_GIT_HASH"),
        env!("SPIKESORT_BUILD_TIMESTAMP"),
        env!("SPIKESORT_BUILD_PROFILE")
    );

    let registry = init_default_registry(&config);

    match cli.command {
        Command::Available => {
            for name in registry.available() {
                println!("{}", name);
            }
        }
        Command::Installed => {
            for name in registry.installed() {
                println!("{}", name);
            }
        }
        Command::Params { sorter } => {
            let params = registry.get_default_params(sorter.as_str())?;
            print!("{}", params);
        }
        Command::Version { sorter } => {
            let version = registry.sorter_version(sorter.as_str()).await?;
            println!("{} {}", sorter, version.as_deref().unwrap_or("unknown"));
        }
        Command::Run(args) => run(args, &config).await?,
    }
    Ok(())
}

async fn run(args: RunArgs, config: &SpikesortConfig) -> Result<()> {
    let mut bin_options = BinDatOptions::new(args.num_channels, args.sampling_frequency);
    bin_options.dtype = args.dtype;
    bin_options.time_axis = args.time_axis;
    bin_options.offset = args.offset;

    let mut recording = load_bin_dat(&args.recording, &bin_options)
        .with_context(|| format!("Failed to load {}", args.recording.display()))?;
    if let Some(probe_path) = &args.probe {
        Probe::load(probe_path)
            .and_then(|probe| probe.apply(&mut recording))
            .with_context(|| format!("Failed to apply probe {}", probe_path.display()))?;
    }

    let output_folder = args.output_folder.or_else(|| {
        config
            .output_root
            .as_ref()
            .map(|root| root.join(format!("tmp_{}", args.sorter)))
    });

    let options = SorterOptions {
        output_folder,
        verbose: args.verbose,
        grouping_property: args.grouping_property,
        parallel: args.parallel,
        delete_output_folder: args.delete_output_folder,
    };

    let mut overrides: Vec<(String, Value)> = match &args.params_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            ParamSet::from_toml_str(&content)?.into_iter().collect()
        }
        None => Vec::new(),
    };
    overrides.extend(args.params);

    let registry = init_default_registry(config);
    let sorter = SorterRef::from(args.sorter.as_str());
    let mut lifecycle = registry.build_sorter(&sorter, recording.into_shared(), options)?;
    lifecycle.set_params(overrides)?;
    let partitions = lifecycle.partitions().len();

    info!(
        sorter = %sorter,
        partitions,
        folder = %lifecycle.output_folder().display(),
        "Starting sorter"
    );
    let started_at = Utc::now();
    let elapsed = lifecycle.run().await?;
    let sorting = lifecycle.get_result()?;
    let summary = SortingSummary::from_sorting(sorting.as_ref());

    println!(
        "{}: {} units in {:.2}s",
        sorter,
        summary.num_units,
        elapsed.as_secs_f64()
    );
    for unit in &summary.units {
        let properties: Vec<String> = unit
            .properties
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        println!("  unit {:>4}  {:>8} spikes  {}", unit.unit_id, unit.num_spikes, properties.join(" "));
    }

    if let Some(path) = &args.summary {
        let report = RunReport {
            sorter: sorter.to_string(),
            recording: args.recording.clone(),
            started_at,
            elapsed_secs: elapsed.as_secs_f64(),
            partitions,
            result: summary,
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary {}", path.display()))?;
    }
    Ok(())
}
