//! zigtopo - Zigbee mesh topology from ZHA exports
//!
//! Loads an exporter snapshot, infers the mesh topology and writes it as JSON
//! for the visualization layer.

mod config;
mod run;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use zigtopo_core::TopologyError;

#[derive(Parser, Debug)]
#[command(name = "zigtopo")]
#[command(about = "Infer Zigbee mesh topology from ZHA exports")]
#[command(version)]
struct Args {
    /// Export file to analyze (defaults to the newest export in the data directory)
    input: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, default_value = "zigtopo.toml")]
    config: PathBuf,

    /// Directory holding exporter output
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Where to write the topology JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Print a network summary after each run
    #[arg(long)]
    summary: bool,

    /// Keep running and re-analyze whenever a newer export appears
    #[arg(long)]
    watch: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.downcast_ref::<TopologyError>().is_some() => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!("zigtopo v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Command line overrides
    if let Some(dir) = args.data_dir {
        config.data.dir = dir;
    }
    if let Some(output) = args.output {
        config.output.path = Some(output);
    }

    info!(
        data_dir = %config.data.dir.display(),
        output = %config.output_path().display(),
        "Configuration loaded"
    );

    if args.watch {
        return run::watch(config, args.input, args.summary).await;
    }

    let input = run::resolve_input(&config, args.input.as_deref())?;
    let outcome = run::run_once(&config, &input)?;
    if args.summary {
        println!("{}", outcome.summary);
    }
    println!("Topology written to {}", outcome.output.display());
    Ok(())
}
