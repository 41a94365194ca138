//! Microphone node agent.
//!
//! Samples the array, extracts features and streams frames to the fusion
//! server over UDP.
//!
//! Usage:
//!   cargo run -p droneloc-node --bin node-agent -- --config configs/node-1.json run
//!   cargo run -p droneloc-node --bin node-agent -- --config configs/node-1.json calibrate --duration 30

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use droneloc_core::NodeConfig;
use droneloc_node::agent::{calibrate, collect_samples, Capture};
use droneloc_node::{source_for_config, NodeAgent, UdpFrameSink};

/// Acoustic drone localization node.
#[derive(Parser, Debug)]
#[command(name = "node-agent", version, about = "Acoustic feature node for drone localization")]
struct Cli {
    /// Path to the node configuration (JSON).
    #[arg(long, default_value = "configs/node-1.json")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the node agent (default).
    Run {
        /// Stop after this many seconds instead of running forever.
        #[arg(long)]
        duration: Option<f64>,
    },
    /// Measure ambient noise and store it in the config file.
    Calibrate {
        /// Seconds to record.
        #[arg(long, default_value = "60")]
        duration: f64,
    },
    /// Record raw samples to a JSON file.
    Capture {
        /// Seconds to record.
        #[arg(long, default_value = "10")]
        duration: f64,
        /// Output file (defaults to `capture-node<ID>.json`).
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn seconds(value: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("invalid duration {value}"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = NodeConfig::from_json(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    match cli.command.unwrap_or(Command::Run { duration: None }) {
        Command::Run { duration } => {
            let agent = NodeAgent::new(&config)?;
            let sink = UdpFrameSink::connect(&config.fusion_endpoint())?;
            info!(endpoint = %sink.endpoint(), node_id = config.node_id, "streaming to fusion server");

            if let Some(secs) = duration {
                let limit = seconds(secs)?;
                let handle = agent.shutdown_handle();
                thread::spawn(move || {
                    thread::sleep(limit);
                    handle.trigger();
                });
            }
            let source = source_for_config(&config)?;
            let stats = agent.run(source, sink)?;
            info!(?stats, "done");
        }
        Command::Calibrate { duration } => {
            info!(seconds = duration, "starting calibration");
            let mut source = source_for_config(&config)?;
            let levels = calibrate(source.as_mut(), seconds(duration)?, config.sampling.block_samples)?;
            config.calibration_noise_rms = Some(levels.clone());
            config.to_json(&cli.config)?;
            info!(?levels, path = %cli.config.display(), "updated calibration noise rms");
        }
        Command::Capture { duration, output } => {
            info!(seconds = duration, "capturing raw samples");
            let mut source = source_for_config(&config)?;
            let samples = collect_samples(source.as_mut(), seconds(duration)?, config.sampling.block_samples)?;
            let out = output.unwrap_or_else(|| PathBuf::from(format!("capture-node{}.json", config.node_id)));
            Capture::new(config.node_id, config.sampling.sample_rate, &samples).write(&out)?;
            info!(path = %out.display(), samples = samples.ncols(), "saved capture");
        }
    }
    Ok(())
}
