//! Simulated drone.
//!
//! Flies a pattern and either streams synthetic feature frames straight to
//! the fusion server, or only publishes the drone position for node agents
//! running their simulated samplers.
//!
//! Usage:
//!   cargo run -p droneloc-sim --bin drone-sim -- --config configs/server.json --pattern circle
//!   cargo run -p droneloc-sim --bin drone-sim -- --state-file /tmp/drone_sim_state.json --position-only

use std::net::UdpSocket;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use droneloc_core::packet;
use droneloc_core::ServerConfig;
use droneloc_sim::{write_drone_state, FrameSynthesizer, Pattern, SynthConfig, Trajectory};

/// Drone trajectory and feature-frame simulator.
#[derive(Parser, Debug)]
#[command(name = "drone-sim", version, about = "Simulated drone for the localization pipeline")]
struct Cli {
    /// Server configuration providing node placements and the UDP endpoint.
    #[arg(long, default_value = "configs/server.json")]
    config: PathBuf,

    /// Fusion server host to send frames to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Movement pattern: circle, line, hover, figure8 or diagonal.
    #[arg(long, default_value = "circle")]
    pattern: Pattern,

    /// Speed in m/s.
    #[arg(long, default_value = "2.0")]
    speed: f64,

    /// Flight height in meters.
    #[arg(long, default_value = "5.0")]
    height: f64,

    /// Pattern radius in meters.
    #[arg(long, default_value = "8.0")]
    radius: f64,

    /// Source power scaling the synthetic energies.
    #[arg(long, default_value = "10.0")]
    source_power: f64,

    /// Updates per second.
    #[arg(long, default_value = "10.0")]
    rate: f64,

    /// Stop after this many seconds.
    #[arg(long)]
    duration: Option<f64>,

    /// Also write the drone position here on every update.
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Only write the state file; send no frames.
    #[arg(long, requires = "state_file")]
    position_only: bool,

    /// Enable debug logging.
    #[arg(long, short)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if !(cli.rate.is_finite() && cli.rate > 0.0) {
        anyhow::bail!("--rate must be positive, got {}", cli.rate);
    }
    let config = if cli.config.exists() {
        ServerConfig::from_json(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        warn!(path = %cli.config.display(), "config file not found, using default node layout");
        ServerConfig::default()
    };

    let trajectory = Trajectory::new(cli.pattern, cli.speed, cli.radius, cli.height)?;
    let mut synth = FrameSynthesizer::new(
        &config.nodes,
        SynthConfig {
            source_power: cli.source_power,
            ..SynthConfig::default()
        },
    )?;
    let endpoint = format!("{}:{}", cli.host, config.listen_port);
    let socket = UdpSocket::bind("0.0.0.0:0").context("binding UDP socket")?;

    info!(
        pattern = %cli.pattern,
        speed = cli.speed,
        height = cli.height,
        radius = cli.radius,
        rate_hz = cli.rate,
        nodes = config.nodes.len(),
        "starting drone simulation"
    );
    if !cli.position_only {
        info!("sending frames to {endpoint}");
    }

    let period = Duration::from_secs_f64(1.0 / cli.rate);
    let started = Instant::now();
    let mut next = started;
    let mut sent = 0u64;
    let mut last_report = started;

    loop {
        let elapsed = started.elapsed().as_secs_f64();
        if cli.duration.is_some_and(|d| elapsed >= d) {
            break;
        }
        let now = Utc::now();
        let position = trajectory.position_at(elapsed);

        if let Some(path) = &cli.state_file {
            if let Err(e) = write_drone_state(path, position, now) {
                warn!("{e}");
            }
        }

        if !cli.position_only {
            for frame in synth.frames_at(position, now) {
                match socket.send_to(&packet::encode(&frame), &endpoint) {
                    Ok(_) => sent += 1,
                    Err(e) => warn!(node_id = frame.node_id, "send failed: {e}"),
                }
            }
        }
        debug!(x = position.x, y = position.y, z = position.z, "drone position");
        if last_report.elapsed() >= Duration::from_secs(5) {
            info!(x = position.x, y = position.y, z = position.z, sent, "drone at");
            last_report = Instant::now();
        }

        next += period;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    info!(sent, "drone simulation finished");
    Ok(())
}
