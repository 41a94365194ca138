//! Sample sources feeding the feature pipeline.
//!
//! A [`SampleSource`] yields `channels × n` blocks of voltages. Two
//! software sources are provided:
//!
//! - [`SimulatedSampler`]: steady bench tones plus Gaussian noise
//! - [`DroneAudioSimulator`]: a located drone rendered through the array's
//!   geometry (inverse-square amplitude, cardioid microphone response)
//!
//! The drone position comes from a [`DronePositionSource`], either a
//! JSON state file written by `drone-sim` or an in-process shared cell.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ndarray::Array2;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use droneloc_core::config::NodeConfig;
use droneloc_core::geometry::{MicArrayGeometry, Rotation3, Vec3};
use droneloc_core::types::DroneState;

use crate::error::{NodeError, NodeResult};

/// A producer of multi-channel sample blocks.
pub trait SampleSource: Send {
    /// Number of channels in each block.
    fn channels(&self) -> usize;

    /// Sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Read the next `samples` samples per channel.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Sampler`] when no block can be produced.
    fn read_block(&mut self, samples: usize) -> NodeResult<Array2<f32>>;

    /// `true` when the caller must sleep between reads to hold real time.
    ///
    /// Hardware sources block on the converter and return `false`.
    fn needs_pacing(&self) -> bool {
        true
    }
}

fn gaussian(std_dev: f64) -> NodeResult<Normal<f64>> {
    Normal::new(0.0, std_dev.max(0.0)).map_err(|e| NodeError::sampler(e.to_string()))
}

// ---------------------------------------------------------------------------
// Bench tones
// ---------------------------------------------------------------------------

/// Per-channel base frequencies used by [`SimulatedSampler`].
const BENCH_TONES_HZ: [f64; 4] = [110.0, 155.0, 210.0, 180.0];
/// Bench tone amplitude in volts.
const BENCH_AMPLITUDE: f64 = 0.1;

/// Steady tones plus Gaussian noise, for bench testing without hardware.
pub struct SimulatedSampler {
    sample_rate: u32,
    channels: usize,
    noise: Normal<f64>,
    phase: Vec<f64>,
    /// Samples produced so far, drives the slow frequency wobble.
    clock: u64,
    rng: StdRng,
}

impl SimulatedSampler {
    /// Create a sampler seeded from the OS.
    ///
    /// # Errors
    ///
    /// Fails if `noise_level` is not a valid standard deviation.
    pub fn new(sample_rate: u32, channels: usize, noise_level: f64) -> NodeResult<Self> {
        Self::with_rng(sample_rate, channels, noise_level, StdRng::from_entropy())
    }

    /// Create a deterministic sampler for tests.
    ///
    /// # Errors
    ///
    /// Fails if `noise_level` is not a valid standard deviation.
    pub fn with_seed(sample_rate: u32, channels: usize, noise_level: f64, seed: u64) -> NodeResult<Self> {
        Self::with_rng(sample_rate, channels, noise_level, StdRng::seed_from_u64(seed))
    }

    fn with_rng(sample_rate: u32, channels: usize, noise_level: f64, rng: StdRng) -> NodeResult<Self> {
        if sample_rate == 0 {
            return Err(NodeError::sampler("sample rate must be > 0"));
        }
        Ok(Self {
            sample_rate,
            channels,
            noise: gaussian(noise_level)?,
            phase: vec![0.0; channels],
            clock: 0,
            rng,
        })
    }
}

impl SampleSource for SimulatedSampler {
    fn channels(&self) -> usize {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_block(&mut self, samples: usize) -> NodeResult<Array2<f32>> {
        let rate = f64::from(self.sample_rate);
        let elapsed = self.clock as f64 / rate;
        let mut block = Array2::zeros((self.channels, samples));

        for (ch, mut row) in block.rows_mut().into_iter().enumerate() {
            let wobble = 1.0 + 0.05 * (elapsed * 0.1 + ch as f64).sin();
            let freq = BENCH_TONES_HZ[ch % BENCH_TONES_HZ.len()] * wobble;
            let step = std::f64::consts::TAU * freq / rate;
            let start = self.phase[ch];
            for (i, v) in row.iter_mut().enumerate() {
                let tone = BENCH_AMPLITUDE * (start + step * i as f64).sin();
                *v = (tone + self.noise.sample(&mut self.rng)) as f32;
            }
            self.phase[ch] = (start + step * samples as f64) % std::f64::consts::TAU;
        }
        self.clock += samples as u64;
        Ok(block)
    }
}

// ---------------------------------------------------------------------------
// Drone position sources
// ---------------------------------------------------------------------------

/// Supplies the current simulated drone position.
pub trait DronePositionSource: Send {
    /// Current position, `None` when no drone is airborne.
    fn position(&mut self) -> Option<Vec3>;
}

/// Reads [`DroneState`] from a JSON file, re-reading at most every
/// `refresh` interval.
///
/// Missing, empty or half-written files yield `None` (the writer may not
/// have started yet, or may be mid-write).
pub struct FileDronePosition {
    path: PathBuf,
    refresh: Duration,
    cached: Option<(Instant, Vec3)>,
}

impl FileDronePosition {
    /// Default minimum interval between file reads.
    pub const DEFAULT_REFRESH: Duration = Duration::from_millis(50);

    /// Watch `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            refresh: Self::DEFAULT_REFRESH,
            cached: None,
        }
    }

    fn read(&self) -> Option<Vec3> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        let contents = contents.trim();
        if contents.is_empty() {
            return None;
        }
        match serde_json::from_str::<DroneState>(contents) {
            Ok(state) => Some(state.position),
            Err(e) => {
                tracing::trace!(path = %self.path.display(), error = %e, "drone state not readable yet");
                None
            }
        }
    }
}

impl DronePositionSource for FileDronePosition {
    fn position(&mut self) -> Option<Vec3> {
        if let Some((at, pos)) = self.cached {
            if at.elapsed() < self.refresh {
                return Some(pos);
            }
        }
        let pos = self.read()?;
        self.cached = Some((Instant::now(), pos));
        Some(pos)
    }
}

/// In-process position cell, cloned between a controller and samplers.
#[derive(Debug, Clone, Default)]
pub struct SharedDronePosition {
    inner: Arc<RwLock<Option<Vec3>>>,
}

impl SharedDronePosition {
    /// Create an empty cell (no drone).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the drone; `None` removes it.
    pub fn set(&self, position: Option<Vec3>) {
        *self.inner.write() = position;
    }
}

impl DronePositionSource for SharedDronePosition {
    fn position(&mut self) -> Option<Vec3> {
        *self.inner.read()
    }
}

// ---------------------------------------------------------------------------
// Drone audio
// ---------------------------------------------------------------------------

/// Motor harmonics in Hz and their relative amplitudes.
const HARMONICS: [(f64, f64); 5] = [
    (150.0, 1.0),
    (300.0, 0.6),
    (450.0, 0.4),
    (600.0, 0.25),
    (750.0, 0.15),
];
/// Source amplitude in volts at 1 m.
const SOURCE_AMPLITUDE: f64 = 200.0;
/// Distances below this are clamped when computing amplitude.
const MIN_SOURCE_DISTANCE: f64 = 0.5;
/// Aerodynamic broadband noise level relative to the harmonic amplitude.
const BROADBAND_GAIN: f64 = 0.3;
/// Moving-average length applied to the broadband noise.
const BROADBAND_SMOOTHING: usize = 5;

/// Renders a located drone through one node's microphone array.
pub struct DroneAudioSimulator<P> {
    sample_rate: u32,
    node_position: Vec3,
    rotation: Rotation3,
    geometry: MicArrayGeometry,
    positions: P,
    background: Normal<f64>,
    broadband: Normal<f64>,
    /// Phase per channel per harmonic.
    phases: Vec<[f64; HARMONICS.len()]>,
    clock: u64,
    rng: StdRng,
}

impl<P: DronePositionSource> DroneAudioSimulator<P> {
    /// Create a simulator for a node placed at `node_position` with the
    /// given orientation.
    ///
    /// # Errors
    ///
    /// Fails if `noise_level` is not a valid standard deviation.
    pub fn new(
        sample_rate: u32,
        geometry: MicArrayGeometry,
        node_position: Vec3,
        rotation: Rotation3,
        positions: P,
        noise_level: f64,
    ) -> NodeResult<Self> {
        if sample_rate == 0 {
            return Err(NodeError::sampler("sample rate must be > 0"));
        }
        let channels = geometry.channels();
        tracing::info!(
            node = ?node_position,
            channels,
            "drone audio simulator initialised"
        );
        Ok(Self {
            sample_rate,
            node_position,
            rotation,
            geometry,
            positions,
            background: gaussian(noise_level)?,
            broadband: gaussian(0.1)?,
            phases: vec![[0.0; HARMONICS.len()]; channels],
            clock: 0,
            rng: StdRng::from_entropy(),
        })
    }

    /// Replace the random generator for reproducible output.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn render_drone(&mut self, channel: usize, drone: Vec3, out: &mut [f64]) {
        let mic_local = self.geometry.positions()[channel];
        let mic = self.node_position + self.rotation.apply(&mic_local);
        let to_drone = drone - mic;
        let distance = to_drone.norm();
        let bearing = to_drone.normalized().unwrap_or(Vec3::UP);

        let d = distance.max(MIN_SOURCE_DISTANCE);
        let amplitude = SOURCE_AMPLITUDE / (d * d);

        let pointing = self.rotation.apply(&self.geometry.vectors()[channel]);
        let gain = 0.5 + 0.5 * pointing.dot(&bearing).clamp(-1.0, 1.0);

        let rate = f64::from(self.sample_rate);
        let elapsed = self.clock as f64 / rate;
        for (h, (base_hz, rel)) in HARMONICS.iter().enumerate() {
            let hz = base_hz * (1.0 + 0.03 * (elapsed * 2.0 + h as f64).sin());
            let step = std::f64::consts::TAU * hz / rate;
            let start = self.phases[channel][h];
            for (i, v) in out.iter_mut().enumerate() {
                *v += rel * amplitude * (start + step * i as f64).sin();
            }
            self.phases[channel][h] = (start + step * out.len() as f64) % std::f64::consts::TAU;
        }

        let raw: Vec<f64> = (0..out.len())
            .map(|_| self.broadband.sample(&mut self.rng))
            .collect();
        let half = BROADBAND_SMOOTHING / 2;
        for (i, v) in out.iter_mut().enumerate() {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(raw.len());
            let smoothed: f64 = raw[lo..hi].iter().sum::<f64>() / BROADBAND_SMOOTHING as f64;
            *v += smoothed * amplitude * BROADBAND_GAIN;
        }

        for v in out.iter_mut() {
            *v *= gain;
        }
    }
}

impl<P: DronePositionSource> SampleSource for DroneAudioSimulator<P> {
    fn channels(&self) -> usize {
        self.geometry.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_block(&mut self, samples: usize) -> NodeResult<Array2<f32>> {
        let drone = self.positions.position();
        let channels = self.geometry.channels();
        let mut block = Array2::zeros((channels, samples));
        let mut scratch = vec![0.0_f64; samples];

        for ch in 0..channels {
            scratch.iter_mut().for_each(|v| *v = 0.0);
            if let Some(drone) = drone {
                self.render_drone(ch, drone, &mut scratch);
            }
            for (dst, s) in block.row_mut(ch).iter_mut().zip(&scratch) {
                *dst = (s + self.background.sample(&mut self.rng)) as f32;
            }
        }
        self.clock += samples as u64;
        Ok(block)
    }
}

/// Pick the sample source for a node configuration.
///
/// With the simulator enabled and a drone state file configured the node
/// hears the simulated drone; otherwise it gets bench tones. No ADC driver
/// is linked into this build, so a non-simulated config falls back to bench
/// tones with a warning.
///
/// # Errors
///
/// Fails on invalid geometry or noise settings.
pub fn source_for_config(cfg: &NodeConfig) -> NodeResult<Box<dyn SampleSource>> {
    let channels = cfg.channels();
    let rate = cfg.sampling.sample_rate;
    let noise = cfg.simulator.noise_level;

    if !cfg.simulator.enabled {
        tracing::warn!("hardware sampler unavailable, falling back to simulated sampler");
        if let Some(path) = &cfg.simulator.drone_state_file {
            tracing::warn!(path = %path.display(), "simulator disabled, ignoring drone state file");
        }
    }
    match cfg.simulator.drone_state_file.as_ref().filter(|_| cfg.simulator.enabled) {
        Some(path) => {
            tracing::info!(path = %path.display(), "using drone audio simulator");
            let sim = DroneAudioSimulator::new(
                rate,
                cfg.geometry()?,
                cfg.global_position,
                cfg.orientation.to_rotation(),
                FileDronePosition::new(path.clone()),
                noise,
            )?;
            Ok(Box::new(sim))
        }
        None => {
            tracing::info!(channels, "using simulated sampler");
            Ok(Box::new(SimulatedSampler::new(rate, channels, noise)?))
        }
    }
}
