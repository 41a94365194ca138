//! Synthetic feature frames for a source at a known position.
//!
//! Each node sees `power / max(d, 0.5)²` with multiplicative Gaussian
//! noise, split over a three-microphone horizontal array by a cardioid
//! response. The bearing is expressed in the node's local frame.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use droneloc_core::config::NodePlacement;
use droneloc_core::geometry::{MicArrayGeometry, Rotation3, Vec3};
use droneloc_core::types::{net_energy, FeatureFrame, NodeId};

use crate::error::{SimError, SimResult};

/// Distance clamp for the inverse-square law, meters.
const MIN_DISTANCE: f64 = 0.5;
/// Distance at which bearing confidence bottoms out, meters.
const CONFIDENCE_RANGE: f64 = 25.0;
/// Floor on bearing confidence.
const MIN_CONFIDENCE: f64 = 0.3;
/// Floor on the multiplicative energy noise factor.
const MIN_NOISE_FACTOR: f64 = 0.5;

/// Generator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthConfig {
    /// Source power scaling the inverse-square energy.
    pub source_power: f64,
    /// Standard deviation of the multiplicative energy noise.
    pub energy_noise: f64,
    /// Noise floor reported by every channel.
    pub noise_rms: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            source_power: 10.0,
            energy_noise: 0.1,
            noise_rms: 0.05,
        }
    }
}

#[derive(Debug, Clone)]
struct SimNode {
    placement: NodePlacement,
    to_local: Rotation3,
    sequence: u64,
}

/// Produces one [`FeatureFrame`] per configured node for a source position.
#[derive(Debug, Clone)]
pub struct FrameSynthesizer {
    nodes: Vec<SimNode>,
    mics: MicArrayGeometry,
    config: SynthConfig,
    noise: Normal<f64>,
    rng: StdRng,
}

impl FrameSynthesizer {
    /// Create a generator for `nodes`.
    ///
    /// # Errors
    ///
    /// Returns [`SimError::InvalidParameter`] for a negative or non-finite
    /// power or noise level.
    pub fn new(nodes: &[NodePlacement], config: SynthConfig) -> SimResult<Self> {
        Self::with_rng(nodes, config, StdRng::from_entropy())
    }

    /// Deterministic generator for tests.
    ///
    /// # Errors
    ///
    /// Same as [`FrameSynthesizer::new`].
    pub fn with_seed(nodes: &[NodePlacement], config: SynthConfig, seed: u64) -> SimResult<Self> {
        Self::with_rng(nodes, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(nodes: &[NodePlacement], config: SynthConfig, rng: StdRng) -> SimResult<Self> {
        for (name, value) in [
            ("source_power", config.source_power),
            ("energy_noise", config.energy_noise),
            ("noise_rms", config.noise_rms),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SimError::invalid(name, format!("must be >= 0, got {value}")));
            }
        }
        let noise = Normal::new(1.0, config.energy_noise)
            .map_err(|e| SimError::invalid("energy_noise", e.to_string()))?;
        let nodes = nodes
            .iter()
            .map(|p| SimNode {
                placement: p.clone(),
                to_local: p.orientation.to_rotation().inverse(),
                sequence: 0,
            })
            .collect();
        Ok(Self {
            nodes,
            mics: MicArrayGeometry::triangle(),
            config,
            noise,
            rng,
        })
    }

    /// One frame per node for a source at `source`, stamped `timestamp`.
    pub fn frames_at(&mut self, source: Vec3, timestamp: DateTime<Utc>) -> Vec<FeatureFrame> {
        let mut frames = Vec::with_capacity(self.nodes.len());
        for idx in 0..self.nodes.len() {
            frames.push(self.frame_for(idx, source, timestamp));
        }
        frames
    }

    /// Quiet heartbeat frames from every node.
    pub fn silence(&mut self, timestamp: DateTime<Utc>) -> Vec<FeatureFrame> {
        let noise = vec![self.config.noise_rms; self.mics.channels()];
        self.nodes
            .iter_mut()
            .map(|node| {
                node.sequence += 1;
                FeatureFrame::heartbeat(node.placement.node_id, node.sequence, timestamp, noise.clone())
            })
            .collect()
    }

    /// Last sequence number issued per node.
    pub fn sequences(&self) -> HashMap<NodeId, u64> {
        self.nodes
            .iter()
            .map(|n| (n.placement.node_id, n.sequence))
            .collect()
    }

    fn frame_for(&mut self, idx: usize, source: Vec3, timestamp: DateTime<Utc>) -> FeatureFrame {
        let factor = self.noise.sample(&mut self.rng).max(MIN_NOISE_FACTOR);
        let node = &mut self.nodes[idx];
        node.sequence += 1;

        let offset = source - node.placement.position;
        let distance = offset.norm();
        let clamped = distance.max(MIN_DISTANCE);
        let energy = self.config.source_power / (clamped * clamped) * factor;
        let direction_local = node
            .to_local
            .apply(&offset)
            .normalized()
            .unwrap_or(Vec3::UP);

        let noise_rms = vec![self.config.noise_rms; self.mics.channels()];
        let mic_rms: Vec<f64> = self
            .mics
            .vectors()
            .iter()
            .map(|mic| {
                let gain = (0.5 + 0.5 * direction_local.dot(mic)).max(0.0);
                let jitter: f64 = self.rng.gen_range(0.8..1.2);
                energy * gain * jitter + self.config.noise_rms
            })
            .collect();
        let crest = mic_rms
            .iter()
            .zip(&noise_rms)
            .map(|(r, n)| if *n > 0.0 { r / n } else { 0.0 })
            .collect();
        let bandpower = vec![mic_rms[0] * 0.8, mic_rms[0] * 0.6];
        let confidence = (1.0 - distance / CONFIDENCE_RANGE).max(MIN_CONFIDENCE);

        FeatureFrame {
            node_id: node.placement.node_id,
            sequence: node.sequence,
            timestamp,
            net_energy: net_energy(&mic_rms, &noise_rms),
            total_energy: mic_rms.iter().sum(),
            mic_rms,
            noise_rms,
            crest,
            bandpower,
            present: true,
            direction_local: Some(direction_local),
            direction_confidence: confidence,
            heartbeat: false,
        }
    }
}
