//! Sliding-window feature extraction.
//!
//! [`FeatureExtractor`] owns the per-node detection pipeline. Sample blocks
//! are appended to a rolling window; every `hop` samples one
//! [`FeatureFrame`] is produced from the full window:
//!
//! ```text
//! block ─► window ─► rms/peak/bandpower ─► noise floor ─► presence
//!                                             │
//!                                             └─► direction ─► FeatureFrame
//! ```

use chrono::{DateTime, Utc};
use ndarray::{ArrayView1, ArrayView2, Axis};

use droneloc_core::config::{DetectionConfig, SamplingConfig};
use droneloc_core::geometry::MicArrayGeometry;
use droneloc_core::types::{FeatureFrame, NodeId};

use crate::direction::DirectionEstimator;
use crate::noise::NoiseFloorTracker;
use crate::presence::{PresenceDetector, PresenceState};
use crate::window::SampleWindow;

/// Guard added to RMS before dividing the peak by it.
const CREST_EPSILON: f64 = 1e-6;

/// Root-mean-square of one channel.
#[must_use]
pub fn rms(samples: ArrayView1<'_, f32>) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Largest absolute sample of one channel.
#[must_use]
pub fn peak(samples: ArrayView1<'_, f32>) -> f64 {
    samples
        .iter()
        .fold(0.0_f64, |acc, &s| acc.max(f64::from(s).abs()))
}

/// Single-bin DFT magnitude at `target_hz`, normalised by length.
///
/// The target is rounded to the nearest bin of a `samples.len()`-point DFT.
#[must_use]
pub fn goertzel(samples: ArrayView1<'_, f32>, target_hz: f64, sample_rate: f64) -> f64 {
    let n = samples.len();
    if n == 0 || sample_rate <= 0.0 {
        return 0.0;
    }
    let k = (0.5 + n as f64 * target_hz / sample_rate).floor();
    let omega = 2.0 * std::f64::consts::PI * k / n as f64;
    let (sine, cosine) = omega.sin_cos();
    let coeff = 2.0 * cosine;

    let (mut q1, mut q2) = (0.0_f64, 0.0_f64);
    for &s in samples {
        let q0 = coeff * q1 - q2 + f64::from(s);
        q2 = q1;
        q1 = q0;
    }
    let real = q1 - q2 * cosine;
    let imag = q2 * sine;
    (real * real + imag * imag).sqrt() / n as f64
}

/// Per-node feature pipeline.
#[derive(Debug)]
pub struct FeatureExtractor {
    node_id: NodeId,
    sample_rate: f64,
    hop: usize,
    window: SampleWindow,
    /// Samples received since the last emitted frame.
    pending: usize,
    next_sequence: u64,
    noise: NoiseFloorTracker,
    presence: PresenceDetector,
    direction: DirectionEstimator,
    band_frequencies: Vec<f64>,
    /// Presence of the previous frame; gates the floor update.
    last_present: bool,
}

impl FeatureExtractor {
    /// Build an extractor for one node.
    ///
    /// `initial_noise` seeds the floor (calibration values or the default
    /// level); it is resized to the geometry's channel count.
    #[must_use]
    pub fn new(
        node_id: NodeId,
        geometry: MicArrayGeometry,
        sampling: &SamplingConfig,
        detection: &DetectionConfig,
        initial_noise: Vec<f64>,
    ) -> Self {
        let channels = geometry.channels();
        let mut initial_noise = initial_noise;
        initial_noise.resize(channels, detection.initial_noise_rms);

        Self {
            node_id,
            sample_rate: f64::from(sampling.sample_rate),
            hop: sampling.hop_samples(),
            window: SampleWindow::new(channels, sampling.window_samples()),
            pending: 0,
            next_sequence: 0,
            noise: NoiseFloorTracker::new(initial_noise, detection.noise_alpha),
            presence: PresenceDetector::new(
                detection.k_on,
                detection.k_off,
                detection.min_hold_frames,
            ),
            direction: DirectionEstimator::new(geometry),
            band_frequencies: detection.band_frequencies_hz.clone(),
            last_present: false,
        }
    }

    /// Append a `channels × n` block and return every frame it completes.
    ///
    /// All frames produced by one call carry `captured_at`.
    pub fn push(&mut self, block: ArrayView2<'_, f32>, captured_at: DateTime<Utc>) -> Vec<FeatureFrame> {
        self.window.append(block);
        self.pending += block.ncols();

        let mut frames = Vec::new();
        while self.pending >= self.hop {
            self.pending -= self.hop;
            if let Some(frame) = self.emit(captured_at) {
                frames.push(frame);
            }
        }
        frames
    }

    fn emit(&mut self, timestamp: DateTime<Utc>) -> Option<FeatureFrame> {
        if self.window.is_empty() {
            return None;
        }
        let window = self.window.snapshot();

        let mic_rms: Vec<f64> = window.axis_iter(Axis(0)).map(rms).collect();
        let crest: Vec<f64> = window
            .axis_iter(Axis(0))
            .zip(&mic_rms)
            .map(|(ch, r)| peak(ch) / (r + CREST_EPSILON))
            .collect();
        let bandpower: Vec<f64> = self
            .band_frequencies
            .iter()
            .map(|&hz| goertzel(window.row(0), hz, self.sample_rate))
            .collect();
        let total_energy: f64 = mic_rms.iter().sum();

        // The frame carries the floor it was judged against.
        let noise_rms = self.noise.level().to_vec();
        let net_energy = self.noise.net_energy(&mic_rms);
        let signal: f64 = net_energy.iter().sum();
        let state = self.presence.update(signal, self.noise.aggregate());
        self.noise.update(&mic_rms, self.last_present);
        let present = state == PresenceState::Present;
        self.last_present = present;

        let dir = self.direction.estimate(&net_energy);
        let sequence = self.take_sequence();

        Some(FeatureFrame {
            node_id: self.node_id,
            sequence,
            timestamp,
            mic_rms,
            noise_rms,
            net_energy,
            crest,
            bandpower,
            total_energy,
            present,
            direction_local: dir.direction,
            direction_confidence: dir.confidence,
            heartbeat: false,
        })
    }

    /// Keep-alive frame with the current floor and the next sequence number.
    pub fn heartbeat(&mut self, now: DateTime<Utc>) -> FeatureFrame {
        let sequence = self.take_sequence();
        FeatureFrame::heartbeat(self.node_id, sequence, now, self.noise.level().to_vec())
    }

    fn take_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    /// Replace the noise floor (e.g. with freshly calibrated levels).
    pub fn set_noise_floor(&mut self, level: Vec<f64>) {
        self.noise.reset(level);
    }

    /// Current noise floor per channel.
    #[must_use]
    pub fn noise_floor(&self) -> &[f64] {
        self.noise.level()
    }

    /// Current presence state.
    #[must_use]
    pub fn presence(&self) -> PresenceState {
        self.presence.state()
    }

    /// Samples per channel between frames.
    #[must_use]
    pub fn hop(&self) -> usize {
        self.hop
    }

    /// Node this extractor belongs to.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(
            7,
            MicArrayGeometry::triangle(),
            &SamplingConfig::default(),
            &DetectionConfig::default(),
            vec![0.05; 3],
        )
    }

    fn tone(channels: usize, n: usize, amps: &[f32], hz: f32, rate: f32) -> Array2<f32> {
        Array2::from_shape_fn((channels, n), |(c, i)| {
            amps[c] * (2.0 * std::f32::consts::PI * hz * i as f32 / rate).sin()
        })
    }

    #[test]
    fn rms_of_constant() {
        let x = Array1::from_elem(10, -2.0_f32);
        assert_abs_diff_eq!(rms(x.view()), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(peak(x.view()), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn goertzel_picks_target_bin() {
        let rate = 860.0;
        let x = tone(1, 860, &[1.0], 120.0, rate);
        let on = goertzel(x.row(0), 120.0, f64::from(rate));
        let off = goertzel(x.row(0), 240.0, f64::from(rate));
        assert!(on > 0.4, "on-bin magnitude {on}");
        assert!(off < 0.05, "off-bin magnitude {off}");
    }

    #[test]
    fn emits_one_frame_per_hop() {
        let mut fx = extractor();
        let hop = fx.hop();
        let block = Array2::<f32>::zeros((3, hop * 3 + 5));
        let frames = fx.push(block.view(), Utc::now());
        assert_eq!(frames.len(), 3);
        let seqs: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        let more = fx.push(Array2::<f32>::zeros((3, hop - 5)).view(), Utc::now());
        assert_eq!(more.len(), 1);
        assert_eq!(more[0].sequence, 3);
    }

    #[test]
    fn loud_source_latches_and_points_at_loud_mic() {
        let mut fx = extractor();
        let block = tone(3, 256, &[2.0, 0.1, 0.1], 150.0, 860.0);
        let mut frames = Vec::new();
        for _ in 0..20 {
            frames.extend(fx.push(block.view(), Utc::now()));
        }
        let frame = frames.last().expect("frames emitted");
        let prev = &frames[frames.len() - 2];
        assert!(frame.present && prev.present);
        let dir = frame.direction_local.expect("direction");
        assert!(dir.x > 0.9, "direction {dir:?}");
        assert_eq!(frame.noise_rms, prev.noise_rms, "floor must stay frozen while present");
        assert!(frame.crest.iter().all(|c| *c > 1.0));
        assert_eq!(frame.bandpower.len(), 2);
    }

    #[test]
    fn quiet_input_stays_absent_and_tracks_floor() {
        let mut fx = extractor();
        let block = tone(3, 860, &[0.01, 0.01, 0.01], 50.0, 860.0);
        let mut frames = Vec::new();
        for _ in 0..5 {
            frames.extend(fx.push(block.view(), Utc::now()));
        }
        assert!(frames.iter().all(|f| !f.present));
        assert!(fx.noise_floor()[0] < 0.05);
    }

    #[test]
    fn net_energy_matches_reported_floor() {
        let mut fx = extractor();
        let hop = fx.hop();
        let quiet = Array2::from_elem((3, hop), 0.08_f32);
        let loud = tone(3, hop, &[2.0, 0.1, 0.1], 150.0, 860.0);

        let mut frames = fx.push(quiet.view(), Utc::now());
        for _ in 0..4 {
            frames.extend(fx.push(loud.view(), Utc::now()));
        }
        assert!(frames.iter().any(|f| f.present));
        assert!(frames.iter().any(|f| !f.present));
        for f in &frames {
            assert_eq!(f.net_energy, droneloc_core::types::net_energy(&f.mic_rms, &f.noise_rms));
        }
        // The first frame was judged against the seeded floor.
        assert_eq!(frames[0].noise_rms, vec![0.05; 3]);
    }

    #[test]
    fn heartbeat_shares_sequence_counter() {
        let mut fx = extractor();
        let hb = fx.heartbeat(Utc::now());
        assert!(hb.heartbeat);
        assert_eq!(hb.sequence, 0);
        let hop = fx.hop();
        let frames = fx.push(Array2::<f32>::zeros((3, hop)).view(), Utc::now());
        assert_eq!(frames[0].sequence, 1);
    }
}
