//! Records exchanged between nodes, the fusion server and its consumers.
//!
//! - [`FeatureFrame`]: one per node per hop, immutable once emitted
//! - [`FusionEstimate`]: one per fusion cycle
//! - [`NodeSummary`]: health view of one configured node
//! - [`DroneState`]: simulated source position

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::NoFixReason;
use crate::geometry::Vec3;

/// Identifier of a configured node.
pub type NodeId = u32;

/// Per-node acoustic features for one analysis hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrame {
    /// Emitting node.
    pub node_id: NodeId,
    /// Strictly increasing per node.
    pub sequence: u64,
    /// Capture time on the node's clock.
    pub timestamp: DateTime<Utc>,
    /// Windowed RMS per microphone (>= 0).
    pub mic_rms: Vec<f64>,
    /// Adaptive noise floor per microphone (>= 0).
    pub noise_rms: Vec<f64>,
    /// `max(mic_rms - noise_rms, 0)` per microphone.
    pub net_energy: Vec<f64>,
    /// Peak-to-RMS ratio per microphone.
    pub crest: Vec<f64>,
    /// Band power on channel 0 at the tracked frequencies.
    pub bandpower: Vec<f64>,
    /// Sum of `mic_rms`.
    pub total_energy: f64,
    /// Source detected on this hop.
    pub present: bool,
    /// Unit direction toward the source in the node frame, if any energy.
    pub direction_local: Option<Vec3>,
    /// Saturating direction confidence in `[0, 1]`.
    pub direction_confidence: f64,
    /// Keep-alive frame emitted while the pipeline produced nothing.
    #[serde(default)]
    pub heartbeat: bool,
}

impl FeatureFrame {
    /// Build a keep-alive frame carrying only the current noise floor.
    #[must_use]
    pub fn heartbeat(
        node_id: NodeId,
        sequence: u64,
        timestamp: DateTime<Utc>,
        noise_rms: Vec<f64>,
    ) -> Self {
        let n = noise_rms.len();
        Self {
            node_id,
            sequence,
            timestamp,
            mic_rms: vec![0.0; n],
            noise_rms,
            net_energy: vec![0.0; n],
            crest: vec![0.0; n],
            bandpower: vec![0.0; 2],
            total_energy: 0.0,
            present: false,
            direction_local: None,
            direction_confidence: 0.0,
            heartbeat: true,
        }
    }

    /// Node-level energy `E_n = Σ net_energy`.
    #[must_use]
    pub fn total_net_energy(&self) -> f64 {
        self.net_energy.iter().map(|e| e.max(0.0)).sum()
    }

    /// Number of microphone channels carried.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.mic_rms.len()
    }
}

/// Compute `max(rms - noise, 0)` element-wise.
#[must_use]
pub fn net_energy(mic_rms: &[f64], noise_rms: &[f64]) -> Vec<f64> {
    mic_rms
        .iter()
        .zip(noise_rms)
        .map(|(r, n)| (r - n).max(0.0))
        .collect()
}

/// Per-node contribution to a fusion cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDetail {
    /// Node id.
    pub node_id: NodeId,
    /// Normalised energy share `ê_n` (0 when not participating).
    pub energy: f64,
    /// Direction in the global frame, if the node reported one.
    pub direction: Option<Vec3>,
    /// Online at the time of the cycle.
    pub online: bool,
    /// Participated in the solve.
    pub participating: bool,
}

/// Result of one fusion cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionEstimate {
    /// Time the cycle ran (receiving clock).
    pub timestamp: DateTime<Utc>,
    /// A position was computed.
    pub present: bool,
    /// Smoothed position in meters, only when `present`.
    pub position: Option<Vec3>,
    /// Smoothed velocity in m/s, only when `present`.
    pub velocity: Option<Vec3>,
    /// `1 / (1 + err)` scaled by participation, in `[0, 1]`.
    pub confidence: f64,
    /// Residual of the best candidate (non-negative).
    pub error: f64,
    /// Why no position was produced.
    pub no_fix: Option<NoFixReason>,
    /// One entry per configured node.
    pub per_node_detail: Vec<NodeDetail>,
}

impl FusionEstimate {
    /// A cycle that produced no position.
    #[must_use]
    pub fn no_fix(
        timestamp: DateTime<Utc>,
        reason: NoFixReason,
        per_node_detail: Vec<NodeDetail>,
    ) -> Self {
        Self {
            timestamp,
            present: false,
            position: None,
            velocity: None,
            confidence: 0.0,
            error: 0.0,
            no_fix: Some(reason),
            per_node_detail,
        }
    }

    /// Initial value before the first cycle has run.
    #[must_use]
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            present: false,
            position: None,
            velocity: None,
            confidence: 0.0,
            error: 0.0,
            no_fix: None,
            per_node_detail: Vec::new(),
        }
    }
}

/// Health view of a configured node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    /// Node id.
    pub node_id: NodeId,
    /// Global position from configuration.
    pub position: Vec3,
    /// Derived liveness.
    pub online: bool,
    /// Last accepted frame arrival, receiving clock.
    pub last_seen: Option<DateTime<Utc>>,
    /// Latest frame reported a source.
    pub present: bool,
    /// Latest `Σ net_energy`.
    pub energy: f64,
    /// Latest local direction.
    pub direction_local: Option<Vec3>,
    /// Latest direction confidence.
    pub direction_confidence: f64,
    /// Last accepted sequence.
    pub last_sequence: Option<u64>,
    /// Frames accepted.
    pub frames_accepted: u64,
    /// Frames rejected (any reason).
    pub frames_rejected: u64,
    /// Frames missing from sequence gaps.
    pub frames_dropped: u64,
}

/// Simulated drone position shared between the trajectory generator and
/// simulated node samplers through a small JSON file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DroneState {
    /// Global position in meters.
    pub position: Vec3,
    /// When the position was written.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_energy_clamps_at_zero() {
        let net = net_energy(&[1.0, 0.2, 0.5], &[0.5, 0.4, 0.5]);
        assert_eq!(net, vec![0.5, 0.0, 0.0]);
    }

    #[test]
    fn heartbeat_frame_is_silent() {
        let f = FeatureFrame::heartbeat(3, 7, Utc::now(), vec![0.05; 4]);
        assert!(f.heartbeat);
        assert!(!f.present);
        assert_eq!(f.channels(), 4);
        assert_eq!(f.total_net_energy(), 0.0);
        assert!(f.direction_local.is_none());
    }

    #[test]
    fn drone_state_uses_array_position() {
        let state = DroneState {
            position: Vec3::new(1.0, 2.0, 3.0),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(state).unwrap();
        assert_eq!(json["position"], serde_json::json!([1.0, 2.0, 3.0]));
    }

    #[test]
    fn no_fix_estimate_has_no_position() {
        let e = FusionEstimate::no_fix(Utc::now(), NoFixReason::DegenerateGeometry, vec![]);
        assert!(!e.present);
        assert!(e.position.is_none());
        assert_eq!(e.confidence, 0.0);
    }
}
