//! Node and server configuration.
//!
//! [`NodeConfig`] describes one microphone node (identity, array geometry,
//! sampling cadence, detection thresholds). [`ServerConfig`] describes the
//! fusion server (listen addresses, node positions, search volume, solver
//! weights, liveness bounds). Both are serializable via [`serde`] so they
//! can be stored to / restored from JSON files, and both expose
//! `validate()` which is run on every load.
//!
//! # Example
//!
//! ```rust
//! use droneloc_core::config::ServerConfig;
//!
//! let cfg = ServerConfig::default();
//! cfg.validate().expect("default config is valid");
//! assert_eq!(cfg.nodes.len(), 3);
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geometry::{ArrayMode, MicArrayGeometry, Orientation, Vec3};
use crate::types::NodeId;

// ---------------------------------------------------------------------------
// Shared JSON helpers
// ---------------------------------------------------------------------------

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileRead {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
    std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })
}

fn check_unit_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(ConfigError::invalid_value(field, format!("must be in (0, 1], got {value}")));
    }
    Ok(())
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(value > 0.0 && value.is_finite()) {
        return Err(ConfigError::invalid_value(field, format!("must be > 0, got {value}")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Node side
// ---------------------------------------------------------------------------

/// Sample acquisition and windowing cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Per-channel sample rate in Hz. Default: **860** (ADS1115 maximum).
    pub sample_rate: u32,
    /// Emission period in milliseconds. Default: **100**.
    pub frame_hop_ms: u64,
    /// Analysis window length in seconds. Default: **1.6**.
    pub window_seconds: f64,
    /// Samples per channel read from the source at a time. Default: **128**.
    pub block_samples: usize,
    /// Blocks buffered between sampler and feature thread. Default: **16**.
    pub queue_capacity: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 860,
            frame_hop_ms: 100,
            window_seconds: 1.6,
            block_samples: 128,
            queue_capacity: 16,
        }
    }
}

impl SamplingConfig {
    /// Samples per channel between two emitted frames.
    #[must_use]
    pub fn hop_samples(&self) -> usize {
        ((f64::from(self.sample_rate) * self.frame_hop_ms as f64 / 1000.0) as usize).max(1)
    }

    /// Samples per channel in the analysis window (never shorter than a hop).
    #[must_use]
    pub fn window_samples(&self) -> usize {
        ((self.window_seconds * f64::from(self.sample_rate)) as usize).max(self.hop_samples())
    }
}

/// Noise floor and presence thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// EMA factor for the noise floor. Default: **0.01**.
    pub noise_alpha: f64,
    /// Rise threshold as a multiple of the aggregate noise floor. Default: **3.5**.
    pub k_on: f64,
    /// Fall threshold, strictly below `k_on`. Default: **2.0**.
    pub k_off: f64,
    /// Consecutive frames a new state must hold before it takes effect. Default: **2**.
    pub min_hold_frames: u32,
    /// Noise floor per channel before calibration. Default: **0.05**.
    pub initial_noise_rms: f64,
    /// Goertzel frequencies for band power on channel 0. Default: **[120, 240]**.
    pub band_frequencies_hz: Vec<f64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            noise_alpha: 0.01,
            k_on: 3.5,
            k_off: 2.0,
            min_hold_frames: 2,
            initial_noise_rms: 0.05,
            band_frequencies_hz: vec![120.0, 240.0],
        }
    }
}

impl DetectionConfig {
    /// Validate thresholds.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_interval("detection.noise_alpha", self.noise_alpha)?;
        check_positive("detection.k_off", self.k_off)?;
        if self.k_off >= self.k_on {
            return Err(ConfigError::invalid_value(
                "detection.k_off",
                format!("must be below k_on ({} >= {})", self.k_off, self.k_on),
            ));
        }
        if self.min_hold_frames == 0 {
            return Err(ConfigError::invalid_value("detection.min_hold_frames", "must be >= 1"));
        }
        if !(self.initial_noise_rms >= 0.0) {
            return Err(ConfigError::invalid_value("detection.initial_noise_rms", "must be >= 0"));
        }
        Ok(())
    }
}

/// Built-in audio simulation in place of the ADC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Use a simulated sampler instead of hardware.
    pub enabled: bool,
    /// Background noise standard deviation in volts. Default: **0.02**.
    pub noise_level: f64,
    /// JSON file holding the simulated drone position. When absent, the
    /// sampler produces bench tones instead of a located source.
    pub drone_state_file: Option<PathBuf>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            noise_level: 0.02,
            drone_state_file: None,
        }
    }
}

/// Configuration for one microphone node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node identity, must match the server's node list.
    pub node_id: NodeId,
    /// Fusion server host.
    pub fusion_host: String,
    /// Fusion server UDP port. Default: **5005**.
    pub fusion_port: u16,
    /// Microphone layout in use.
    pub array_mode: ArrayMode,
    /// Global node position in meters (informational on the node).
    pub global_position: Vec3,
    /// Mounting orientation (informational on the node).
    pub orientation: Orientation,
    /// Triangle pointing vectors; empty selects the built-in layout.
    pub triangle_vectors: Vec<Vec3>,
    /// Triangle local positions; must match `triangle_vectors` when set.
    pub triangle_positions: Vec<Vec3>,
    /// Tetrahedron pointing vectors; empty selects the built-in layout.
    pub tetrahedron_vectors: Vec<Vec3>,
    /// Tetrahedron local positions; must match `tetrahedron_vectors` when set.
    pub tetrahedron_positions: Vec<Vec3>,
    /// Acquisition cadence.
    pub sampling: SamplingConfig,
    /// Detection thresholds.
    pub detection: DetectionConfig,
    /// Keep-alive rate while nothing is emitted; 0 disables. Default: **2.0**.
    pub heartbeat_hz: f64,
    /// Noise floor measured by `calibrate`; overrides `initial_noise_rms`.
    pub calibration_noise_rms: Option<Vec<f64>>,
    /// Audio simulation.
    pub simulator: SimulatorConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            fusion_host: "127.0.0.1".to_string(),
            fusion_port: 5005,
            array_mode: ArrayMode::Triangle,
            global_position: Vec3::new(0.0, 0.0, 1.0),
            orientation: Orientation::default(),
            triangle_vectors: Vec::new(),
            triangle_positions: Vec::new(),
            tetrahedron_vectors: Vec::new(),
            tetrahedron_positions: Vec::new(),
            sampling: SamplingConfig::default(),
            detection: DetectionConfig::default(),
            heartbeat_hz: 2.0,
            calibration_noise_rms: None,
            simulator: SimulatorConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load and validate a [`NodeConfig`] from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be opened,
    /// [`ConfigError::Json`] if it does not parse and
    /// [`ConfigError::InvalidValue`] if it fails validation.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let cfg: NodeConfig = read_json(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be written.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    /// Number of microphone channels for the active layout.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.array_mode.channels()
    }

    /// `host:port` of the fusion server.
    #[must_use]
    pub fn fusion_endpoint(&self) -> String {
        format!("{}:{}", self.fusion_host, self.fusion_port)
    }

    /// Resolve the active microphone geometry.
    ///
    /// # Errors
    ///
    /// Fails if configured vectors are malformed or do not match the
    /// channel count of the array mode.
    pub fn geometry(&self) -> Result<MicArrayGeometry, ConfigError> {
        let (vectors, positions) = match self.array_mode {
            ArrayMode::Triangle => (&self.triangle_vectors, &self.triangle_positions),
            ArrayMode::Tetrahedron => (&self.tetrahedron_vectors, &self.tetrahedron_positions),
        };
        if vectors.is_empty() {
            return Ok(MicArrayGeometry::for_mode(self.array_mode));
        }
        if vectors.len() != self.channels() {
            return Err(ConfigError::invalid_value(
                "mic vectors",
                format!("{:?} needs {} vectors, got {}", self.array_mode, self.channels(), vectors.len()),
            ));
        }
        let geometry = if positions.is_empty() {
            MicArrayGeometry::from_vectors(vectors, 0.1)?
        } else {
            MicArrayGeometry::new(vectors, positions)?
        };
        Ok(geometry)
    }

    /// Initial noise floor per channel.
    #[must_use]
    pub fn initial_noise(&self) -> Vec<f64> {
        match &self.calibration_noise_rms {
            Some(levels) if levels.len() == self.channels() => levels.clone(),
            _ => vec![self.detection.initial_noise_rms; self.channels()],
        }
    }

    /// Validate all fields.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fusion_host.is_empty() {
            return Err(ConfigError::invalid_value("fusion_host", "must not be empty"));
        }
        if self.sampling.sample_rate == 0 {
            return Err(ConfigError::invalid_value("sampling.sample_rate", "must be > 0"));
        }
        if self.sampling.frame_hop_ms == 0 {
            return Err(ConfigError::invalid_value("sampling.frame_hop_ms", "must be > 0"));
        }
        check_positive("sampling.window_seconds", self.sampling.window_seconds)?;
        if self.sampling.block_samples == 0 {
            return Err(ConfigError::invalid_value("sampling.block_samples", "must be > 0"));
        }
        if self.sampling.queue_capacity == 0 {
            return Err(ConfigError::invalid_value("sampling.queue_capacity", "must be > 0"));
        }
        if !(self.heartbeat_hz >= 0.0) {
            return Err(ConfigError::invalid_value("heartbeat_hz", "must be >= 0"));
        }
        if let Some(levels) = &self.calibration_noise_rms {
            if levels.len() != self.channels() {
                return Err(ConfigError::invalid_value(
                    "calibration_noise_rms",
                    format!("expected {} values, got {}", self.channels(), levels.len()),
                ));
            }
            if levels.iter().any(|v| !(*v >= 0.0)) {
                return Err(ConfigError::invalid_value("calibration_noise_rms", "must be >= 0"));
            }
        }
        self.detection.validate()?;
        self.geometry()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server side
// ---------------------------------------------------------------------------

/// A configured node as seen by the fusion server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePlacement {
    /// Node id.
    pub node_id: NodeId,
    /// Global position in meters.
    pub position: Vec3,
    /// Mounting orientation; defaults to identity.
    #[serde(default)]
    pub orientation: Orientation,
}

/// Axis-aligned search volume in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridBounds {
    /// `[min, max]` along X.
    pub x: [f64; 2],
    /// `[min, max]` along Y.
    pub y: [f64; 2],
    /// `[min, max]` along Z.
    pub z: [f64; 2],
}

impl Default for GridBounds {
    fn default() -> Self {
        Self {
            x: [-5.0, 25.0],
            y: [-5.0, 25.0],
            z: [0.0, 25.0],
        }
    }
}

impl GridBounds {
    /// Lower corner.
    #[must_use]
    pub fn min(&self) -> Vec3 {
        Vec3::new(self.x[0], self.y[0], self.z[0])
    }

    /// Upper corner.
    #[must_use]
    pub fn max(&self) -> Vec3 {
        Vec3::new(self.x[1], self.y[1], self.z[1])
    }

    /// Number of samples along each axis for `step`, endpoints included.
    #[must_use]
    pub fn counts(&self, step: f64) -> [usize; 3] {
        let n = |r: [f64; 2]| (Self::axis_span(r, step) as usize).saturating_add(1);
        [n(self.x), n(self.y), n(self.z)]
    }

    /// Total grid points for `step`, computed in `f64` so huge grids cannot
    /// overflow. Infinite when `step` is zero.
    #[must_use]
    pub fn point_count(&self, step: f64) -> f64 {
        [self.x, self.y, self.z]
            .iter()
            .map(|&r| Self::axis_span(r, step) + 1.0)
            .product()
    }

    fn axis_span(r: [f64; 2], step: f64) -> f64 {
        ((r[1] - r[0]) / step + 1e-9).floor()
    }
}

/// Grid search and refinement parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Search volume.
    pub bounds: GridBounds,
    /// Coarse grid step in meters. Default: **1.0**.
    pub step: f64,
    /// Distance clamp avoiding the `1/d²` singularity. Default: **0.5**.
    pub min_distance: f64,
    /// Direction penalty weight λ. Default: **0.3**.
    pub direction_weight: f64,
    /// Run the local refinement after the grid search. Default: **true**.
    pub refine: bool,
    /// Iteration cap for the refinement. Default: **200**.
    pub refine_max_iterations: usize,
    /// Minimum online and detecting nodes for a fix. Default: **2**.
    pub min_nodes: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            bounds: GridBounds::default(),
            step: 1.0,
            min_distance: 0.5,
            direction_weight: 0.3,
            refine: true,
            refine_max_iterations: 200,
            min_nodes: 2,
        }
    }
}

/// Position and velocity smoothing factors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// EMA factor for position. Default: **0.4**.
    pub position_alpha: f64,
    /// EMA factor for velocity. Default: **0.2**.
    pub velocity_alpha: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            position_alpha: 0.4,
            velocity_alpha: 0.2,
        }
    }
}

/// Staleness and liveness bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    /// Frames older than this on arrival are rejected. Default: **500**.
    pub max_latency_ms: i64,
    /// A node with no accepted frame for this long goes offline. Default: **2000**.
    pub offline_timeout_ms: i64,
    /// Liveness sweep period. Default: **1000**.
    pub sweep_interval_ms: u64,
    /// Frames of history kept per node. Default: **50** (5 s at 10 Hz).
    pub history_capacity: usize,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            max_latency_ms: 500,
            offline_timeout_ms: 2000,
            sweep_interval_ms: 1000,
            history_capacity: 50,
        }
    }
}

/// Configuration for the fusion server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP bind host for feature frames. Default: **0.0.0.0**.
    pub listen_host: String,
    /// UDP port for feature frames. Default: **5005**.
    pub listen_port: u16,
    /// HTTP/WebSocket port. Default: **8080**.
    pub http_port: u16,
    /// Fusion cycles per second. Default: **20**.
    pub localization_rate_hz: f64,
    /// Grid search parameters.
    pub solver: SolverConfig,
    /// Smoothing factors.
    pub smoothing: SmoothingConfig,
    /// Staleness and liveness.
    pub liveness: LivenessConfig,
    /// Configured nodes (at least three).
    pub nodes: Vec<NodePlacement>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let node = |node_id, x, y| NodePlacement {
            node_id,
            position: Vec3::new(x, y, 1.0),
            orientation: Orientation::default(),
        };
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 5005,
            http_port: 8080,
            localization_rate_hz: 20.0,
            solver: SolverConfig::default(),
            smoothing: SmoothingConfig::default(),
            liveness: LivenessConfig::default(),
            nodes: vec![node(1, 0.0, 0.0), node(2, 20.0, 0.0), node(3, 0.0, 20.0)],
        }
    }
}

impl ServerConfig {
    /// Minimum number of configured nodes.
    pub const MIN_CONFIGURED_NODES: usize = 3;
    /// Upper bound on coarse grid points per cycle.
    pub const MAX_GRID_POINTS: usize = 2_000_000;

    /// Load and validate a [`ServerConfig`] from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be opened,
    /// [`ConfigError::Json`] if it does not parse and
    /// [`ConfigError::InvalidValue`] if it fails validation.
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let cfg: ServerConfig = read_json(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be written.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        write_json(self, path)
    }

    /// UDP bind address for feature frames.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    /// Validate all fields.
    ///
    /// # Validated invariants
    ///
    /// - At least three nodes with unique ids and finite positions.
    /// - Grid bounds ordered, step positive, grid not absurdly large.
    /// - Distance clamp and localization rate positive, λ non-negative.
    /// - Smoothing factors in `(0, 1]`.
    /// - Liveness bounds positive and history non-empty.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.len() < Self::MIN_CONFIGURED_NODES {
            return Err(ConfigError::invalid_value(
                "nodes",
                format!("need at least {} nodes, got {}", Self::MIN_CONFIGURED_NODES, self.nodes.len()),
            ));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.node_id) {
                return Err(ConfigError::invalid_value(
                    "nodes",
                    format!("duplicate node id {}", node.node_id),
                ));
            }
            if !node.position.is_finite() {
                return Err(ConfigError::invalid_value(
                    "nodes",
                    format!("node {} has a non-finite position", node.node_id),
                ));
            }
        }

        check_positive("localization_rate_hz", self.localization_rate_hz)?;

        let solver = &self.solver;
        check_positive("solver.step", solver.step)?;
        check_positive("solver.min_distance", solver.min_distance)?;
        if !(solver.direction_weight >= 0.0) {
            return Err(ConfigError::invalid_value("solver.direction_weight", "must be >= 0"));
        }
        for (name, range) in [("solver.bounds.x", solver.bounds.x), ("solver.bounds.y", solver.bounds.y), ("solver.bounds.z", solver.bounds.z)] {
            if !(range[0].is_finite() && range[1].is_finite() && range[0] <= range[1]) {
                return Err(ConfigError::invalid_value(name, format!("must satisfy min <= max, got {range:?}")));
            }
        }
        let points = solver.bounds.point_count(solver.step);
        if !(points <= Self::MAX_GRID_POINTS as f64) {
            return Err(ConfigError::invalid_value(
                "solver.step",
                format!("grid has {points} points (max {})", Self::MAX_GRID_POINTS),
            ));
        }
        if solver.min_nodes < 2 {
            return Err(ConfigError::invalid_value("solver.min_nodes", "must be >= 2"));
        }

        check_unit_interval("smoothing.position_alpha", self.smoothing.position_alpha)?;
        check_unit_interval("smoothing.velocity_alpha", self.smoothing.velocity_alpha)?;

        let live = &self.liveness;
        if live.max_latency_ms <= 0 {
            return Err(ConfigError::invalid_value("liveness.max_latency_ms", "must be > 0"));
        }
        if live.offline_timeout_ms <= 0 {
            return Err(ConfigError::invalid_value("liveness.offline_timeout_ms", "must be > 0"));
        }
        if live.sweep_interval_ms == 0 {
            return Err(ConfigError::invalid_value("liveness.sweep_interval_ms", "must be > 0"));
        }
        if live.history_capacity == 0 {
            return Err(ConfigError::invalid_value("liveness.history_capacity", "must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_configs_are_valid() {
        ServerConfig::default().validate().expect("default server config should be valid");
        NodeConfig::default().validate().expect("default node config should be valid");
    }

    #[test]
    fn server_json_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("server.json");

        let original = ServerConfig::default();
        original.to_json(&path).expect("serialization should succeed");
        let loaded = ServerConfig::from_json(&path).expect("deserialization should succeed");
        assert_eq!(loaded, original);
    }

    #[test]
    fn node_json_round_trip_preserves_calibration() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join("node-2.json");

        let mut original = NodeConfig::default();
        original.node_id = 2;
        original.calibration_noise_rms = Some(vec![0.01, 0.02, 0.03]);
        original.to_json(&path).unwrap();

        let loaded = NodeConfig::from_json(&path).unwrap();
        assert_eq!(loaded.node_id, 2);
        assert_eq!(loaded.initial_noise(), vec![0.01, 0.02, 0.03]);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: ServerConfig = serde_json::from_str(
            r#"{"nodes": [
                {"node_id": 1, "position": [0, 0, 1]},
                {"node_id": 2, "position": [20, 0, 1]},
                {"node_id": 3, "position": [0, 20, 1]}
            ]}"#,
        )
        .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.listen_port, 5005);
        assert_eq!(cfg.solver.step, 1.0);
    }

    #[test]
    fn two_nodes_is_invalid() {
        let mut cfg = ServerConfig::default();
        cfg.nodes.truncate(2);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duplicate_node_ids_are_invalid() {
        let mut cfg = ServerConfig::default();
        cfg.nodes[2].node_id = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_bounds_are_invalid() {
        let mut cfg = ServerConfig::default();
        cfg.solver.bounds.z = [10.0, 0.0];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn k_off_must_be_below_k_on() {
        let mut cfg = NodeConfig::default();
        cfg.detection.k_off = 4.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tetrahedron_with_three_vectors_is_invalid() {
        let mut cfg = NodeConfig::default();
        cfg.array_mode = ArrayMode::Tetrahedron;
        cfg.tetrahedron_vectors = vec![Vec3::UP; 3];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn sampling_hop_and_window() {
        let s = SamplingConfig::default();
        assert_eq!(s.hop_samples(), 86);
        assert_eq!(s.window_samples(), 1376);
    }

    #[test]
    fn grid_counts_include_endpoints() {
        let b = GridBounds::default();
        assert_eq!(b.counts(1.0), [31, 31, 26]);
        assert_eq!(b.point_count(1.0), 31.0 * 31.0 * 26.0);
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("broken.json");
        std::fs::write(&path, "{ \"listen_port\": ").unwrap();
        match ServerConfig::from_json(&path) {
            Err(ConfigError::Json { path: p, source }) => {
                assert_eq!(p, path);
                assert!(source.is_eof());
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn tiny_step_is_rejected_not_overflowed() {
        for step in [1e-6, 1e-300] {
            let mut cfg = ServerConfig::default();
            cfg.solver.step = step;
            match cfg.validate() {
                Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "solver.step"),
                other => panic!("step {step}: expected solver.step error, got {other:?}"),
            }
        }
    }
}
