//! # droneloc-node
//!
//! Per-node acoustic processing: turns raw microphone samples into
//! [`FeatureFrame`](droneloc_core::FeatureFrame)s for the fusion server.
//!
//! - [`noise`]: adaptive noise floor, frozen while a source is present
//! - [`presence`]: two-threshold hysteresis detector with debounce
//! - [`direction`]: energy-weighted direction of arrival
//! - [`features`]: sliding window, RMS/crest/band power, frame assembly
//! - [`sampler`]: sample sources (bench tones, simulated drone)
//! - [`agent`]: sampler thread + feature thread + UDP delivery
//!
//! ## Example
//!
//! ```rust
//! use droneloc_node::direction::DirectionEstimator;
//! use droneloc_core::MicArrayGeometry;
//!
//! let est = DirectionEstimator::new(MicArrayGeometry::triangle());
//! let out = est.estimate(&[0.8, 0.1, 0.1]);
//! assert!(out.direction.unwrap().x > 0.9);
//! ```

#![warn(missing_docs)]

pub mod agent;
pub mod direction;
pub mod error;
pub mod features;
pub mod noise;
pub mod presence;
pub mod sampler;
pub mod window;

pub use agent::{AgentStatsSnapshot, Capture, FrameSink, NodeAgent, ShutdownHandle, UdpFrameSink};
pub use direction::{DirectionEstimate, DirectionEstimator};
pub use error::{NodeError, NodeResult};
pub use features::FeatureExtractor;
pub use noise::NoiseFloorTracker;
pub use presence::{PresenceDetector, PresenceState};
pub use sampler::{
    source_for_config, DroneAudioSimulator, DronePositionSource, FileDronePosition, SampleSource,
    SharedDronePosition, SimulatedSampler,
};
pub use window::SampleWindow;
