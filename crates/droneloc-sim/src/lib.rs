//! # droneloc-sim
//!
//! Test drivers for the localization pipeline without microphones.
//!
//! - [`trajectory`]: circle, line, hover, figure-eight and diagonal flights
//! - [`frames`]: synthetic feature frames for a known source position
//! - [`state`]: the drone state file consumed by simulated node samplers

#![warn(missing_docs)]

pub mod error;
pub mod frames;
pub mod state;
pub mod trajectory;

pub use error::{SimError, SimResult};
pub use frames::{FrameSynthesizer, SynthConfig};
pub use state::write_drone_state;
pub use trajectory::{Pattern, Trajectory};
