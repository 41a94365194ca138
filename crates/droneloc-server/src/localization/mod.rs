//! Source localization from a node state snapshot.
//!
//! [`grid`] holds the error model and the coarse search, [`refine`] the
//! bounded local optimiser, [`smoothing`] the track filter and [`engine`]
//! ties them into one fusion cycle.

pub mod engine;
pub mod grid;
pub mod refine;
pub mod smoothing;

pub use engine::{solve, LocalizationEngine, Solution};
pub use grid::{coarse_search, predicted_intensity, ErrorModel, GridFix, Observation};
pub use refine::{nelder_mead, SearchBox};
pub use smoothing::MotionSmoother;
