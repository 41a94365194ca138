//! # droneloc-core
//!
//! Shared building blocks for acoustic drone localization: spatial types,
//! the records exchanged between microphone nodes and the fusion server,
//! configuration, errors and the datagram codec.
//!
//! ## Overview
//!
//! ```text
//! raw samples ──► FeatureFrame ──► NodeStateTable ──► FusionEstimate ──► UI
//!   (node)          (node)           (server)           (server)
//! ```
//!
//! The node pipeline lives in `droneloc-node`, the state table and
//! localization engine in `droneloc-server`. This crate holds only what
//! both sides agree on.
//!
//! ## Example
//!
//! ```rust
//! use droneloc_core::{MicArrayGeometry, Vec3};
//!
//! let geometry = MicArrayGeometry::triangle();
//! assert_eq!(geometry.channels(), 3);
//! assert!((geometry.vectors()[0].norm() - 1.0).abs() < 1e-9);
//! let _up = Vec3::UP;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod geometry;
pub mod packet;
pub mod types;

pub use config::{
    DetectionConfig, GridBounds, LivenessConfig, NodeConfig, NodePlacement, SamplingConfig,
    ServerConfig, SimulatorConfig, SmoothingConfig, SolverConfig,
};
pub use error::{
    ConfigError, CoreError, CoreResult, GeometryError, IngestError, NoFixReason, PacketError,
};
pub use geometry::{ArrayMode, MicArrayGeometry, Orientation, Rotation3, Vec3};
pub use types::{DroneState, FeatureFrame, FusionEstimate, NodeDetail, NodeId, NodeSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
