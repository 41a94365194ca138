//! # droneloc-server
//!
//! Fuses feature frames from the microphone nodes into a single estimate
//! of the drone's position and velocity.
//!
//! - [`state_table`]: per-node latest frame, history, liveness and counters
//! - [`localization`]: error model, grid search, refinement and smoothing
//! - [`receiver`]: UDP packet ingestion
//! - [`service`]: periodic fusion and liveness tasks, estimate broadcast
//! - [`api`]: REST and WebSocket endpoints
//!
//! ## Example
//!
//! ```rust
//! use chrono::Utc;
//! use droneloc_core::ServerConfig;
//! use droneloc_server::FusionService;
//!
//! let service = FusionService::new(ServerConfig::default()).unwrap();
//! let estimate = service.run_cycle_at(Utc::now());
//! assert!(!estimate.present);
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod error;
pub mod localization;
pub mod receiver;
pub mod service;
pub mod state_table;

pub use api::create_router;
pub use error::{ServerError, ServerResult};
pub use localization::{LocalizationEngine, Solution};
pub use receiver::{ReceiverStats, ReceiverStatsSnapshot};
pub use service::FusionService;
pub use state_table::{IngestStats, NodeStateTable, NodeView, TableSnapshot};
