//! Error types for the droneloc system.
//!
//! This module provides error handling using [`thiserror`] for automatic
//! `Display` and `Error` trait implementations.
//!
//! # Error Hierarchy
//!
//! - [`CoreError`]: Top-level error type that encompasses all subsystem errors
//! - [`ConfigError`]: Configuration loading and validation (fatal at startup)
//! - [`GeometryError`]: Malformed microphone array description (fatal at startup)
//! - [`IngestError`]: A feature frame was refused by the node state table
//! - [`PacketError`]: A datagram could not be decoded into a feature frame
//! - [`NoFixReason`]: Why a fusion cycle produced no position
//!
//! Only [`ConfigError`] and [`GeometryError`] are meant to stop a process.
//! Everything else is handled where it occurs and turned into a defined
//! no-op or no-fix outcome.
//!
//! # Example
//!
//! ```rust
//! use droneloc_core::error::{CoreError, IngestError};
//!
//! let err: CoreError = IngestError::Stale { node_id: 2, sequence: 10, last_accepted: 12 }.into();
//! assert!(err.is_recoverable());
//! ```

use std::path::PathBuf;

use thiserror::Error;

use crate::types::NodeId;

/// A specialized `Result` type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Top-level error type for the droneloc system.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CoreError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Microphone geometry error
    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// Frame ingestion error
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Packet decoding error
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    /// I/O error from sockets or files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors are handled locally (drop the frame, report no
    /// fix). Non-recoverable errors should prevent a process from starting.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Ingest(_) | Self::Packet(_) | Self::Io(_) => true,
            Self::Config(_) | Self::Geometry(_) => false,
        }
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("Cannot access config file {path:?}: {source}")]
    FileRead {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A field holds a value outside its valid domain.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// The file is not valid JSON for the expected type.
    #[error("Cannot parse config file {path:?}: {source}")]
    Json {
        /// Path that failed.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The node geometry embedded in the config is malformed.
    #[error("Invalid geometry: {0}")]
    Geometry(#[from] GeometryError),
}

impl ConfigError {
    /// Creates a new invalid value error.
    #[must_use]
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors describing a malformed microphone array.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Fewer than three microphones.
    #[error("Array needs at least {min} microphones, got {count}")]
    TooFewMicrophones {
        /// Number supplied.
        count: usize,
        /// Minimum accepted.
        min: usize,
    },

    /// Vectors and positions have different lengths.
    #[error("Got {vectors} direction vectors but {positions} positions")]
    LengthMismatch {
        /// Number of direction vectors.
        vectors: usize,
        /// Number of local positions.
        positions: usize,
    },

    /// A direction vector cannot be normalised.
    #[error("Microphone {index} has a zero-length direction vector")]
    ZeroVector {
        /// Index of the microphone.
        index: usize,
    },

    /// A component is NaN or infinite.
    #[error("Microphone {index} has a non-finite component")]
    NonFinite {
        /// Index of the microphone.
        index: usize,
    },
}

/// Reasons the node state table refuses a frame.
///
/// Every variant is a normal outcome of unreliable delivery. Frames are
/// accepted or rejected as a whole; a rejected frame leaves the table
/// untouched.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    /// The frame names a node that is not configured.
    #[error("Unknown node {node_id}")]
    UnknownNode {
        /// Node id carried by the frame.
        node_id: NodeId,
    },

    /// Duplicate or out-of-order sequence number.
    #[error("Stale frame from node {node_id}: sequence {sequence} <= last accepted {last_accepted}")]
    Stale {
        /// Node id.
        node_id: NodeId,
        /// Sequence carried by the frame.
        sequence: u64,
        /// Last sequence the table accepted for this node.
        last_accepted: u64,
    },

    /// Frame timestamp is older than the latency bound.
    #[error("Expired frame from node {node_id}: {age_ms}ms old (max {max_ms}ms)")]
    Expired {
        /// Node id.
        node_id: NodeId,
        /// Age relative to the receiving clock.
        age_ms: i64,
        /// Configured bound.
        max_ms: i64,
    },
}

impl IngestError {
    /// Short label used for per-reason counters and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownNode { .. } => "unknown_node",
            Self::Stale { .. } => "stale",
            Self::Expired { .. } => "expired",
        }
    }
}

/// Errors decoding a datagram into a feature frame.
#[derive(Error, Debug)]
pub enum PacketError {
    /// The `|crc` trailer is missing.
    #[error("Missing CRC trailer")]
    MissingTrailer,

    /// The CRC trailer does not match the payload.
    #[error("CRC mismatch: expected {expected:08x}, got {got:08x}")]
    CrcMismatch {
        /// CRC computed over the payload.
        expected: u32,
        /// CRC carried by the packet.
        got: u32,
    },

    /// The trailer is not valid hexadecimal.
    #[error("Malformed CRC trailer")]
    MalformedTrailer,

    /// The payload is not valid JSON for a packet.
    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The timestamp cannot be represented.
    #[error("Timestamp {ts_us}us is out of range")]
    Timestamp {
        /// Raw microsecond timestamp.
        ts_us: i64,
    },
}

/// Why a fusion cycle ended without a position.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoFixReason {
    /// Fewer than two nodes are online and detecting.
    #[error("Insufficient nodes: {qualifying} qualifying, need {required}")]
    InsufficientNodes {
        /// Nodes online with `present=true`.
        qualifying: usize,
        /// Minimum required.
        required: usize,
    },

    /// Measured or predicted energy sums to zero.
    #[error("Degenerate geometry: total energy is zero")]
    DegenerateGeometry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_errors_are_recoverable() {
        let err: CoreError = IngestError::UnknownNode { node_id: 9 }.into();
        assert!(err.is_recoverable());
    }

    #[test]
    fn config_errors_are_fatal() {
        let err: CoreError = ConfigError::invalid_value("nodes", "need at least 3").into();
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("nodes"));
    }

    #[test]
    fn ingest_error_kinds() {
        assert_eq!(IngestError::UnknownNode { node_id: 1 }.kind(), "unknown_node");
        assert_eq!(
            IngestError::Stale { node_id: 1, sequence: 1, last_accepted: 2 }.kind(),
            "stale"
        );
        assert_eq!(
            IngestError::Expired { node_id: 1, age_ms: 900, max_ms: 500 }.kind(),
            "expired"
        );
    }
}
