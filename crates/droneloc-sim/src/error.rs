//! Error types for the drone simulator.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use droneloc_core::error::ConfigError;

/// Result alias for simulator operations.
pub type SimResult<T> = Result<T, SimError>;

/// Simulator failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SimError {
    /// A trajectory or generator parameter is out of range.
    #[error("invalid {name}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Unknown trajectory pattern name.
    #[error("unknown pattern `{0}` (expected circle, line, hover, figure8 or diagonal)")]
    UnknownPattern(String),

    /// The server configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Writing the drone state file failed.
    #[error("cannot write drone state {path:?}: {source}")]
    StateFile {
        /// Target path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Socket failure.
    #[error("network error: {0}")]
    Network(#[from] io::Error),
}

impl SimError {
    /// Create an invalid-parameter error.
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
